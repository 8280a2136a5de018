//! Movement aware objective function.
//!
//! The link cost combines a movement factor, derived from the first and second time derivatives of
//! the received signal strength, with the remaining signal strength margin before the link is
//! lost. A neighbor moving away quickly is expensive even if its signal is still strong.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{clamp_cost, Candidate, Context, Freshness, ObjectiveFunction, Ocp, MAX_COST, MVMTOF};
use crate::{
    fixmath::{self, Fix},
    link_stats::{CachedMetric, LinkStats, Sample},
    metric_container::McType,
};

/// Margin kept from the signal strength threshold when a trend is reversing.
const TURN_MARGIN: i32 = 20;

/// Tunables of [`MovementOf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Scale of signal strength derivatives.
    pub scale: u16,
    /// Weight of the movement factor.
    pub alpha: f32,
    /// Fraction of the first derivative a decelerating second derivative must exceed to flip the
    /// sign of the movement factor.
    pub beta: f32,
    /// Weakest usable signal strength, in absolute dBm.
    pub max_abs_rssi: i32,
    /// Acceptable path cost per hop.
    pub path_cost_red: u16,
    pub mf_lower: i32,
    pub mf_upper: i32,
    /// Signal strength, in absolute dBm, from which the remaining margin is 0.
    pub abs_rssi_red: i32,
    /// Smallest acceptable remaining signal strength margin.
    pub rrssi_red: i32,
    /// Link cost when a single signal strength sample is known.
    pub single_sample_cost: u16,
    pub max_link_cost: u16,
    pub switch_threshold: u16,
    pub max_path_cost: u16,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            scale: 100,
            alpha: 25.0,
            beta: 0.25,
            max_abs_rssi: 94,
            path_cost_red: 2000,
            mf_lower: -400,
            mf_upper: 800,
            abs_rssi_red: 93,
            rrssi_red: 60,
            single_sample_cost: 400,
            max_link_cost: 2000,
            switch_threshold: 100,
            max_path_cost: 32000,
        }
    }
}

#[derive(Debug)]
pub struct MovementOf {
    config: MovementConfig,
}

impl MovementOf {
    pub fn new(config: MovementConfig) -> Self {
        Self { config }
    }

    fn cost(&self, mf: Fix, rrssi: Fix) -> u16 {
        let margin_cost =
            fixmath::from_int(4 * self.config.abs_rssi_red).saturating_sub(rrssi);
        clamp_cost(fixmath::to_int(mf.saturating_abs().saturating_add(margin_cost)))
    }

    /// Rate of change of the signal strength between two samples, scaled.
    fn derivative(&self, newer: Sample, older: Sample) -> Fix {
        fixmath::div(
            newer
                .rssi
                .saturating_sub(older.rssi)
                .saturating_mul_int(self.config.scale as i32),
            fixmath::seconds(newer.at.saturating_duration_since(older.at)),
        )
    }

    /// Movement factor and remaining signal strength margin from the local history.
    fn derive(&self, stats: &LinkStats) -> Option<CachedMetric> {
        let samples: Vec<Sample> = stats.rssi().iter().collect();
        if samples.len() < 2 {
            return None;
        }

        let d1: Vec<Fix> = samples
            .windows(2)
            .map(|w| self.derivative(w[0], w[1]))
            .collect();
        let alpha = fixmath::from_f32(self.config.alpha);
        let mut mf = d1[0].saturating_mul(alpha);

        let mut d2 = Fix::ZERO;
        if samples.len() > 2 {
            d2 = fixmath::div(
                d1[0].saturating_sub(d1[1]),
                fixmath::seconds(samples[0].at.saturating_duration_since(samples[1].at)),
            );
            if (d2 >= Fix::ZERO) == (d1[0] >= Fix::ZERO) {
                let denominator = if d1[0] == Fix::ZERO { Fix::DELTA } else { d1[0] };
                let ratio = fixmath::div(d2, denominator);
                let growth = fixmath::ln(Fix::ONE.saturating_add(ratio));
                mf = mf.saturating_mul(Fix::ONE.saturating_add(growth));
            } else if d2.saturating_abs() >= d1[0].saturating_abs() {
                mf = d2.saturating_mul(alpha);
            } else if d2.saturating_abs()
                > d1[0]
                    .saturating_abs()
                    .saturating_mul(fixmath::from_f32(self.config.beta))
            {
                mf = mf.saturating_neg();
            }
        }

        let rrssi = self.remaining_rssi(samples[0].rssi, d1[0], d2);
        Some(CachedMetric {
            trend: mf,
            margin: rrssi,
            at: Some(samples[0].at),
        })
    }

    /// Remaining signal strength before the link is lost. If the trend is decelerating, the
    /// extrapolated turning point is taken into account.
    fn remaining_rssi(&self, last: Fix, d1: Fix, d2: Fix) -> Fix {
        let red = fixmath::from_int(self.config.abs_rssi_red);
        let turn_red = fixmath::from_int(self.config.abs_rssi_red - TURN_MARGIN);
        if last.saturating_abs() > red {
            return Fix::ZERO;
        }

        if d2 != Fix::ZERO && (d1 >= Fix::ZERO) != (d2 >= Fix::ZERO) {
            let tp = fixmath::div(d1, d2).saturating_abs();
            let half_d2 = fixmath::div(d2, fixmath::from_int(2));
            let turn = last.saturating_add(
                d1.saturating_mul(tp)
                    .saturating_add(half_d2.saturating_mul(tp.saturating_mul(tp))),
            );
            if d1 >= Fix::ZERO && turn <= turn_red {
                return turn
                    .saturating_sub(last)
                    .saturating_add(red.saturating_add(turn));
            } else if d1 < Fix::ZERO && turn >= red.saturating_neg() {
                return last
                    .saturating_sub(turn)
                    .saturating_add(turn_red.saturating_add(turn.saturating_abs()));
            }
        }

        if d1 < Fix::ZERO {
            red.saturating_add(last)
        } else {
            turn_red.saturating_add(last.saturating_abs())
        }
    }
}

impl ObjectiveFunction for MovementOf {
    fn ocp(&self) -> Ocp {
        MVMTOF
    }

    fn name(&self) -> &'static str {
        "mvmtof"
    }

    fn natural_metric_container(&self) -> McType {
        McType::Movement
    }

    fn max_link_cost(&self) -> u16 {
        self.config.max_link_cost
    }

    fn max_path_cost(&self) -> u16 {
        self.config.max_path_cost
    }

    fn switch_threshold(&self) -> u16 {
        self.config.switch_threshold
    }

    fn freshness(&self) -> Freshness {
        Freshness::Receive
    }

    fn link_cost(&self, ctx: &Context, candidate: &Candidate<'_>) -> u16 {
        let Some(stats) = candidate.stats else {
            return MAX_COST;
        };
        match stats.rssi().count(ctx.now, false) {
            0 => MAX_COST,
            1 => self.config.single_sample_cost,
            _ => {
                if stats.is_updated() {
                    if let Some(metric) = self.derive(stats) {
                        trace!(
                            neighbor = %candidate.addr,
                            mf = %metric.trend,
                            rrssi = %metric.margin,
                            "Updated movement factor"
                        );
                        stats.store_metric(metric);
                    }
                }
                let metric = stats.cached_metric();
                self.cost(metric.trend, metric.margin)
            }
        }
    }

    fn has_usable_link(&self, ctx: &Context, candidate: &Candidate<'_>) -> bool {
        let Some(stats) = candidate.stats else {
            return false;
        };
        let max_abs_rssi = fixmath::from_int(self.config.max_abs_rssi);
        self.link_cost(ctx, candidate) <= self.config.max_link_cost
            && stats
                .rssi()
                .newest()
                .is_some_and(|s| s.rssi.saturating_abs() <= max_abs_rssi)
    }

    fn is_acceptable(&self, ctx: &Context, candidate: &Candidate<'_>) -> Option<bool> {
        let path_cost = self.path_cost(ctx, candidate);
        let Some(stats) = candidate.stats else {
            return Some(false);
        };
        let metric = stats.cached_metric();
        let hop_count = candidate.parent.hop_count() as u32;
        Some(
            path_cost as u32 <= self.config.path_cost_red as u32 * hop_count
                && metric.trend > fixmath::from_int(self.config.mf_lower)
                && metric.trend <= fixmath::from_int(self.config.mf_upper)
                && metric.margin > fixmath::from_int(self.config.rrssi_red),
        )
    }
}
