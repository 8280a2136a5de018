//! Smoothed signal strength velocity objective function.
//!
//! Link cost is derived from the smoothed rate of change of the signal strength of a link (SSV),
//! blending local samples and the samples a neighbor reports about our own transmissions, and
//! from the remaining signal strength margin (SSR). An acceptable preferred parent is kept without
//! comparing it to the other candidates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

use super::{clamp_cost, Candidate, Context, Freshness, ObjectiveFunction, Ocp, MAX_COST, PMAOF};
use crate::{
    fixmath::{self, Fix},
    link_stats::{CachedMetric, LinkStats, Sample, FRESHNESS_EXPIRATION},
    metric_container::McType,
};

/// Tunables of [`HysteresisOf`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    /// Scale of signal strength derivatives.
    pub scale: u16,
    /// Weight of the SSV in the link cost.
    pub alpha: f32,
    /// Weight of the missing SSR in the link cost.
    pub beta: f32,
    /// Weakest usable signal strength, in absolute dBm.
    pub max_abs_rssi: i32,
    /// Signal strength, in absolute dBm, from which the SSR is 0.
    pub abs_rssi_red: i32,
    pub path_cost_red: u16,
    pub ssv_lower: i32,
    pub ssv_upper: i32,
    pub ssr_red: i32,
    /// SSV assumed when no derivative can be computed.
    pub single_sample_ssv: i32,
    /// Time constant of the SSV smoothing, in seconds.
    pub tau_secs: u64,
    pub max_link_cost: u16,
    pub switch_threshold: u16,
    pub max_path_cost: u16,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            scale: 100,
            alpha: 6.0,
            beta: 4.0,
            max_abs_rssi: 100,
            abs_rssi_red: 87,
            path_cost_red: 2000,
            ssv_lower: -100,
            ssv_upper: 200,
            ssr_red: 87,
            single_sample_ssv: -100,
            tau_secs: FRESHNESS_EXPIRATION.as_secs(),
            max_link_cost: 2000,
            switch_threshold: 100,
            max_path_cost: 32000,
        }
    }
}

#[derive(Debug)]
pub struct HysteresisOf {
    config: HysteresisConfig,
}

impl HysteresisOf {
    pub fn new(config: HysteresisConfig) -> Self {
        Self { config }
    }

    fn cost(&self, ssv: Fix, ssr: Fix) -> u16 {
        let alpha = fixmath::from_f32(self.config.alpha).saturating_mul(ssv.saturating_abs());
        let beta = fixmath::from_f32(self.config.beta).saturating_mul(
            fixmath::from_int(4 * self.config.abs_rssi_red).saturating_sub(ssr),
        );
        clamp_cost(fixmath::to_int(alpha.saturating_add(beta)))
    }

    fn derivative(&self, newer: Sample, older: Sample) -> Fix {
        let scale = self.config.scale as i32;
        fixmath::div(
            newer
                .rssi
                .saturating_mul_int(scale)
                .saturating_sub(older.rssi.saturating_mul_int(scale)),
            fixmath::seconds(newer.at.saturating_duration_since(older.at)),
        )
    }

    /// Remaining signal strength margin.
    fn ssr(&self, last: Fix, ssv: Fix) -> Fix {
        let red = fixmath::from_int(self.config.abs_rssi_red);
        if last.saturating_abs() > red {
            Fix::ZERO
        } else if ssv < Fix::ZERO {
            red.saturating_add(last)
        } else {
            red.saturating_add(last.saturating_abs())
        }
    }

    /// Derivatives of consecutive samples of a history, stamped with the midpoint of the two
    /// samples. Only derivatives newer than `since` are returned.
    fn new_derivatives(
        &self,
        samples: &[Sample],
        since: Option<Instant>,
        out: &mut Vec<(Instant, Fix)>,
    ) {
        for w in samples.windows(2) {
            let (newer, older) = (w[0], w[1]);
            let midpoint = older.at + newer.at.saturating_duration_since(older.at) / 2;
            if since.is_some_and(|since| midpoint <= since) {
                break;
            }
            out.push((midpoint, self.derivative(newer, older)));
        }
    }

    fn derive(&self, stats: &LinkStats) -> Option<CachedMetric> {
        let local: Vec<Sample> = stats.rssi().iter().collect();
        let remote: Vec<Sample> = stats.remote_rssi().iter().collect();
        let cached = stats.cached_metric();

        match (local.len(), remote.len()) {
            (0, 0) => None,
            (l, r) if l > 1 || r > 1 => {
                let mut derivatives = Vec::with_capacity(l + r);
                self.new_derivatives(&local, cached.at, &mut derivatives);
                self.new_derivatives(&remote, cached.at, &mut derivatives);
                if derivatives.is_empty() {
                    // Nothing newer than the cached value.
                    return Some(cached);
                }
                derivatives.sort_by(|a, b| b.0.cmp(&a.0));

                let tau = fixmath::seconds(Duration::from_secs(self.config.tau_secs));
                let horizon = tau.saturating_mul_int(5);
                let oldest = derivatives.len() - 1;
                if let Some(at) = cached.at {
                    let dt = fixmath::seconds(derivatives[oldest].0.saturating_duration_since(at));
                    if dt <= horizon {
                        derivatives[oldest].1 =
                            fixmath::ema(cached.trend, derivatives[oldest].1, dt, tau);
                    }
                }
                for i in (0..oldest).rev() {
                    let dt = fixmath::seconds(
                        derivatives[i]
                            .0
                            .saturating_duration_since(derivatives[i + 1].0),
                    );
                    if dt <= horizon {
                        derivatives[i].1 =
                            fixmath::ema(derivatives[i + 1].1, derivatives[i].1, dt, tau);
                    }
                }

                let (at, ssv) = derivatives[0];
                let last = local.first().or(remote.first())?;
                Some(CachedMetric {
                    trend: ssv,
                    margin: self.ssr(last.rssi, ssv),
                    at: Some(at),
                })
            }
            (1, 1) => {
                let (l, r) = (local[0], remote[0]);
                let ssv = if r.at > l.at {
                    self.derivative(r, l)
                } else {
                    self.derivative(l, r)
                };
                Some(CachedMetric {
                    trend: ssv,
                    margin: self.ssr(l.rssi, ssv),
                    at: None,
                })
            }
            _ => {
                let newest = match (local.first(), remote.first()) {
                    (Some(l), Some(r)) if r.at > l.at => r,
                    (Some(l), _) => l,
                    (None, r) => r?,
                };
                Some(CachedMetric {
                    trend: fixmath::from_int(self.config.single_sample_ssv),
                    margin: self.ssr(newest.rssi, Fix::MIN),
                    at: None,
                })
            }
        }
    }
}

impl ObjectiveFunction for HysteresisOf {
    fn ocp(&self) -> Ocp {
        PMAOF
    }

    fn name(&self) -> &'static str {
        "pmaof"
    }

    fn natural_metric_container(&self) -> McType {
        McType::Ssv
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

    fn keeps_acceptable_preferred(&self) -> bool {
        true
    }

    fn link_cost(&self, _: &Context, candidate: &Candidate<'_>) -> u16 {
        let Some(stats) = candidate.stats else {
            return MAX_COST;
        };
        if stats.is_updated() {
            if let Some(metric) = self.derive(stats) {
                trace!(
                    neighbor = %candidate.addr,
                    ssv = %metric.trend,
                    ssr = %metric.margin,
                    "Updated signal strength velocity"
                );
                stats.store_metric(metric);
            }
        }
        let metric = stats.cached_metric();
        self.cost(metric.trend, metric.margin)
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
                && metric.trend > fixmath::from_int(self.config.ssv_lower)
                && metric.trend <= fixmath::from_int(self.config.ssv_upper)
                && metric.margin > fixmath::from_int(self.config.ssr_red),
        )
    }
}
