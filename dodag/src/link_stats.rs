//! Per neighbor link quality estimation.
//!
//! A [`LinkStats`] record tracks transmission outcomes (summarized as an ETX estimate), a short
//! history of locally observed signal strength samples, and a history of the signal strength the
//! neighbor reports for our own transmissions. Objective functions derive their link cost from
//! these records and cache the result in the record until new samples arrive.

use std::{cell::Cell, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::fixmath::{self, Fix};

/// Time after which link statistics are no longer considered fresh.
pub const FRESHNESS_EXPIRATION: Duration = Duration::from_secs(8 * 60);
/// Period at which the freshness counter of every record is halved.
pub const FRESHNESS_HALF_LIFE: Duration = Duration::from_secs(15 * 60);
/// Freshness counter value from which transmit statistics are considered fresh.
const FRESHNESS_TARGET: u8 = 4;
/// Upper bound of the freshness counter.
const FRESHNESS_MAX: u8 = 16;
/// Fixed point divisor of ETX values.
pub const ETX_DIVISOR: u16 = 128;
/// Extra transmissions accounted for a packet which was never acknowledged.
const ETX_NOACK_PENALTY: u16 = 12;
/// Initial ETX value, before being scaled by [`ETX_DIVISOR`].
const ETX_DEFAULT: u16 = 2;
/// Upper bound of an ETX estimated from signal strength, before being scaled by [`ETX_DIVISOR`].
const ETX_INIT_MAX: u16 = 3;
const EWMA_SCALE: u32 = 100;
const EWMA_ALPHA: u32 = 10;
/// Weight of new samples as long as the record is not fresh yet.
const EWMA_BOOTSTRAP_ALPHA: u32 = 25;
/// Time constant of the signal strength EMA, in seconds.
const EMA_TAU: i32 = 10;
const RSSI_HIGH: i32 = -60;
const RSSI_LOW: i32 = -90;
/// Amount of signal strength samples kept per history.
pub const HISTORY_LEN: usize = 3;
/// Amount of samples required before a signal strength trend is trusted.
pub const MIN_SAMPLE_COUNT: u8 = 2;
/// Amount of unanswered probes after which the probe recency window is widened.
const FAILED_PROBES_MAX: u8 = 2;
/// A new sample is always recorded if the previous one is at least this old.
const STATIC_DETECTION_TIME: Duration = Duration::from_secs(7);
/// Minimal signal strength change, in dBm, for a new sample to be recorded before
/// [`STATIC_DETECTION_TIME`] elapsed.
const STATIC_DETECTION_RSSI: Fix = Fix::from_bits(0x8000);

/// Mask of [`LinkStats`] update flags set by local receptions.
const UPDATED_LOCAL: u8 = 0x0f;
/// Mask of [`LinkStats`] update flags set by neighbor reports.
const UPDATED_REMOTE: u8 = 0xf0;

/// Outcome of a link layer transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxStatus {
    /// The packet was acknowledged.
    Ok,
    /// The packet was transmitted but never acknowledged.
    NoAck,
    /// The packet was dropped before transmission as the queue was full.
    QueueFull,
    /// The transmission collided.
    Collision,
    /// Any other transmission error.
    Error,
}

/// How a new signal strength sample is blended with the previous one.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RssiSmoothing {
    /// Fixed weight exponentially weighted moving average.
    #[default]
    Ewma,
    /// Exponential moving average weighted by the time elapsed since the previous sample.
    Ema,
}

/// A signal strength sample, in dBm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub rssi: Fix,
    pub at: Instant,
}

/// Newest first history of signal strength samples.
#[derive(Debug, Clone, Default)]
pub struct RssiHistory([Option<Sample>; HISTORY_LEN]);

impl RssiHistory {
    /// The most recent sample, if any.
    pub fn newest(&self) -> Option<Sample> {
        self.0[0]
    }

    /// The sample at position `idx`, 0 being the newest.
    pub fn get(&self, idx: usize) -> Option<Sample> {
        self.0.get(idx).copied().flatten()
    }

    /// Iterate over the known samples, newest first.
    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.0.iter().map_while(|s| *s)
    }

    /// Insert a new sample as the newest one, evicting the oldest sample.
    fn push(&mut self, sample: Sample) {
        self.0.rotate_right(1);
        self.0[0] = Some(sample);
    }

    /// Amount of known samples. If `fresh_only` is set, samples are only counted while they are
    /// younger than [`FRESHNESS_EXPIRATION`] times their position in the history (1 based).
    pub fn count(&self, now: Instant, fresh_only: bool) -> u8 {
        let mut count = self.iter().count() as u8;
        if fresh_only {
            for (idx, sample) in self.iter().enumerate() {
                if now.saturating_duration_since(sample.at) >= FRESHNESS_EXPIRATION * (idx as u32 + 1)
                {
                    count -= 1;
                }
            }
        }
        count
    }
}

/// Packet counters of a single link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    /// Transmission attempts of unicast packets.
    pub tx: u32,
    /// Acknowledged unicast packets.
    pub acked: u32,
    /// Received packets.
    pub rx: u32,
    /// Packets dropped before transmission because the queue was full.
    pub queue_drops: u32,
}

impl PacketCounters {
    fn accumulate(&mut self, other: &PacketCounters) {
        self.tx = self.tx.saturating_add(other.tx);
        self.acked = self.acked.saturating_add(other.acked);
        self.rx = self.rx.saturating_add(other.rx);
        self.queue_drops = self.queue_drops.saturating_add(other.queue_drops);
    }
}

/// Link metric computed by an objective function, cached in the [`LinkStats`] record until new
/// samples arrive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedMetric {
    /// Rate of change of the signal strength, as computed by the objective function.
    pub trend: Fix,
    /// Remaining signal strength margin before the link is considered lost.
    pub margin: Fix,
    /// Timestamp of the newest trend sample included in `trend`, if it was derived from a
    /// history.
    pub at: Option<Instant>,
}

impl Default for CachedMetric {
    fn default() -> Self {
        Self {
            trend: Fix::MIN,
            margin: Fix::ZERO,
            at: None,
        }
    }
}

/// Link statistics of a single neighbor.
#[derive(Debug, Clone)]
pub struct LinkStats {
    last_tx: Option<Instant>,
    last_probe: Option<Instant>,
    etx: u16,
    freshness: u8,
    failed_probes: u8,
    rssi: RssiHistory,
    remote_rssi: RssiHistory,
    updated: Cell<u8>,
    metric: Cell<CachedMetric>,
    period: PacketCounters,
    total: PacketCounters,
}

impl LinkStats {
    /// Create a new, empty `LinkStats` record.
    pub fn new() -> Self {
        Self {
            last_tx: None,
            last_probe: None,
            etx: 0,
            freshness: 0,
            failed_probes: 0,
            rssi: RssiHistory::default(),
            remote_rssi: RssiHistory::default(),
            updated: Cell::new(0xff),
            metric: Cell::new(CachedMetric::default()),
            period: PacketCounters::default(),
            total: PacketCounters::default(),
        }
    }

    /// The ETX estimate, scaled by [`ETX_DIVISOR`]. 0 if nothing was measured yet.
    pub const fn etx(&self) -> u16 {
        self.etx
    }

    /// The freshness counter.
    pub const fn freshness(&self) -> u8 {
        self.freshness
    }

    /// Time of the last transmission to this neighbor.
    pub const fn last_tx(&self) -> Option<Instant> {
        self.last_tx
    }

    /// Time of the last probe sent to this neighbor.
    pub const fn last_probe(&self) -> Option<Instant> {
        self.last_probe
    }

    /// Amount of probes sent since the last reception from this neighbor.
    pub const fn failed_probes(&self) -> u8 {
        self.failed_probes
    }

    /// Locally observed signal strength history.
    pub const fn rssi(&self) -> &RssiHistory {
        &self.rssi
    }

    /// Signal strength history reported by the neighbor.
    pub const fn remote_rssi(&self) -> &RssiHistory {
        &self.remote_rssi
    }

    /// Time of the most recent reception from this neighbor.
    pub fn last_rx(&self) -> Option<Instant> {
        self.rssi.newest().map(|s| s.at)
    }

    /// Checks if samples arrived since the objective function last cached its metric.
    pub fn is_updated(&self) -> bool {
        self.updated.get() != 0
    }

    /// The metric last cached by the objective function.
    pub fn cached_metric(&self) -> CachedMetric {
        self.metric.get()
    }

    /// Cache a freshly computed metric and clear the update flags.
    pub fn store_metric(&self, metric: CachedMetric) {
        self.metric.set(metric);
        self.updated.set(0);
    }

    /// Packet counters of the running period.
    pub const fn period_counters(&self) -> &PacketCounters {
        &self.period
    }

    /// Packet counters of all completed periods.
    pub const fn total_counters(&self) -> &PacketCounters {
        &self.total
    }

    /// Are the transmissions fresh?
    pub fn tx_fresh(&self, now: Instant, window: Duration) -> bool {
        self.last_tx
            .is_some_and(|t| now.saturating_duration_since(t) < window)
            && self.freshness >= FRESHNESS_TARGET
    }

    /// Are the receptions fresh?
    pub fn rx_fresh(&self, now: Instant, window: Duration) -> bool {
        self.last_rx()
            .is_some_and(|t| now.saturating_duration_since(t) < window)
    }

    /// Was the link probed within `window`?
    pub fn probed_within(&self, now: Instant, window: Duration) -> bool {
        self.last_probe
            .is_some_and(|t| now.saturating_duration_since(t) < window)
    }

    /// Was the link probed recently? The window widens once probes repeatedly go unanswered.
    pub fn recently_probed(&self, now: Instant) -> bool {
        if self.failed_probes > FAILED_PROBES_MAX {
            self.probed_within(now, FRESHNESS_EXPIRATION)
        } else {
            self.probed_within(now, FRESHNESS_EXPIRATION / 2)
        }
    }

    /// Checks if a probe was sent after the last reception, and recently.
    pub fn already_probed(&self, now: Instant) -> bool {
        let probe_after_rx = match (self.last_probe, self.last_rx()) {
            (Some(probe), Some(rx)) => probe > rx,
            (Some(_), None) => true,
            (None, _) => false,
        };
        probe_after_rx && self.recently_probed(now)
    }

    /// Freshness used for the preferred parent when choosing probe targets.
    pub fn preferred_rx_fresh(&self, now: Instant) -> bool {
        self.rx_fresh(now, FRESHNESS_EXPIRATION / 2)
            || self.probed_within(now, FRESHNESS_EXPIRATION / 4)
    }

    /// Time elapsed since the last reception or probe, whichever is most recent.
    pub fn age(&self, now: Instant) -> Duration {
        match self.last_rx().max(self.last_probe) {
            Some(t) => now.saturating_duration_since(t),
            None => Duration::MAX,
        }
    }

    /// Record the outcome of a transmission of `attempts` link layer frames.
    pub(crate) fn record_transmit(&mut self, now: Instant, status: TxStatus, attempts: u8) {
        match status {
            TxStatus::Ok | TxStatus::NoAck => {}
            TxStatus::QueueFull => {
                self.period.queue_drops = self.period.queue_drops.saturating_add(1);
                return;
            }
            // Collisions and errors are not a property of the link.
            TxStatus::Collision | TxStatus::Error => return,
        }

        self.last_tx = Some(now);
        self.freshness = self.freshness.saturating_add(attempts).min(FRESHNESS_MAX);
        self.period.tx = self.period.tx.saturating_add(attempts as u32);

        let mut attempts = attempts as u16;
        if status == TxStatus::Ok {
            self.period.acked = self.period.acked.saturating_add(1);
        } else {
            attempts += ETX_NOACK_PENALTY;
        }

        let packet_etx = attempts * ETX_DIVISOR;
        let alpha = if self.tx_fresh(now, FRESHNESS_EXPIRATION) {
            EWMA_ALPHA
        } else {
            EWMA_BOOTSTRAP_ALPHA
        };
        self.etx = if self.etx == 0 {
            packet_etx
        } else {
            ((self.etx as u32 * (EWMA_SCALE - alpha) + packet_etx as u32 * alpha) / EWMA_SCALE)
                as u16
        };
    }

    /// Record a reception with the given signal strength, in dBm.
    pub(crate) fn record_receive(&mut self, now: Instant, rssi: i16, smoothing: RssiSmoothing) {
        let rssi = fixmath::from_int(rssi as i32);
        match self.rssi.newest() {
            None => self.rssi.push(Sample { rssi, at: now }),
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev.at);
                let smoothed = match smoothing {
                    RssiSmoothing::Ema => {
                        let dt = fixmath::seconds(elapsed);
                        let tau = fixmath::from_int(EMA_TAU);
                        if dt <= tau.saturating_mul_int(5) {
                            fixmath::ema(prev.rssi, rssi, dt, tau)
                        } else {
                            rssi
                        }
                    }
                    RssiSmoothing::Ewma => fixmath::div(
                        prev.rssi
                            .saturating_mul_int((EWMA_SCALE - EWMA_ALPHA) as i32)
                            .saturating_add(rssi.saturating_mul_int(EWMA_ALPHA as i32)),
                        fixmath::from_int(EWMA_SCALE as i32),
                    ),
                };
                if elapsed >= STATIC_DETECTION_TIME
                    || smoothed.saturating_sub(prev.rssi).saturating_abs() >= STATIC_DETECTION_RSSI
                {
                    self.rssi.push(Sample {
                        rssi: smoothed,
                        at: now,
                    });
                }
            }
        }

        self.updated.set(self.updated.get() | UPDATED_LOCAL);
        self.failed_probes = 0;
        if self.etx == 0 {
            self.etx = self.guess_etx_from_rssi();
        }
        self.period.rx = self.period.rx.saturating_add(1);
    }

    /// Record the signal strength a neighbor reported for our transmissions, measured `age` ago.
    pub(crate) fn record_remote_signal(&mut self, now: Instant, rssi: i16, age: Duration) {
        let rssi = fixmath::from_int(rssi as i32);
        let at = now.checked_sub(age).unwrap_or(now);
        if let Some(newest) = self.remote_rssi.newest() {
            let drift = if at > newest.at {
                at - newest.at
            } else {
                newest.at - at
            };
            if newest.rssi == rssi && drift < Duration::from_secs(1) {
                return;
            }
        }
        self.remote_rssi.push(Sample { rssi, at });
        self.updated.set(self.updated.get() | UPDATED_REMOTE);
    }

    /// Record that a probe was sent to this neighbor. Counts as a failed probe until a reception
    /// clears it.
    pub(crate) fn record_probe(&mut self, at: Instant) {
        self.last_probe = Some(at);
        self.failed_probes = self.failed_probes.saturating_add(1);
    }

    /// Halve the freshness counter and close the packet counter period, returning the counters
    /// of the closed period.
    pub(crate) fn decay(&mut self) -> PacketCounters {
        self.freshness >>= 1;
        let period = std::mem::take(&mut self.period);
        self.total.accumulate(&period);
        period
    }

    /// Initial ETX of a link from its signal strength.
    fn guess_etx_from_rssi(&self) -> u16 {
        match self.rssi.newest() {
            None => ETX_DEFAULT * ETX_DIVISOR,
            Some(sample) => {
                let diff = RSSI_HIGH - RSSI_LOW;
                let delta = (fixmath::to_int(sample.rssi) - RSSI_LOW).clamp(0, diff);
                let penalty = (ETX_DIVISOR as i32 * delta / diff) as u16;
                (ETX_DIVISOR * ETX_DEFAULT + penalty).min(ETX_INIT_MAX * ETX_DIVISOR)
            }
        }
    }
}

impl Default for LinkStats {
    fn default() -> Self {
        Self::new()
    }
}
