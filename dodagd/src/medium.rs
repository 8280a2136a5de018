//! An in-process radio medium. Frames travel over the links of the topology, each link losing
//! frames with its own probability and drifting in signal strength over time.

use std::{collections::HashMap, time::Duration};

use ahash::RandomState;
use dodag::{DaoAckStatus, DaoMessage, DioMessage, LinkAddr, Lollipop};
use rand::Rng;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::Instant,
};
use tracing::trace;

use crate::topology::{SimConfig, TopologyError};

/// Weakest signal strength a link can drift to, in dBm.
const RSSI_FLOOR: f32 = -120.0;
/// Strongest signal strength a link can drift to, in dBm.
const RSSI_CEILING: f32 = -10.0;

/// A control message on the air.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Dio(DioMessage),
    Dis,
    Dao(DaoMessage),
    DaoAck {
        instance_id: u8,
        sequence: Lollipop,
        status: DaoAckStatus,
    },
}

/// A frame as received by a node.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: LinkAddr,
    /// Signal strength of the frame, in dBm.
    pub rssi: i16,
    pub multicast: bool,
    pub frame: Frame,
}

/// Link layer outcome of a unicast transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxResult {
    /// Acknowledged after the given amount of attempts.
    Acked(u8),
    /// Never acknowledged. The frame might still have arrived.
    NotAcked(u8),
}

#[derive(Debug, Clone)]
struct Link {
    rssi: i16,
    delivery: f64,
    drift: f32,
}

impl Link {
    fn rssi_at(&self, elapsed: Duration) -> i16 {
        (self.rssi as f32 + self.drift * elapsed.as_secs_f32())
            .clamp(RSSI_FLOOR, RSSI_CEILING)
            .round() as i16
    }
}

pub struct Medium {
    /// Directed links, keyed by (sender, receiver).
    links: HashMap<(LinkAddr, LinkAddr), Link, RandomState>,
    neighbors: HashMap<LinkAddr, Vec<LinkAddr>, RandomState>,
    inboxes: HashMap<LinkAddr, UnboundedSender<Delivery>, RandomState>,
    start: Instant,
    sensitivity: i16,
    max_attempts: u8,
}

/// Receiving ends of the node inboxes, by link address.
pub type Inboxes = HashMap<LinkAddr, UnboundedReceiver<Delivery>, RandomState>;

impl Medium {
    /// Build the medium of a validated topology, returning the inbox of every node.
    pub fn new(config: &SimConfig) -> Result<(Self, Inboxes), TopologyError> {
        config.validate()?;

        let mut inboxes = HashMap::default();
        let mut receivers = Inboxes::default();
        for node in &config.nodes {
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.insert(node.addr, tx);
            receivers.insert(node.addr, rx);
        }

        let mut links = HashMap::default();
        let mut neighbors: HashMap<LinkAddr, Vec<LinkAddr>, RandomState> = HashMap::default();
        for link in &config.links {
            let a = config
                .addr_of(&link.a)
                .ok_or_else(|| TopologyError::UnknownNode(link.a.clone()))?;
            let b = config
                .addr_of(&link.b)
                .ok_or_else(|| TopologyError::UnknownNode(link.b.clone()))?;
            let state = Link {
                rssi: link.rssi,
                delivery: link.delivery,
                drift: link.drift,
            };
            for (from, to) in [(a, b), (b, a)] {
                if links.insert((from, to), state.clone()).is_none() {
                    neighbors.entry(from).or_default().push(to);
                }
            }
        }

        Ok((
            Self {
                links,
                neighbors,
                inboxes,
                start: Instant::now(),
                sensitivity: config.sensitivity,
                max_attempts: config.max_attempts.max(1),
            },
            receivers,
        ))
    }

    /// Current signal strength of the link from `from` to `to`, if they are linked.
    pub fn rssi(&self, from: LinkAddr, to: LinkAddr, now: Instant) -> Option<i16> {
        self.links
            .get(&(from, to))
            .map(|link| link.rssi_at(now.saturating_duration_since(self.start)))
    }

    /// Send `frame` to every neighbor of `from`, without acknowledgement. Returns how many
    /// neighbors received it.
    pub fn broadcast<R: Rng>(&self, from: LinkAddr, frame: &Frame, now: Instant, rng: &mut R) -> usize {
        let Some(neighbors) = self.neighbors.get(&from) else {
            return 0;
        };
        let mut received = 0;
        for &to in neighbors {
            if let Some(rssi) = self.attempt(from, to, now, rng) {
                self.deliver(to, from, rssi, true, frame.clone());
                received += 1;
            }
        }
        trace!(%from, received, "Broadcast frame");
        received
    }

    /// Send `frame` to `to`, retransmitting until it is acknowledged or the attempts run out. The
    /// receiver gets the frame at most once.
    pub fn unicast<R: Rng>(
        &self,
        from: LinkAddr,
        to: LinkAddr,
        frame: &Frame,
        now: Instant,
        rng: &mut R,
    ) -> TxResult {
        let mut delivered = false;
        for attempt in 1..=self.max_attempts {
            let Some(rssi) = self.attempt(from, to, now, rng) else {
                continue;
            };
            if !delivered {
                self.deliver(to, from, rssi, false, frame.clone());
                delivered = true;
            }
            if self.attempt(to, from, now, rng).is_some() {
                return TxResult::Acked(attempt);
            }
        }
        TxResult::NotAcked(self.max_attempts)
    }

    /// One frame over the link from `from` to `to`: the signal strength it arrived with, or
    /// `None` if it was lost.
    fn attempt<R: Rng>(&self, from: LinkAddr, to: LinkAddr, now: Instant, rng: &mut R) -> Option<i16> {
        let link = self.links.get(&(from, to))?;
        let rssi = link.rssi_at(now.saturating_duration_since(self.start));
        (rssi >= self.sensitivity && rng.random_bool(link.delivery)).then_some(rssi)
    }

    fn deliver(&self, to: LinkAddr, from: LinkAddr, rssi: i16, multicast: bool, frame: Frame) {
        if let Some(inbox) = self.inboxes.get(&to) {
            // The receiver is gone once the simulation stops.
            let _ = inbox.send(Delivery {
                from,
                rssi,
                multicast,
                frame,
            });
        }
    }
}
