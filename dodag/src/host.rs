//! Interfaces the engine uses to act on its environment.
//!
//! The engine is a passive state machine: the host delivers received control messages, link layer
//! feedback and timer expiries to it, and the engine uses the traits in this module to read the
//! clock, arm timers, install routes and transmit control messages.

use std::{net::Ipv6Addr, time::Duration};

use tokio::time::Instant;

use crate::{
    addr::LinkAddr,
    message::{DaoMessage, DioMessage, PrefixInfo, Probe},
    timer::TimerId,
};

/// Source of the current time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Runs timers on behalf of the engine, calling
/// [`Engine::handle_timer`](crate::Engine::handle_timer) when they expire.
pub trait TimerService {
    /// Arm `timer` to expire after `delay`, replacing any pending expiry of the same timer.
    fn schedule(&mut self, timer: TimerId, delay: Duration);

    /// Cancel `timer` if it is pending.
    fn cancel(&mut self, timer: TimerId);
}

/// Which routes to withdraw from the route store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Withdraw {
    /// All downward routes learned in the DAG with the given id.
    Dag(Ipv6Addr),
    /// All routes using the given next hop.
    NextHop(LinkAddr),
}

/// Routing table and interface address management of the host.
pub trait RouteStore {
    /// Install (or refresh) the default route of an instance through `via`. A `lifetime` of
    /// `None` never expires.
    fn set_default_route(&mut self, instance: u8, via: LinkAddr, lifetime: Option<Duration>);

    /// Remove the default route of an instance.
    fn clear_default_route(&mut self, instance: u8);

    fn withdraw_routes(&mut self, which: Withdraw);

    /// Checks if any downward route uses `via` as next hop.
    fn is_next_hop(&self, via: LinkAddr) -> bool;

    /// Remove expired downward routes.
    fn purge_expired(&mut self);

    /// Configure an address in an autonomous prefix.
    fn add_address(&mut self, prefix: &PrefixInfo);

    /// Remove the address previously configured for `prefix`.
    fn remove_address(&mut self, prefix: &PrefixInfo);
}

/// Transmits control messages. Delivery is best effort.
pub trait Transmitter {
    /// Send a DIO, multicast if `to` is `None`.
    fn send_dio(&mut self, to: Option<LinkAddr>, dio: &DioMessage);

    fn send_dao(&mut self, to: LinkAddr, dao: &DaoMessage);

    /// Send a DIS, multicast if `to` is `None`.
    fn send_dis(&mut self, to: Option<LinkAddr>);

    /// Send a link probe to `to`.
    fn send_probe(&mut self, to: LinkAddr, probe: &Probe);
}

/// Everything the engine needs from its host.
pub trait Host: Clock + TimerService + RouteStore + Transmitter {}

impl<T> Host for T where T: Clock + TimerService + RouteStore + Transmitter {}
