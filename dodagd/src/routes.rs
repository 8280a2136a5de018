//! Routing state of a simulated node: the default route of every instance, downward routes
//! registered by children and autoconfigured addresses.

use std::{collections::HashMap, net::Ipv6Addr, time::Duration};

use ahash::RandomState;
use dodag::{LinkAddr, PrefixInfo, Withdraw};
use ipnet::Ipv6Net;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct DefaultRoute {
    pub via: LinkAddr,
    pub expires: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
pub struct DownwardRoute {
    pub dag_id: Ipv6Addr,
    pub via: LinkAddr,
    pub expires: Option<Instant>,
}

/// A downward route, for reports.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub target: LinkAddr,
    pub via: LinkAddr,
    /// Seconds until the route expires, `None` if it never does.
    pub expires_in: Option<u64>,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    default_routes: HashMap<u8, DefaultRoute, RandomState>,
    downward: HashMap<LinkAddr, DownwardRoute, RandomState>,
    addresses: Vec<Ipv6Net>,
    /// Interface identifier used to autoconfigure addresses.
    iid: u64,
}

impl RouteTable {
    pub fn new(addr: LinkAddr) -> Self {
        Self {
            iid: u64::from_be_bytes(*addr.as_bytes()),
            ..Self::default()
        }
    }

    pub fn set_default(&mut self, instance: u8, via: LinkAddr, lifetime: Option<Duration>, now: Instant) {
        self.default_routes.insert(
            instance,
            DefaultRoute {
                via,
                expires: lifetime.map(|l| now + l),
            },
        );
    }

    pub fn clear_default(&mut self, instance: u8) {
        self.default_routes.remove(&instance);
    }

    pub fn default_route(&self, instance: u8) -> Option<&DefaultRoute> {
        self.default_routes.get(&instance)
    }

    /// Install or refresh the downward route to `target`.
    pub fn install(&mut self, target: LinkAddr, route: DownwardRoute) {
        debug!(%target, via = %route.via, "Installing downward route");
        self.downward.insert(target, route);
    }

    pub fn remove(&mut self, target: LinkAddr) {
        if self.downward.remove(&target).is_some() {
            debug!(%target, "Removed downward route");
        }
    }

    pub fn withdraw(&mut self, which: Withdraw) {
        let before = self.downward.len();
        match which {
            Withdraw::Dag(dag_id) => self.downward.retain(|_, r| r.dag_id != dag_id),
            Withdraw::NextHop(via) => self.downward.retain(|_, r| r.via != via),
        }
        debug!(?which, removed = before - self.downward.len(), "Withdrew routes");
    }

    pub fn is_next_hop(&self, via: LinkAddr) -> bool {
        self.downward.values().any(|r| r.via == via)
    }

    /// Drop every expired downward and default route.
    pub fn purge(&mut self, now: Instant) {
        let live = |expires: Option<Instant>| expires.map_or(true, |at| at > now);
        self.downward.retain(|_, r| live(r.expires));
        self.default_routes.retain(|_, r| live(r.expires));
    }

    pub fn downward_routes(&self, now: Instant) -> Vec<RouteInfo> {
        let mut routes: Vec<_> = self
            .downward
            .iter()
            .map(|(target, r)| RouteInfo {
                target: *target,
                via: r.via,
                expires_in: r
                    .expires
                    .map(|at| at.saturating_duration_since(now).as_secs()),
            })
            .collect();
        routes.sort_by_key(|r| r.target);
        routes
    }

    /// Configure the address of this node in `prefix`. Only /64 and shorter prefixes leave room
    /// for the interface identifier.
    pub fn add_address(&mut self, prefix: &PrefixInfo) {
        let net = prefix.prefix.trunc();
        if net.prefix_len() > 64 {
            debug!(prefix = %net, "Prefix too long to autoconfigure an address");
            return;
        }
        let addr = Ipv6Addr::from(u128::from(net.network()) | self.iid as u128);
        let Ok(addr) = Ipv6Net::new(addr, net.prefix_len()) else {
            return;
        };
        if !self.addresses.contains(&addr) {
            debug!(%addr, "Configured address");
            self.addresses.push(addr);
        }
    }

    pub fn remove_address(&mut self, prefix: &PrefixInfo) {
        let net = prefix.prefix.trunc();
        self.addresses.retain(|addr| addr.trunc() != net);
    }

    pub fn addresses(&self) -> &[Ipv6Net] {
        &self.addresses
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv6Addr, time::Duration};

    use dodag::{PrefixInfo, Withdraw};
    use tokio::time::Instant;

    use super::{DownwardRoute, RouteTable};

    fn route(dag: u16, via: u64, expires: Option<Instant>) -> DownwardRoute {
        DownwardRoute {
            dag_id: Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, dag),
            via: via.into(),
            expires,
        }
    }

    #[test]
    fn withdraw_by_next_hop_and_dag() {
        let mut table = RouteTable::new(1.into());
        table.install(2.into(), route(1, 2, None));
        table.install(3.into(), route(1, 2, None));
        table.install(4.into(), route(2, 4, None));
        assert!(table.is_next_hop(2.into()));

        table.withdraw(Withdraw::NextHop(2.into()));
        assert!(!table.is_next_hop(2.into()));
        assert_eq!(table.downward_routes(Instant::now()).len(), 1);

        table.withdraw(Withdraw::Dag(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2)));
        assert!(table.downward_routes(Instant::now()).is_empty());
    }

    #[test]
    fn purge_drops_expired_routes_only() {
        let now = Instant::now();
        let mut table = RouteTable::new(1.into());
        table.install(2.into(), route(1, 2, Some(now + Duration::from_secs(10))));
        table.install(3.into(), route(1, 3, None));
        table.set_default(1, 2.into(), Some(Duration::from_secs(5)), now);

        table.purge(now + Duration::from_secs(6));
        assert!(table.default_route(1).is_none());
        assert_eq!(table.downward_routes(now).len(), 2);

        table.purge(now + Duration::from_secs(11));
        let left = table.downward_routes(now);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].target, 3.into());
    }

    #[test]
    fn address_from_prefix_and_link_address() {
        let mut table = RouteTable::new(0x0212_4b00_0000_0007.into());
        let prefix = PrefixInfo {
            prefix: "fd00:1::/64".parse().unwrap(),
            autonomous: true,
            lifetime: u32::MAX,
        };
        table.add_address(&prefix);
        table.add_address(&prefix);
        assert_eq!(table.addresses().len(), 1);
        assert_eq!(
            table.addresses()[0].addr(),
            "fd00:1::212:4b00:0:7".parse::<Ipv6Addr>().unwrap()
        );

        table.remove_address(&prefix);
        assert!(table.addresses().is_empty());
    }
}
