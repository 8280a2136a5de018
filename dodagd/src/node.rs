//! A simulated node: one routing engine, the host it acts through, and the task driving both.

use std::{collections::HashMap, collections::VecDeque, sync::Arc, time::Duration};

use ahash::RandomState;
use dodag::{
    Clock, DaoAckStatus, DaoMessage, DioMessage, Engine, LinkAddr, Metrics, PrefixInfo, Probe,
    RouteStore, TimerId, TimerService, Transmitter, TxStatus, Withdraw,
};
use futures::StreamExt;
use rand::rngs::StdRng;
use tokio::{sync::mpsc::UnboundedReceiver, time::Instant};
use tokio_util::{
    sync::CancellationToken,
    time::{delay_queue, DelayQueue},
};
use tracing::{debug, info, warn};

use crate::{
    medium::{Delivery, Frame, Medium, TxResult},
    report::NodeReport,
    routes::{DownwardRoute, RouteTable},
    topology::NodeConfig,
};

/// Reject code sent when a DAO arrives for a DAG this node does not route in.
const REJECT_NOT_JOINED: u8 = 1;

/// The environment of one engine: timers on a [`DelayQueue`], a route table and the frames
/// waiting to be put on the medium.
pub struct SimHost {
    timers: DelayQueue<TimerId>,
    keys: HashMap<TimerId, delay_queue::Key, RandomState>,
    /// Frames to transmit, multicast if there is no destination.
    outbox: VecDeque<(Option<LinkAddr>, Frame)>,
    routes: RouteTable,
}

impl SimHost {
    pub fn new(addr: LinkAddr) -> Self {
        Self {
            timers: DelayQueue::new(),
            keys: HashMap::default(),
            outbox: VecDeque::new(),
            routes: RouteTable::new(addr),
        }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

impl Clock for SimHost {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl TimerService for SimHost {
    fn schedule(&mut self, timer: TimerId, delay: Duration) {
        match self.keys.get(&timer) {
            Some(key) => self.timers.reset(key, delay),
            None => {
                let key = self.timers.insert(timer, delay);
                self.keys.insert(timer, key);
            }
        }
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(key) = self.keys.remove(&timer) {
            self.timers.remove(&key);
        }
    }
}

impl RouteStore for SimHost {
    fn set_default_route(&mut self, instance: u8, via: LinkAddr, lifetime: Option<Duration>) {
        self.routes.set_default(instance, via, lifetime, Instant::now());
    }

    fn clear_default_route(&mut self, instance: u8) {
        self.routes.clear_default(instance);
    }

    fn withdraw_routes(&mut self, which: Withdraw) {
        self.routes.withdraw(which);
    }

    fn is_next_hop(&self, via: LinkAddr) -> bool {
        self.routes.is_next_hop(via)
    }

    fn purge_expired(&mut self) {
        self.routes.purge(Instant::now());
    }

    fn add_address(&mut self, prefix: &PrefixInfo) {
        self.routes.add_address(prefix);
    }

    fn remove_address(&mut self, prefix: &PrefixInfo) {
        self.routes.remove_address(prefix);
    }
}

impl Transmitter for SimHost {
    fn send_dio(&mut self, to: Option<LinkAddr>, dio: &DioMessage) {
        self.outbox.push_back((to, Frame::Dio(dio.clone())));
    }

    fn send_dao(&mut self, to: LinkAddr, dao: &DaoMessage) {
        self.outbox.push_back((Some(to), Frame::Dao(dao.clone())));
    }

    fn send_dis(&mut self, to: Option<LinkAddr>) {
        self.outbox.push_back((to, Frame::Dis));
    }

    fn send_probe(&mut self, to: LinkAddr, probe: &Probe) {
        let frame = match probe {
            Probe::Dio(dio) => Frame::Dio(dio.clone()),
            Probe::Dis => Frame::Dis,
        };
        self.outbox.push_back((Some(to), frame));
    }
}

pub struct Node<M> {
    config: NodeConfig,
    engine: Engine<M>,
    host: SimHost,
    medium: Arc<Medium>,
    inbox: UnboundedReceiver<Delivery>,
    /// Draws frame losses on the medium.
    rng: StdRng,
}

impl<M> Node<M>
where
    M: Metrics + Send + 'static,
{
    pub fn new(
        config: NodeConfig,
        engine: Engine<M>,
        medium: Arc<Medium>,
        inbox: UnboundedReceiver<Delivery>,
        rng: StdRng,
    ) -> Self {
        Self {
            host: SimHost::new(config.addr),
            config,
            engine,
            medium,
            inbox,
            rng,
        }
    }

    /// Run the node until `cancel` fires, then report its final state.
    pub async fn run(mut self, cancel: CancellationToken) -> NodeReport {
        tokio::select! {
            _ = cancel.cancelled() => return self.report(),
            _ = tokio::time::sleep(self.config.start_delay()) => {}
        }
        // Frames which arrived while switched off were never heard.
        while self.inbox.try_recv().is_ok() {}
        self.boot();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(delivery) = self.inbox.recv() => self.receive(delivery),
                Some(expired) = self.host.timers.next(), if !self.host.timers.is_empty() => {
                    let timer = expired.into_inner();
                    self.host.keys.remove(&timer);
                    self.engine.handle_timer(&mut self.host, timer);
                }
            }
            self.flush();
        }

        self.report()
    }

    fn boot(&mut self) {
        info!(node = %self.config.name, addr = %self.config.addr, "Node switched on");
        self.engine.start(&mut self.host);
        if self.config.root {
            let dag_id = self.config.dag_id();
            if let Err(e) = self.engine.set_root(&mut self.host, dag_id) {
                warn!(node = %self.config.name, err = %e, "Could not become root");
            } else if let Some(prefix) = self.config.prefix {
                let instance = self.engine.config().instance_id;
                if let Err(e) = self.engine.set_prefix(
                    &mut self.host,
                    instance,
                    prefix.addr(),
                    prefix.prefix_len(),
                ) {
                    warn!(node = %self.config.name, err = %e, "Could not announce prefix");
                }
            }
        }
        self.flush();
    }

    fn receive(&mut self, delivery: Delivery) {
        let Delivery {
            from,
            rssi,
            multicast,
            frame,
        } = delivery;
        self.engine.link_received(&mut self.host, from, rssi);
        match frame {
            Frame::Dio(dio) => self.engine.process_dio(&mut self.host, from, &dio),
            Frame::Dis => self.engine.process_dis(&mut self.host, from, multicast),
            Frame::Dao(dao) => self.accept_dao(from, &dao),
            Frame::DaoAck {
                instance_id,
                sequence,
                status,
            } => self
                .engine
                .process_dao_ack(&mut self.host, from, instance_id, sequence, status),
        }
    }

    /// Register the downward route to a child, acknowledging the registration.
    fn accept_dao(&mut self, from: LinkAddr, dao: &DaoMessage) {
        let now = Instant::now();
        let routing = self.engine.instance(dao.instance_id).and_then(|inst| {
            let dag = inst.current_dag()?;
            (inst.mop().is_storing() && dag.joined() && dag.id() == dao.dag_id)
                .then(|| inst.route_lifetime(dao.lifetime))
        });

        let status = match routing {
            Some(_) if dao.lifetime == 0 => {
                self.host.routes.remove(from);
                return;
            }
            Some(lifetime) => {
                self.host.routes.install(
                    from,
                    DownwardRoute {
                        dag_id: dao.dag_id,
                        via: from,
                        expires: lifetime.map(|l| now + l),
                    },
                );
                DaoAckStatus::Accept
            }
            None => {
                debug!(node = %self.config.name, child = %from, "Rejecting DAO outside of our DAG");
                DaoAckStatus::UnableToAccept(REJECT_NOT_JOINED)
            }
        };
        self.host.outbox.push_back((
            Some(from),
            Frame::DaoAck {
                instance_id: dao.instance_id,
                sequence: dao.sequence,
                status,
            },
        ));
    }

    /// Put every queued frame on the medium, feeding the link layer outcome back to the engine.
    fn flush(&mut self) {
        let addr = self.config.addr;
        while let Some((to, frame)) = self.host.outbox.pop_front() {
            let now = Instant::now();
            let Some(to) = to else {
                self.medium.broadcast(addr, &frame, now, &mut self.rng);
                continue;
            };
            let (status, attempts) = match self.medium.unicast(addr, to, &frame, now, &mut self.rng) {
                TxResult::Acked(attempts) => (TxStatus::Ok, attempts),
                TxResult::NotAcked(attempts) => (TxStatus::NoAck, attempts),
            };
            self.engine
                .link_transmitted(&mut self.host, to, status, attempts);
            if let (TxStatus::NoAck, Frame::Dao(dao)) = (status, &frame) {
                if dao.lifetime != 0 {
                    self.engine.process_dao_ack(
                        &mut self.host,
                        to,
                        dao.instance_id,
                        dao.sequence,
                        DaoAckStatus::Timeout,
                    );
                }
            }
        }
    }

    fn report(&self) -> NodeReport {
        NodeReport::new(&self.config, &self.engine, &self.host, Instant::now())
    }
}
