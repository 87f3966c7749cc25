//! The node context and its event loop.
//!
//! A [`Node`] owns everything a device knows: gossip state (pool and
//! clock), the state machine, the scheduler and the watchdog. Three entry
//! points mutate it, each running to completion:
//!
//! - [`on_tick`](Node::on_tick): periodic work and rendering
//! - [`on_datagram`](Node::on_datagram): one inbound message
//! - [`on_ui`](Node::on_ui): one local button event
//!
//! [`run`](Node::run) multiplexes the three with `tokio::select!`. Tests and
//! the simulator call them directly.

use std::time::Duration;

use nimbus_clock::{Millis, Timer, VirtualClock};
use nimbus_pool::{Channel, NodeId, PeerPool, PoolStats};
use nimbus_protocols::{Delivery, Gossip, Message, Mode, Outbound};
use nimbus_schedule::{Frame, MacroRegistry, Participation, RoundRobinScheduler};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::machine::{Action, DeviceStateMachine, Event, UiEvent};
use crate::sink::RenderSink;
use crate::transport::{Datagram, Transport};
use crate::watchdog::IsolationWatchdog;

/// Extra copies of a locally originated command, one per tick.
const COMMAND_ECHOES: u8 = 3;

/// Why [`Node::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The user asked for a full restart.
    Restart,
    /// The transport's inbound channel closed.
    TransportClosed,
}

/// Periodic status line.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node: NodeId,
    pub channel: Option<Channel>,
    pub mode: String,
    pub generation: u32,
    pub active_macro: usize,
    pub master: Option<NodeId>,
    pub virtual_time: Millis,
    pub clock_offset: Millis,
    pub pool: PoolStats,
    pub frame: Option<Frame>,
}

/// One device.
pub struct Node<T: Timer, X: Transport, S: RenderSink> {
    gossip: Gossip<T>,
    machine: DeviceStateMachine,
    scheduler: RoundRobinScheduler,
    registry: MacroRegistry,
    watchdog: IsolationWatchdog,
    transport: X,
    sink: S,
    /// Sink has been started and not stopped since.
    rendering: bool,
    last_frame: Option<Frame>,
    echo: Option<(Message, u8)>,
    status_period: Millis,
    next_status: Millis,
    shutdown: Option<Shutdown>,
}

impl<T: Timer, X: Transport, S: RenderSink> Node<T, X, S> {
    /// Assemble a node. It starts performing macro 0, solo.
    pub fn new(config: &NodeConfig, registry: MacroRegistry, timer: T, transport: X, mut sink: S) -> Self {
        let clock = VirtualClock::new(timer);
        let now = clock.timer().now_ms();
        let gossip = Gossip::new(
            PeerPool::new(config.node_id, config.channel),
            clock,
            config.gossip,
        );
        let machine = DeviceStateMachine::new(config.machine, registry.count(), now);
        let scheduler = RoundRobinScheduler::new();
        sink.start(scheduler.active());

        info!(
            node = %config.node_id,
            channel = %config.channel,
            macros = registry.count(),
            "Node created"
        );

        Self {
            gossip,
            machine,
            scheduler,
            registry,
            watchdog: IsolationWatchdog::new(config.machine.isolation_grace),
            transport,
            sink,
            rendering: true,
            last_frame: None,
            echo: None,
            status_period: config.status_period,
            next_status: now + config.status_period,
            shutdown: None,
        }
    }

    pub const fn gossip(&self) -> &Gossip<T> {
        &self.gossip
    }

    pub fn pool(&self) -> &PeerPool {
        self.gossip.pool()
    }

    pub const fn machine(&self) -> &DeviceStateMachine {
        &self.machine
    }

    pub const fn scheduler(&self) -> &RoundRobinScheduler {
        &self.scheduler
    }

    pub const fn transport(&self) -> &X {
        &self.transport
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Frame rendered by the latest tick, `None` while dark.
    pub const fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    /// Set once the node wants to stop.
    pub const fn shutdown(&self) -> Option<Shutdown> {
        self.shutdown
    }

    /// Current status snapshot.
    pub fn status(&self) -> NodeStatus {
        let pool = self.gossip.pool();
        NodeStatus {
            node: pool.owner_id(),
            channel: pool.owner_channel(),
            mode: self.machine.mode().to_string(),
            generation: self.machine.generation(),
            active_macro: self.scheduler.active(),
            master: pool.master_id(),
            virtual_time: self.gossip.now(),
            clock_offset: self.gossip.clock().offset(),
            pool: pool.stats(),
            frame: self.last_frame,
        }
    }

    /// Periodic work: reachability, watchdog, timers, gossip, rendering.
    pub fn on_tick(&mut self) {
        let local = self.gossip.local_now();

        let reachable = self.transport.reachable_peers();
        self.gossip.reconcile(&reachable);

        if self.machine.is_playing() {
            if self.watchdog.observe(self.gossip.pool().is_solo(), local) {
                if let Err(e) = self.transport.restart() {
                    warn!(error = %e, "Transport restart failed");
                }
            }
        } else {
            self.watchdog.pause();
        }

        let actions = self.machine.handle(Event::Tick, local);
        self.apply(actions);

        if !self.machine.is_suspended() {
            if let Some((msg, left)) = self.echo.take() {
                self.broadcast(&msg);
                if left > 1 {
                    self.echo = Some((msg, left - 1));
                }
            }
            let assertion = self.machine.assertion();
            let out = self.gossip.poll(assertion.as_ref());
            self.send_all(out);
        }

        if self.machine.is_playing() {
            self.render();
        }

        if local >= self.next_status {
            self.next_status = local + self.status_period;
            self.log_status();
        }
    }

    /// Handle one inbound datagram.
    pub fn on_datagram(&mut self, datagram: Datagram) {
        if self.machine.is_suspended() {
            trace!(from = %datagram.from, "Suspended, datagram ignored");
            return;
        }

        match self.gossip.receive(datagram.from, &datagram.payload) {
            Ok(Delivery::Absorbed(replies)) => self.send_all(replies),
            Ok(Delivery::Command(msg)) => {
                debug!(from = %datagram.from, command = %msg, "Mode command heard");
                let actions = self.machine.handle(Event::Remote(msg), self.gossip.local_now());
                self.apply(actions);
            }
            Err(e) => debug!(from = %datagram.from, error = %e, "Malformed message dropped"),
        }
    }

    /// Handle one local button event.
    pub fn on_ui(&mut self, event: UiEvent) {
        debug!(?event, "UI event");
        let actions = self.machine.handle(Event::Ui(event), self.gossip.local_now());
        for action in &actions {
            if let Action::Broadcast(msg) = action {
                self.echo = Some((msg.clone(), COMMAND_ECHOES));
            }
        }
        self.apply(actions);
    }

    /// Drive the node until it asks to stop.
    pub async fn run(
        mut self,
        inbound: &mut mpsc::Receiver<Datagram>,
        ui: &mut mpsc::Receiver<UiEvent>,
        tick: Duration,
    ) -> Shutdown {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ui_open = true;

        info!(tick = ?tick, "Node running");
        loop {
            tokio::select! {
                _ = interval.tick() => self.on_tick(),
                datagram = inbound.recv() => match datagram {
                    Some(datagram) => self.on_datagram(datagram),
                    None => return Shutdown::TransportClosed,
                },
                event = ui.recv(), if ui_open => match event {
                    Some(event) => self.on_ui(event),
                    None => {
                        debug!("UI source closed");
                        ui_open = false;
                    }
                },
            }

            if let Some(shutdown) = self.shutdown {
                info!(?shutdown, "Node stopping");
                self.stop_rendering();
                return shutdown;
            }
        }
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Broadcast(msg) => self.broadcast(&msg),
                Action::Play(index) => {
                    if let Some(previous) = self.scheduler.select(index, self.gossip.now()) {
                        if self.rendering {
                            self.sink.stop(previous);
                            self.sink.start(index);
                        }
                    }
                }
                Action::Mode(Mode::Performing | Mode::Looping) => {
                    if !self.rendering {
                        self.sink.start(self.scheduler.active());
                        self.rendering = true;
                    }
                }
                Action::Mode(Mode::Off | Mode::Maintenance) => self.stop_rendering(),
                Action::Restart => self.shutdown = Some(Shutdown::Restart),
            }
        }
    }

    fn stop_rendering(&mut self) {
        if self.rendering {
            self.sink.stop(self.scheduler.active());
            self.rendering = false;
        }
        self.last_frame = None;
    }

    fn render(&mut self) {
        let pool = self.gossip.pool();
        let participation = Participation {
            peer_count: pool.distinct_channel_count(),
            position: pool.rank_local(),
            isolated: pool.is_solo(),
        };
        let looping = self.machine.mode() == Mode::Looping;
        let now = self.gossip.now();

        let Some(tick) = self.scheduler.tick(&self.registry, now, participation, looping) else {
            return;
        };
        if let Some(switch) = tick.switched {
            self.sink.stop(switch.from);
            self.sink.start(switch.to);
            self.machine.handle(Event::Playing(switch.to), self.gossip.local_now());
        }
        self.sink.render(&tick.frame);
        self.last_frame = Some(tick.frame);
    }

    fn send_all(&mut self, out: Vec<Outbound>) {
        for o in out {
            match o {
                Outbound::Broadcast(msg) => self.broadcast(&msg),
                Outbound::Unicast(to, msg) => {
                    trace!(to = %to, msg = %msg, "Unicast");
                    if let Err(e) = self.transport.send_to(to, &msg.encode()) {
                        warn!(to = %to, error = %e, "Unicast failed");
                    }
                }
            }
        }
    }

    fn broadcast(&self, msg: &Message) {
        trace!(msg = %msg, "Broadcast");
        if let Err(e) = self.transport.broadcast(&msg.encode()) {
            warn!(kind = msg.kind(), error = %e, "Broadcast failed");
        }
    }

    fn log_status(&self) {
        match serde_json::to_string(&self.status()) {
            Ok(json) => info!(status = %json, "Node status"),
            Err(e) => warn!(error = %e, "Status serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_registry, MachineConfig};
    use crate::sim::SimHub;
    use crate::sink::TracingSink;
    use nimbus_clock::{ManualTimer, SystemTimer};
    use nimbus_protocols::GossipConfig;

    fn config(id: u32, channel: u16) -> NodeConfig {
        NodeConfig::new(NodeId(id), Channel(channel)).with_gossip(GossipConfig::default().with_jitter(0))
    }

    #[test]
    fn solo_node_renders_alone() {
        let hub = SimHub::new(0.0, 1);
        let (transport, _inbox) = hub.attach(NodeId(1));
        let timer = ManualTimer::new(0);
        let mut node = Node::new(&config(1, 0), default_registry().unwrap(), timer.clone(), transport, TracingSink::new());

        timer.advance(2_500);
        node.on_tick();

        let frame = node.last_frame().copied().unwrap();
        assert_eq!(frame.peer_count, 1);
        assert_eq!(frame.position, 0);
        assert!(frame.isolated);
        assert!(frame.is_my_turn());
        assert_eq!(frame.local_time, 500);
        assert_eq!(node.sink().frames(), 1);
    }

    #[test]
    fn malformed_datagram_changes_nothing() {
        let hub = SimHub::new(0.0, 1);
        let (transport, _inbox) = hub.attach(NodeId(1));
        let mut node = Node::new(&config(1, 0), default_registry().unwrap(), ManualTimer::new(0), transport, TracingSink::new());

        node.on_datagram(Datagram { from: NodeId(2), payload: b"CL=2=1,bad".to_vec() });
        assert!(node.pool().is_empty());
        node.on_datagram(Datagram { from: NodeId(2), payload: b"C=1".to_vec() });
        assert_eq!(node.pool().distinct_channel_count(), 2);
    }

    #[test]
    fn power_off_goes_dark_and_echoes() {
        let hub = SimHub::new(0.0, 1);
        let (transport, _inbox) = hub.attach(NodeId(1));
        let (_peer, mut peer_inbox) = hub.attach(NodeId(2));
        let timer = ManualTimer::new(0);
        let mut node = Node::new(&config(1, 0), default_registry().unwrap(), timer.clone(), transport, TracingSink::new());

        node.on_ui(UiEvent::LongPress(2));
        assert_eq!(node.machine().mode(), Mode::Off);
        assert!(node.last_frame().is_none());

        for _ in 0..COMMAND_ECHOES + 2 {
            timer.advance(10);
            node.on_tick();
        }
        let mut offs = 0;
        while let Ok(d) = peer_inbox.try_recv() {
            if d.payload == b"OFF=1" {
                offs += 1;
            }
        }
        assert_eq!(offs, 1 + COMMAND_ECHOES as usize);
        assert!(node.last_frame().is_none());
    }

    #[test]
    fn status_serializes() {
        let hub = SimHub::new(0.0, 1);
        let (transport, _inbox) = hub.attach(NodeId(7));
        let node = Node::new(&config(7, 3), default_registry().unwrap(), ManualTimer::new(0), transport, TracingSink::new());

        let json = serde_json::to_value(node.status()).unwrap();
        assert_eq!(json["node"], 7);
        assert_eq!(json["channel"], 3);
        assert_eq!(json["mode"], "Performing");
        assert_eq!(json["pool"]["distinct_channels"], 1);
    }

    /// A node linked to one peer, then cut off from it.
    fn isolated_after_link(hub: &SimHub, timer: &ManualTimer, dark: bool) -> u32 {
        let (transport, _inbox) = hub.attach(NodeId(1));
        let (_peer, _peer_inbox) = hub.attach(NodeId(2));
        let config = config(1, 0).with_machine(MachineConfig::default().with_isolation_grace(1_000));
        let mut node = Node::new(&config, default_registry().unwrap(), timer.clone(), transport, TracingSink::new());

        node.on_datagram(Datagram { from: NodeId(2), payload: b"C=1".to_vec() });
        node.on_tick();
        assert!(!node.pool().is_solo());

        if dark {
            node.on_ui(UiEvent::LongPress(2));
            assert_eq!(node.machine().mode(), Mode::Off);
        }
        hub.isolate(NodeId(1));
        for _ in 0..200 {
            timer.advance(20);
            node.on_tick();
        }
        assert!(node.pool().is_solo());
        hub.restarts(NodeId(1))
    }

    #[test]
    fn isolation_restarts_only_while_playing() {
        assert_eq!(isolated_after_link(&SimHub::new(0.0, 1), &ManualTimer::new(0), false), 1);
        assert_eq!(isolated_after_link(&SimHub::new(0.0, 1), &ManualTimer::new(0), true), 0);
    }

    #[test]
    fn short_press_advances_from_the_looped_macro() {
        let hub = SimHub::new(0.0, 1);
        let (transport, _inbox) = hub.attach(NodeId(1));
        let timer = ManualTimer::new(0);
        let mut node = Node::new(&config(1, 0), default_registry().unwrap(), timer.clone(), transport, TracingSink::new());

        node.on_ui(UiEvent::LongPress(1));
        // wind, crawler and sparkle take 9.6 s solo; breath is playing at 12 s
        timer.advance(12_000);
        node.on_tick();
        assert_eq!(node.scheduler().active(), 3);
        assert_eq!(node.machine().active_macro(), 3);

        node.on_ui(UiEvent::ShortPress);
        assert_eq!(node.machine().mode(), Mode::Performing);
        assert_eq!(node.machine().active_macro(), 4);
        assert_eq!(node.scheduler().active(), 4);
    }

    #[tokio::test]
    async fn run_returns_on_restart() {
        let hub = SimHub::new(0.0, 1);
        let (transport, mut inbound) = hub.attach(NodeId(1));
        let config = config(1, 0).with_machine(MachineConfig::default().with_guard_delay(0));
        let node = Node::new(&config, default_registry().unwrap(), SystemTimer::new(), transport, TracingSink::new());

        let (ui_tx, mut ui) = mpsc::channel(4);
        tokio::spawn(async move {
            // off, then maintenance request, then restart once maintenance is entered
            for event in [UiEvent::LongPress(2), UiEvent::LongPress(2)] {
                let _ = ui_tx.send(event).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = ui_tx.send(UiEvent::LongPress(2)).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let run = node.run(&mut inbound, &mut ui, Duration::from_millis(5));
        let shutdown = tokio::time::timeout(Duration::from_secs(5), run).await;
        let shutdown = tokio_test::assert_ok!(shutdown);
        assert_eq!(shutdown, Shutdown::Restart);
    }
}
