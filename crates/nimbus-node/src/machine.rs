//! Device state machine.
//!
//! Every input (button press, remote command, timer tick, loop progress) goes through
//! [`DeviceStateMachine::handle`], which returns the [`Action`]s the node
//! must carry out. The machine itself never touches the network.
//!
//! ```text
//!              short                     long×1
//!   Performing ◀─────── Looping    Performing ───────▶ Looping
//!        │  ▲                              │
//!  long×2│  │ newer M=/L=                  │ long×2
//!        ▼  │                              ▼
//!        Off ──long×2 (+guard)──▶ Maintenance ──short──▶ Off
//!                                      │
//!                                long×2│
//!                                      ▼
//!                                   restart
//! ```

use nimbus_clock::Millis;
use nimbus_protocols::{Message, Mode, Stamp, GENERATION_MAX};
use tracing::{debug, info, warn};

use crate::config::MachineConfig;

/// Local user intent, already debounced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiEvent {
    ShortPress,
    /// Long press held for `n` periods.
    LongPress(u8),
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Ui(UiEvent),
    /// A mode command heard on the mesh.
    Remote(Message),
    /// Periodic timer check.
    Tick,
    /// The loop timeline moved on to this macro.
    Playing(usize),
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Put a message on the air.
    Broadcast(Message),
    /// Make this macro the active one.
    Play(usize),
    /// The mode changed.
    Mode(Mode),
    /// Tear the node down and start again.
    Restart,
}

/// Mode, generation and pending transitions of one device.
#[derive(Debug, Clone)]
pub struct DeviceStateMachine {
    config: MachineConfig,
    mode: Mode,
    generation: u32,
    active_macro: usize,
    macro_count: usize,
    /// Local time at which a requested maintenance switch happens.
    pending_maintenance: Option<Millis>,
    booted_at: Millis,
}

impl DeviceStateMachine {
    /// Start performing macro 0 at generation 0.
    pub fn new(config: MachineConfig, macro_count: usize, now: Millis) -> Self {
        Self {
            config,
            mode: Mode::Performing,
            generation: 0,
            active_macro: 0,
            macro_count,
            pending_maintenance: None,
            booted_at: now,
        }
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }

    pub const fn active_macro(&self) -> usize {
        self.active_macro
    }

    /// Local arbitration stamp.
    pub const fn stamp(&self) -> Stamp {
        Stamp::new(self.generation, self.mode)
    }

    /// A maintenance switch is scheduled.
    pub const fn is_switching(&self) -> bool {
        self.pending_maintenance.is_some()
    }

    /// Mesh traffic is ignored while switching to or sitting in maintenance.
    pub fn is_suspended(&self) -> bool {
        self.is_switching() || self.mode == Mode::Maintenance
    }

    /// Whether the choreography is running.
    pub fn is_playing(&self) -> bool {
        matches!(self.mode, Mode::Performing | Mode::Looping)
    }

    /// The command this node stands for, re-broadcast while local master.
    pub fn assertion(&self) -> Option<Message> {
        match self.mode {
            Mode::Performing => Some(Message::MacroSelect {
                index: self.active_macro,
                generation: self.generation,
            }),
            Mode::Looping => Some(Message::LoopSelect {
                index: None,
                generation: self.generation,
            }),
            Mode::Off => Some(Message::PowerOff {
                generation: self.generation,
            }),
            Mode::Maintenance => None,
        }
    }

    /// Apply one event at local time `now`.
    pub fn handle(&mut self, event: Event, now: Millis) -> Vec<Action> {
        match event {
            Event::Ui(ui) => self.on_ui(ui, now),
            Event::Remote(msg) => self.on_remote(msg, now),
            Event::Tick => self.on_tick(now),
            Event::Playing(index) => {
                if self.mode == Mode::Looping && index < self.macro_count {
                    self.active_macro = index;
                }
                Vec::new()
            }
        }
    }

    fn on_ui(&mut self, ui: UiEvent, now: Millis) -> Vec<Action> {
        if self.pending_maintenance.take().is_some() {
            info!(?ui, "Maintenance switch cancelled");
            return Vec::new();
        }

        match (ui, self.mode) {
            (UiEvent::ShortPress, Mode::Performing | Mode::Looping) => {
                let next = self.next_macro();
                if !self.bump() {
                    return Vec::new();
                }
                let mut actions = self.enter(Mode::Performing);
                self.active_macro = next;
                actions.push(Action::Play(next));
                actions.push(Action::Broadcast(Message::MacroSelect {
                    index: next,
                    generation: self.generation,
                }));
                actions
            }
            (UiEvent::ShortPress, Mode::Maintenance) => self.enter(Mode::Off),
            (UiEvent::LongPress(1), Mode::Performing | Mode::Looping) => {
                if !self.bump() {
                    return Vec::new();
                }
                let mut actions = self.enter(Mode::Looping);
                actions.push(Action::Broadcast(Message::LoopSelect {
                    index: None,
                    generation: self.generation,
                }));
                actions
            }
            (UiEvent::LongPress(n), Mode::Off) if n >= 2 => {
                self.pending_maintenance = Some(now + self.config.guard_delay);
                info!(delay = self.config.guard_delay, "Maintenance requested");
                vec![Action::Broadcast(Message::EnterMaintenance)]
            }
            (UiEvent::LongPress(n), Mode::Maintenance) if n >= 2 => {
                info!("Restart requested");
                vec![Action::Restart]
            }
            (UiEvent::LongPress(n), Mode::Performing | Mode::Looping) if n >= 2 => self.power_off(),
            (ui, mode) => {
                debug!(?ui, %mode, "Input ignored");
                Vec::new()
            }
        }
    }

    fn on_remote(&mut self, msg: Message, now: Millis) -> Vec<Action> {
        if self.is_suspended() {
            return Vec::new();
        }

        if msg == Message::EnterMaintenance {
            self.pending_maintenance = Some(now + self.config.guard_delay);
            info!(delay = self.config.guard_delay, "Maintenance requested by mesh");
            return Vec::new();
        }

        let Some(stamp) = msg.stamp() else {
            return Vec::new();
        };
        if stamp.generation > GENERATION_MAX {
            debug!(remote = stamp.generation, "Exhausted generation ignored");
            return Vec::new();
        }
        if !stamp.supersedes(&self.stamp()) {
            debug!(
                remote = stamp.generation,
                local = self.generation,
                mode = %stamp.mode,
                "Stale command ignored"
            );
            // Someone is behind us: answer with what we stand for.
            if self.stamp().supersedes(&stamp) {
                return self.assertion().map(Action::Broadcast).into_iter().collect();
            }
            return Vec::new();
        }

        match msg {
            Message::MacroSelect { index, .. } => {
                if index >= self.macro_count {
                    debug!(index, count = self.macro_count, "Unknown macro ignored");
                    return Vec::new();
                }
                self.generation = stamp.generation;
                let mut actions = self.enter(Mode::Performing);
                self.active_macro = index;
                actions.push(Action::Play(index));
                actions
            }
            Message::LoopSelect { index, .. } => {
                if index.is_some_and(|i| i >= self.macro_count) {
                    debug!(?index, count = self.macro_count, "Unknown macro ignored");
                    return Vec::new();
                }
                self.generation = stamp.generation;
                self.enter(Mode::Looping)
            }
            Message::PowerOff { .. } => {
                self.generation = stamp.generation;
                self.enter(Mode::Off)
            }
            _ => Vec::new(),
        }
    }

    fn on_tick(&mut self, now: Millis) -> Vec<Action> {
        if let Some(at) = self.pending_maintenance {
            if now >= at {
                self.pending_maintenance = None;
                return self.enter(Mode::Maintenance);
            }
        }

        if self.is_playing() && now.saturating_sub(self.booted_at) >= self.config.uptime_ceiling {
            info!(ceiling = self.config.uptime_ceiling, "Uptime ceiling reached");
            // A later wake-up gets a full ceiling again.
            self.booted_at = now;
            return self.power_off();
        }

        Vec::new()
    }

    fn power_off(&mut self) -> Vec<Action> {
        let bumped = self.bump();
        let mut actions = self.enter(Mode::Off);
        if bumped {
            actions.push(Action::Broadcast(Message::PowerOff {
                generation: self.generation,
            }));
        }
        actions
    }

    /// Claim the next generation for a local command.
    fn bump(&mut self) -> bool {
        match self.generation.checked_add(1) {
            Some(next) => {
                self.generation = next;
                true
            }
            None => {
                warn!(generation = self.generation, "Generation exhausted, local command dropped");
                false
            }
        }
    }

    fn enter(&mut self, mode: Mode) -> Vec<Action> {
        if self.mode == mode {
            return Vec::new();
        }
        info!(from = %self.mode, to = %mode, generation = self.generation, "Mode changed");
        self.mode = mode;
        vec![Action::Mode(mode)]
    }

    fn next_macro(&self) -> usize {
        if self.macro_count == 0 {
            0
        } else {
            (self.active_macro + 1) % self.macro_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn machine() -> DeviceStateMachine {
        DeviceStateMachine::new(MachineConfig::default(), 7, 0)
    }

    fn remote(m: &mut DeviceStateMachine, msg: Message) -> Vec<Action> {
        m.handle(Event::Remote(msg), 0)
    }

    #[test]
    fn short_press_cycles_and_broadcasts() {
        let mut m = machine();
        let actions = m.handle(Event::Ui(UiEvent::ShortPress), 0);
        assert_eq!(
            actions,
            vec![
                Action::Play(1),
                Action::Broadcast(Message::MacroSelect { index: 1, generation: 1 }),
            ]
        );
        for _ in 0..6 {
            m.handle(Event::Ui(UiEvent::ShortPress), 0);
        }
        assert_eq!(m.active_macro(), 0);
        assert_eq!(m.generation(), 7);
    }

    #[test]
    fn equal_generation_select_ignored_power_off_wins() {
        let mut m = machine();
        for _ in 0..5 {
            m.handle(Event::Ui(UiEvent::ShortPress), 0);
        }
        assert_eq!(m.stamp(), Stamp::new(5, Mode::Performing));

        assert!(remote(&mut m, Message::MacroSelect { index: 2, generation: 5 }).is_empty());
        assert_eq!(m.active_macro(), 5);

        assert_eq!(
            remote(&mut m, Message::PowerOff { generation: 5 }),
            vec![Action::Mode(Mode::Off)]
        );
        assert_eq!(m.mode(), Mode::Off);
    }

    #[test]
    fn newer_select_adopts_generation() {
        let mut m = machine();
        let actions = remote(&mut m, Message::MacroSelect { index: 3, generation: 9 });
        assert_eq!(actions, vec![Action::Play(3)]);
        assert_eq!(m.generation(), 9);

        let actions = remote(&mut m, Message::LoopSelect { index: None, generation: 9 });
        assert_eq!(actions, vec![Action::Mode(Mode::Looping)]);
        assert_eq!(m.assertion(), Some(Message::LoopSelect { index: None, generation: 9 }));
    }

    #[test]
    fn older_command_answered_with_assertion() {
        let mut m = machine();
        for _ in 0..3 {
            m.handle(Event::Ui(UiEvent::ShortPress), 0);
        }
        assert_eq!(
            remote(&mut m, Message::MacroSelect { index: 0, generation: 1 }),
            vec![Action::Broadcast(Message::MacroSelect { index: 3, generation: 3 })]
        );
        assert_eq!(m.active_macro(), 3);
    }

    #[test]
    fn newer_select_wakes_off_node() {
        let mut m = machine();
        remote(&mut m, Message::PowerOff { generation: 2 });
        let actions = remote(&mut m, Message::MacroSelect { index: 1, generation: 3 });
        assert_eq!(actions, vec![Action::Mode(Mode::Performing), Action::Play(1)]);
    }

    #[test]
    fn out_of_range_macro_dropped() {
        let mut m = machine();
        assert!(remote(&mut m, Message::MacroSelect { index: 7, generation: 9 }).is_empty());
        assert_eq!(m.generation(), 0);
        assert!(remote(&mut m, Message::LoopSelect { index: Some(40), generation: 9 }).is_empty());
    }

    #[test]
    fn long_press_loops_then_powers_off() {
        let mut m = machine();
        assert_eq!(
            m.handle(Event::Ui(UiEvent::LongPress(1)), 0),
            vec![
                Action::Mode(Mode::Looping),
                Action::Broadcast(Message::LoopSelect { index: None, generation: 1 }),
            ]
        );
        assert_eq!(
            m.handle(Event::Ui(UiEvent::LongPress(2)), 0),
            vec![
                Action::Mode(Mode::Off),
                Action::Broadcast(Message::PowerOff { generation: 2 }),
            ]
        );
        assert!(m.handle(Event::Ui(UiEvent::LongPress(1)), 0).is_empty());
        assert!(m.handle(Event::Ui(UiEvent::ShortPress), 0).is_empty());
        assert_eq!(m.mode(), Mode::Off);
        assert_eq!(m.assertion(), Some(Message::PowerOff { generation: 2 }));
    }

    #[test]
    fn maintenance_after_guard_delay() {
        let mut m = machine();
        m.handle(Event::Ui(UiEvent::LongPress(2)), 0);
        assert_eq!(
            m.handle(Event::Ui(UiEvent::LongPress(2)), 100),
            vec![Action::Broadcast(Message::EnterMaintenance)]
        );
        assert!(m.is_suspended());
        assert!(m.handle(Event::Tick, 5_099).is_empty());
        assert_eq!(m.handle(Event::Tick, 5_100), vec![Action::Mode(Mode::Maintenance)]);

        assert_eq!(m.handle(Event::Ui(UiEvent::LongPress(2)), 6_000), vec![Action::Restart]);
        assert_eq!(m.handle(Event::Ui(UiEvent::ShortPress), 6_000), vec![Action::Mode(Mode::Off)]);
        assert!(!m.is_suspended());
    }

    #[test]
    fn local_input_cancels_pending_switch() {
        let mut m = machine();
        remote(&mut m, Message::EnterMaintenance);
        assert!(m.is_switching());
        assert!(remote(&mut m, Message::PowerOff { generation: 50 }).is_empty());

        assert!(m.handle(Event::Ui(UiEvent::ShortPress), 10).is_empty());
        assert!(!m.is_switching());
        assert!(m.handle(Event::Tick, 60_000).is_empty());
        assert_eq!(m.mode(), Mode::Performing);
    }

    #[test]
    fn uptime_ceiling_powers_off_once() {
        let config = MachineConfig::default().with_uptime_ceiling(1_000);
        let mut m = DeviceStateMachine::new(config, 7, 500);
        assert!(m.handle(Event::Tick, 1_499).is_empty());
        assert_eq!(
            m.handle(Event::Tick, 1_500),
            vec![
                Action::Mode(Mode::Off),
                Action::Broadcast(Message::PowerOff { generation: 1 }),
            ]
        );
        assert!(m.handle(Event::Tick, 2_000).is_empty());

        // woken by the mesh, the ceiling starts over
        m.handle(Event::Remote(Message::MacroSelect { index: 0, generation: 2 }), 2_100);
        assert_eq!(m.mode(), Mode::Performing);
        assert!(m.handle(Event::Tick, 2_400).is_empty());
        assert_eq!(m.handle(Event::Tick, 2_500)[0], Action::Mode(Mode::Off));
    }

    #[test]
    fn exhausted_remote_generation_not_adopted() {
        let mut m = machine();
        assert!(remote(&mut m, Message::MacroSelect { index: 1, generation: u32::MAX }).is_empty());
        assert_eq!(m.generation(), 0);
        assert_eq!(m.active_macro(), 0);

        assert_eq!(m.handle(Event::Ui(UiEvent::ShortPress), 0)[0], Action::Play(1));
        assert_eq!(m.generation(), 1);
    }

    #[test]
    fn local_bump_at_generation_ceiling_does_not_overflow() {
        let mut m = machine();
        remote(&mut m, Message::MacroSelect { index: 1, generation: GENERATION_MAX });
        assert_eq!(m.generation(), GENERATION_MAX);

        // the last generation is still ours to claim
        assert_eq!(
            m.handle(Event::Ui(UiEvent::ShortPress), 0),
            vec![
                Action::Play(2),
                Action::Broadcast(Message::MacroSelect { index: 2, generation: u32::MAX }),
            ]
        );

        assert!(m.handle(Event::Ui(UiEvent::ShortPress), 0).is_empty());
        assert!(m.handle(Event::Ui(UiEvent::LongPress(1)), 0).is_empty());
        assert_eq!(m.stamp(), Stamp::new(u32::MAX, Mode::Performing));
        assert_eq!(m.active_macro(), 2);

        assert_eq!(m.handle(Event::Ui(UiEvent::LongPress(2)), 0), vec![Action::Mode(Mode::Off)]);
        assert_eq!(m.generation(), u32::MAX);
    }

    #[test]
    fn short_press_follows_loop_playback() {
        let mut m = machine();
        m.handle(Event::Ui(UiEvent::LongPress(1)), 0);
        m.handle(Event::Playing(3), 0);
        assert_eq!(m.active_macro(), 3);

        let actions = m.handle(Event::Ui(UiEvent::ShortPress), 0);
        assert_eq!(actions[1], Action::Play(4));
        assert_eq!(m.active_macro(), 4);

        // outside the loop the selection is not overridden
        m.handle(Event::Playing(6), 0);
        assert_eq!(m.active_macro(), 4);
    }

    fn any_event() -> impl Strategy<Value = Event> {
        let generation = prop_oneof![0u32..8, Just(GENERATION_MAX), Just(u32::MAX)];
        prop_oneof![
            Just(Event::Ui(UiEvent::ShortPress)),
            (1u8..=2).prop_map(|n| Event::Ui(UiEvent::LongPress(n))),
            Just(Event::Tick),
            (0usize..10).prop_map(Event::Playing),
            (0usize..10, generation.clone())
                .prop_map(|(index, generation)| Event::Remote(Message::MacroSelect { index, generation })),
            generation.clone().prop_map(|generation| Event::Remote(Message::LoopSelect { index: None, generation })),
            generation.prop_map(|generation| Event::Remote(Message::PowerOff { generation })),
            Just(Event::Remote(Message::EnterMaintenance)),
        ]
    }

    proptest! {
        #[test]
        fn prop_generation_never_goes_back(events in prop::collection::vec(any_event(), 1..64)) {
            let mut m = DeviceStateMachine::new(
                MachineConfig::default().with_guard_delay(100).with_uptime_ceiling(5_000),
                7,
                0,
            );
            let mut now = 0;
            for event in events {
                let before = m.generation();
                now += 50;
                for action in m.handle(event, now) {
                    if let Action::Play(index) = action {
                        prop_assert!(index < 7);
                    }
                }
                prop_assert!(m.generation() >= before);
                prop_assert!(m.active_macro() < 7);
            }
        }
    }
}
