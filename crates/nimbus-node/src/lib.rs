//! Nimbus Node - one light in a self-organising mesh
//!
//! Wires the mesh crates into a running device: configuration, the device
//! state machine, the event loop, a UDP broadcast transport and an
//! in-memory simulator.
//!
//! # Architecture
//!
//! ```text
//!   button / stdin ──► UiEvent ──┐
//!                                ▼
//!   UDP / SimHub ──► Datagram ─► Node ──► Gossip ──► PeerPool, VirtualClock
//!        ▲                       │  │
//!        │                       │  └─► DeviceStateMachine ──► Action
//!        └──── Outbound ◄────────┘  │
//!                                   └─► RoundRobinScheduler ──► RenderSink
//! ```
//!
//! # Example
//!
//! ```no_run
//! use nimbus_node::{Simulation, SimulationConfig};
//!
//! let mut sim = Simulation::new(SimulationConfig::default()).unwrap();
//! sim.run_for(10_000);
//! assert!(sim.converged());
//! ```

pub mod config;
pub mod error;
pub mod machine;
pub mod node;
pub mod sim;
pub mod sink;
pub mod transport;
pub mod ui;
pub mod watchdog;

pub use config::{default_registry, MachineConfig, NodeConfig, ReachabilityConfig, DEFAULT_MACROS};
pub use error::{Error, Result};
pub use machine::{Action, DeviceStateMachine, Event, UiEvent};
pub use node::{Node, NodeStatus, Shutdown};
pub use sim::{SimHub, SimNode, SimTransport, Simulation, SimulationConfig};
pub use sink::{ProgramSink, RenderSink, TracingSink};
pub use transport::{Datagram, Transport, UdpTransport};
pub use watchdog::IsolationWatchdog;
