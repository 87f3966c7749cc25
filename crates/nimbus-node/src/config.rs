//! Node configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `NIMBUS_NODE_ID` | BLAKE3 of `NIMBUS_NODE_NAME`, else of the hostname |
//! | `NIMBUS_CHANNEL` | node id mod 1000 |
//! | `NIMBUS_BIND` | `0.0.0.0:4210` |
//! | `NIMBUS_BROADCAST` | `255.255.255.255:4210` |
//! | `NIMBUS_TICK_MS` | `20` |
//! | `NIMBUS_STATUS_MS` | `10000` |
//! | `NIMBUS_JITTER_MS` | `100` |
//! | `NIMBUS_GUARD_MS` | `5000` |
//! | `NIMBUS_UPTIME_CEILING_MS` | 7 hours |
//! | `NIMBUS_ISOLATION_GRACE_MS` | `60000` |
//! | `NIMBUS_REACHABILITY_MS` | `4000` |

use std::net::SocketAddr;
use std::str::FromStr;

use nimbus_clock::Millis;
use nimbus_pool::{Channel, NodeId};
use nimbus_protocols::GossipConfig;
use nimbus_schedule::MacroRegistry;

use crate::error::{Error, Result};

const HOUR_MS: Millis = 60 * 60 * 1_000;

/// State machine timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Delay between a maintenance request and the actual switch.
    pub guard_delay: Millis,
    /// Uptime after which a performing node powers the mesh off.
    pub uptime_ceiling: Millis,
    /// How long a previously linked node may stay solo before the
    /// transport is restarted.
    pub isolation_grace: Millis,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            guard_delay: 5_000,
            uptime_ceiling: 7 * HOUR_MS,
            isolation_grace: 60_000,
        }
    }
}

impl MachineConfig {
    #[must_use]
    pub fn with_guard_delay(mut self, delay: Millis) -> Self {
        self.guard_delay = delay;
        self
    }

    #[must_use]
    pub fn with_uptime_ceiling(mut self, ceiling: Millis) -> Self {
        self.uptime_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_isolation_grace(mut self, grace: Millis) -> Self {
        self.isolation_grace = grace;
        self
    }
}

/// How long a silent peer still counts as reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityConfig {
    pub window: Millis,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self { window: 4_000 }
    }
}

/// Configuration for a Nimbus node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Our identity on the mesh.
    pub node_id: NodeId,
    /// Our ordering slot.
    pub channel: Channel,
    /// UDP listen address.
    pub bind: SocketAddr,
    /// UDP broadcast destination.
    pub broadcast: SocketAddr,
    /// Event loop tick.
    pub tick: Millis,
    /// Status log period.
    pub status_period: Millis,
    pub gossip: GossipConfig,
    pub machine: MachineConfig,
    pub reachability: ReachabilityConfig,
}

impl NodeConfig {
    /// Default configuration for a node identity.
    pub fn new(node_id: NodeId, channel: Channel) -> Self {
        Self {
            node_id,
            channel,
            bind: SocketAddr::from(([0, 0, 0, 0], 4210)),
            broadcast: SocketAddr::from(([255, 255, 255, 255], 4210)),
            tick: 20,
            status_period: 10_000,
            gossip: GossipConfig::default(),
            machine: MachineConfig::default(),
            reachability: ReachabilityConfig::default(),
        }
    }

    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let node_id = match lookup("NIMBUS_NODE_ID") {
            Some(value) => parse("NIMBUS_NODE_ID", &value)?,
            None => NodeId::from_name(&lookup("NIMBUS_NODE_NAME").unwrap_or_else(hostname)),
        };
        if node_id.get() == 0 {
            return Err(Error::Config {
                var: "NIMBUS_NODE_ID",
                value: "0".into(),
                reason: "zero is reserved".into(),
            });
        }

        let channel = match lookup("NIMBUS_CHANNEL") {
            Some(value) => Channel(parse("NIMBUS_CHANNEL", &value)?),
            None => Channel((node_id.get() % 1_000) as u16),
        };

        let mut config = Self::new(node_id, channel);
        let get = |var: &'static str| lookup(var).map(|value| (var, value));

        if let Some((var, value)) = get("NIMBUS_BIND") {
            config.bind = parse(var, &value)?;
        }
        if let Some((var, value)) = get("NIMBUS_BROADCAST") {
            config.broadcast = parse(var, &value)?;
        }
        if let Some((var, value)) = get("NIMBUS_TICK_MS") {
            config.tick = positive(var, &value)?;
        }
        if let Some((var, value)) = get("NIMBUS_STATUS_MS") {
            config.status_period = positive(var, &value)?;
        }
        if let Some((var, value)) = get("NIMBUS_JITTER_MS") {
            config.gossip = config.gossip.with_jitter(parse(var, &value)?);
        }
        if let Some((var, value)) = get("NIMBUS_GUARD_MS") {
            config.machine = config.machine.with_guard_delay(parse(var, &value)?);
        }
        if let Some((var, value)) = get("NIMBUS_UPTIME_CEILING_MS") {
            config.machine = config.machine.with_uptime_ceiling(positive(var, &value)?);
        }
        if let Some((var, value)) = get("NIMBUS_ISOLATION_GRACE_MS") {
            config.machine = config.machine.with_isolation_grace(positive(var, &value)?);
        }
        if let Some((var, value)) = get("NIMBUS_REACHABILITY_MS") {
            config.reachability.window = positive(var, &value)?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    #[must_use]
    pub fn with_broadcast(mut self, broadcast: SocketAddr) -> Self {
        self.broadcast = broadcast;
        self
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Millis) -> Self {
        self.tick = tick;
        self
    }

    #[must_use]
    pub fn with_status_period(mut self, period: Millis) -> Self {
        self.status_period = period;
        self
    }

    #[must_use]
    pub fn with_gossip(mut self, gossip: GossipConfig) -> Self {
        self.gossip = gossip;
        self
    }

    #[must_use]
    pub fn with_machine(mut self, machine: MachineConfig) -> Self {
        self.machine = machine;
        self
    }

    #[must_use]
    pub fn with_reachability(mut self, reachability: ReachabilityConfig) -> Self {
        self.reachability = reachability;
        self
    }
}

/// The built-in macro set: program name, slot duration, loop repeats.
pub const DEFAULT_MACROS: [(&str, Millis, u32); 7] = [
    ("wind", 2_000, 1),
    ("crawler", 1_500, 5),
    ("sparkle", 100, 1),
    ("breath", 6_000, 1),
    ("flash", 150, 5),
    ("rainbow", 3_000, 2),
    ("sparkle-slow", 6_000, 1),
];

/// Registry holding [`DEFAULT_MACROS`].
pub fn default_registry() -> Result<MacroRegistry> {
    let mut registry = MacroRegistry::new();
    for (program, duration, repeat) in DEFAULT_MACROS {
        registry.register(program, duration, repeat)?;
    }
    Ok(registry)
}

fn parse<T: FromStr>(var: &'static str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| Error::Config {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, value: &str) -> Result<Millis> {
    let ms: Millis = parse(var, value)?;
    if ms == 0 {
        return Err(Error::Config {
            var,
            value: value.to_string(),
            reason: "must be positive".into(),
        });
    }
    Ok(ms)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "nimbus".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn explicit_identity() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("NIMBUS_NODE_ID", "42"),
            ("NIMBUS_CHANNEL", "3"),
            ("NIMBUS_TICK_MS", "50"),
            ("NIMBUS_GUARD_MS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.node_id, NodeId(42));
        assert_eq!(config.channel, Channel(3));
        assert_eq!(config.tick, 50);
        assert_eq!(config.machine.guard_delay, 0);
        assert_eq!(config.machine.isolation_grace, 60_000);
    }

    #[test]
    fn name_derives_stable_id() {
        let a = NodeConfig::from_lookup(lookup(&[("NIMBUS_NODE_NAME", "lamp-a")])).unwrap();
        let b = NodeConfig::from_lookup(lookup(&[("NIMBUS_NODE_NAME", "lamp-a")])).unwrap();
        assert_eq!(a.node_id, b.node_id);
        assert_eq!(a.node_id, NodeId::from_name("lamp-a"));
        assert_eq!(a.channel, Channel((a.node_id.get() % 1_000) as u16));
    }

    #[test]
    fn invalid_values_rejected() {
        let err = NodeConfig::from_lookup(lookup(&[("NIMBUS_NODE_ID", "1"), ("NIMBUS_BIND", "nowhere")]));
        assert!(matches!(err, Err(Error::Config { var: "NIMBUS_BIND", .. })));

        let err = NodeConfig::from_lookup(lookup(&[("NIMBUS_NODE_ID", "1"), ("NIMBUS_TICK_MS", "0")]));
        assert!(matches!(err, Err(Error::Config { var: "NIMBUS_TICK_MS", .. })));

        let err = NodeConfig::from_lookup(lookup(&[("NIMBUS_NODE_ID", "0")]));
        assert!(matches!(err, Err(Error::Config { var: "NIMBUS_NODE_ID", .. })));
    }

    #[test]
    fn default_macros_register() {
        let registry = default_registry().unwrap();
        assert_eq!(registry.count(), DEFAULT_MACROS.len());
        assert_eq!(registry.get(1).map(|m| m.repeat()), Some(5));
    }
}
