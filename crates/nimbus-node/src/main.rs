//! Nimbus Node binary
//!
//! Runs one light on a UDP broadcast domain. Button events come from stdin
//! (`s`, `l`, `ll`).

use std::time::Duration;

use anyhow::{bail, Context};
use nimbus_clock::SystemTimer;
use nimbus_node::{default_registry, ui, Node, NodeConfig, ProgramSink, Shutdown, UdpTransport};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pixels driven by the built-in programs.
const STRIP_LEN: usize = 12;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus_node=info,nimbus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nimbus Node");

    let (ui_tx, mut ui_rx) = mpsc::channel(16);
    let _console = ui::spawn_stdin(ui_tx);

    loop {
        let config = NodeConfig::from_env().context("invalid configuration")?;
        let registry = default_registry()?;
        let sink = ProgramSink::for_registry(&registry, STRIP_LEN);
        let (transport, mut inbound) = UdpTransport::bind(&config).context("failed to bind transport")?;

        let node = Node::new(&config, registry, SystemTimer::new(), transport, sink);
        match node.run(&mut inbound, &mut ui_rx, Duration::from_millis(config.tick)).await {
            Shutdown::Restart => {
                tracing::info!("Restarting node");
                continue;
            }
            Shutdown::TransportClosed => bail!("transport closed"),
        }
    }
}
