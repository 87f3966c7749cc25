//! Nimbus mesh simulator
//!
//! Runs a mesh of simulated nodes over a lossy in-memory medium and reports
//! when they agree on the choreography.
//!
//! ```text
//! nimbus-sim [nodes] [loss] [seed] [duration_ms]
//! ```

use anyhow::Context;
use nimbus_node::{Simulation, SimulationConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn arg<T: std::str::FromStr>(args: &[String], index: usize, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match args.get(index) {
        Some(raw) => raw.parse().with_context(|| format!("bad argument {index}: {raw}")),
        None => Ok(default),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbus_sim=info,nimbus_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = SimulationConfig {
        nodes: arg(&args, 0, 5)?,
        loss: arg(&args, 1, 0.1)?,
        seed: arg(&args, 2, 42)?,
        ..SimulationConfig::default()
    };
    let duration: u64 = arg(&args, 3, 60_000)?;

    let mut sim = Simulation::new(config)?;
    let converged = sim.run_until(duration, Simulation::converged);

    let (delivered, dropped) = sim.hub().traffic();
    if converged {
        tracing::info!(after_ms = sim.elapsed(), delivered, dropped, "Mesh converged");
    } else {
        tracing::warn!(after_ms = sim.elapsed(), delivered, dropped, "Mesh did not converge");
    }
    for line in sim.report() {
        tracing::info!("{line}");
    }

    Ok(())
}
