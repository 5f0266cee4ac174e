//! Host-monitoring agent entry point: parses the server hostname/port,
//! wires up the `/proc`-backed collector, and runs the control loop.

use std::sync::Arc;

use clap::Parser;
use notgios_core::agent::Agent;
use notgios_core::collector::ProcCollector;
use notgios_core::AgentConfig;

/// Connects to a notgios server and runs its assigned collection tasks.
#[derive(Parser, Debug)]
#[command(name = "notgios-monitor")]
struct Args {
    /// Hostname or IP address of the notgios server.
    #[arg(short = 's', long = "server-host")]
    server_host: String,

    /// Port the notgios server listens on.
    #[arg(short = 'p', long = "server-port")]
    server_port: u16,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = AgentConfig::new(args.server_host, args.server_port);
    let collector = Arc::new(ProcCollector);

    let agent = match Agent::new(config, collector) {
        Ok(agent) => agent,
        Err(e) => {
            tracing::error!("failed to install signal handlers: {e}");
            std::process::exit(libc::EXIT_FAILURE);
        }
    };

    std::process::exit(agent.run());
}
