//! Simulated door sensor node.
//!
//! Usage:
//!   cargo run -- --toggle-secs 10 --loss 0.5
//!   cargo run -- --config node.json --simplified
//!
//! The door opens and closes periodically; every change is reported with the
//! sure-delivery override over a lossy loopback link, scheduled reports go
//! out best effort.

use clap::Parser;
use door_sure_delivery::config::{self, Config};
use door_sure_delivery::coordinator::{Coordinator, TransportCoordinator};
use door_sure_delivery::error::Result;
use door_sure_delivery::input::simulation::{LossyLoopback, run_door_simulation};
use door_sure_delivery::node::Node;
use door_sure_delivery::sensors::{
    DoorSureDeliverySensor, InterruptNotifier, InterruptSignal, SimulatedPin,
};
use embassy_sync::signal::Signal;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

static INTERRUPTS: InterruptSignal = Signal::new();

#[derive(Parser)]
#[command(name = "door-sure-delivery")]
#[command(about = "Simulated door sensor node with sure-delivery override")]
struct Cli {
    /// JSON configuration file
    #[arg(long, env = "NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Use the sensor variant without override
    #[arg(long)]
    simplified: bool,

    /// Stop after this many report cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Override the seconds between simulated door changes
    #[arg(long)]
    toggle_secs: Option<u64>,

    /// Override the radio loss probability
    #[arg(long)]
    loss: Option<f64>,

    /// Override the seconds between scheduled reports
    #[arg(long)]
    report_secs: Option<u64>,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };
    if cli.simplified {
        config.door.simplified = true;
    }
    if let Some(secs) = cli.toggle_secs {
        config.simulation.toggle_secs = secs;
    }
    if let Some(loss) = cli.loss {
        config.simulation.loss = loss;
    }
    if let Some(secs) = cli.report_secs {
        config.node.report_interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

fn build_node(config: &Config, pin: Arc<SimulatedPin>) -> Result<Node<LossyLoopback>> {
    let link = LossyLoopback::new(config.simulation.loss, config.simulation.echo);
    let coordinator = Arc::new(TransportCoordinator::new(link));
    // The restore set must match what the coordinator starts with.
    coordinator.apply_policy(&config.sure_delivery.restore_policy);

    let door = if config.door.simplified {
        DoorSureDeliverySensor::simplified(pin, config.door.child_id, coordinator.clone())?
    } else {
        let door = DoorSureDeliverySensor::new(pin, config.door.child_id, coordinator.clone())?;
        door.set_delivery(config.sure_delivery);
        door
    };
    door.set_invert_value_to_report(config.door.invert_value_to_report);
    door.input().set_mode(config.door.mode);
    door.input()
        .set_wait_after_interrupt(embassy_time::Duration::from_millis(
            config.door.wait_after_interrupt_ms,
        ));

    let mut node = Node::new(config.node.node_id, coordinator);
    node.register(Box::new(door))?;
    Ok(node)
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting door sensor node {}", config.node.node_id);
    info!("  Door pin: {}", config.door.pin);
    info!("  Child id: {}", config.door.child_id);
    info!(
        "  Variant: {}",
        if config.door.simplified { "simplified" } else { "sure delivery" }
    );
    info!("  Override: {:?}", config.sure_delivery.override_policy);
    info!("  Restore: {:?}", config.sure_delivery.restore_policy);
    info!("  Link loss: {:.0}%", config.simulation.loss * 100.0);

    let pin = Arc::new(SimulatedPin::new(config.door.pin, false));
    pin.set_notifier(InterruptNotifier::new(&INTERRUPTS, config.door.pin));

    let node = match build_node(&config, pin.clone()) {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to set up node: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = node.present() {
        error!("Presentation failed: {}", e);
    }

    let simulation = run_door_simulation(
        pin,
        Duration::from_secs(config.simulation.toggle_secs.max(1)),
    );

    // Retry pauses block, so the node loop gets its own thread
    let report_interval = embassy_time::Duration::from_secs(config.node.report_interval_secs);
    let cycles = cli.cycles;
    let node_thread = std::thread::Builder::new()
        .name("node-loop".into())
        .spawn(move || {
            embassy_futures::block_on(node.run(&INTERRUPTS, report_interval, cycles));
            let stats = node.coordinator().transport().stats();
            info!(
                "Link stats: {} transmitted, {} lost, {} echoed",
                stats.transmitted, stats.lost, stats.echoed
            );
        });
    let node_thread = match node_thread {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to spawn node thread: {}", e);
            std::process::exit(1);
        }
    };

    info!("Node is running, press Ctrl+C to exit");

    if cycles.is_some() {
        let joined = tokio::task::spawn_blocking(move || node_thread.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            error!("Node loop terminated abnormally");
        }
    } else {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    }

    simulation.abort();
    info!("Door sensor node stopped");
}
