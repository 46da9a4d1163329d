//! Multisim stack binary
//!
//! Runs the coordinator against the in-process simulation collaborators:
//! activates the configured subscriptions, brings data up on the
//! active-data-subscription and, on Ctrl-C, walks every radio through the
//! safe power-off sequence before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use multisim_common::config::StackConfig;
use multisim_common::logging::{init_logging, LogLevel};
use multisim_stack::coordinator::{Coordinator, Services};
use multisim_stack::icc::IccRecords;
use multisim_stack::sim::{EventLog, MemoryCarrierTable, SimIccSource, SimRadio};

#[derive(Parser, Debug)]
#[command(name = "multisim", about = "Multi-subscription radio lifecycle coordinator")]
struct Args {
    /// Path to the YAML stack configuration (defaults to dual-SIM GSM)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level);

    let config = match &args.config {
        Some(path) => StackConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => StackConfig::default(),
    };

    let icc = Arc::new(SimIccSource::new());
    for sub in &config.subscriptions {
        icc.insert(
            sub.slot,
            sub.app_family,
            IccRecords {
                operator_numeric: sub.operator_numeric.clone(),
                spn: None,
            },
        );
    }
    let services = Services {
        radio: Arc::new(SimRadio::new()),
        icc,
        carrier: Arc::new(MemoryCarrierTable::new()),
        sink: Arc::new(EventLog::new()),
    };

    let coordinator = Coordinator::new(config.clone(), services);
    coordinator.bootstrap();

    for sub_config in &config.subscriptions {
        let subscription = coordinator
            .registry()
            .activate(sub_config.slot, sub_config.app_index, sub_config.app_family)
            .context("activating subscription")?;
        coordinator.reconcile_phone_object(&subscription).await?;

        let phone = coordinator.phone(subscription.sub_id)?;
        phone.records_loaded().await;
        phone.data_network_state(true).await;
    }

    let dds = coordinator.dds().current();
    coordinator.enable_data(dds, None).await?;
    info!(dds, "stack up, press Ctrl-C to power off");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    info!("powering radios off safely");
    for sub_id in 0..config.num_subscriptions() {
        coordinator.power_off_radio_safely(sub_id).await?;
    }
    // Give the power-off sequences a moment to drain before tearing the
    // actors down.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    coordinator.shutdown().await;
    Ok(())
}
