//! NR gNodeB MAC Scheduler Application
//!
//! Runs the slot scheduler against a loopback PHY with emulated UEs, driven
//! by a real-time slot clock.

mod config;
mod ue_sim;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::types::SlotPoint;
use common::utils::time::slot_duration;
use sched::mac::{MacPhyInterface, MacScheduler};
use sched::SchedMetrics;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::GnbConfig;
use crate::ue_sim::UeEmulator;

/// NR gNodeB MAC slot scheduler
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Subcarrier spacing in kHz (15, 30, 60, 120, 240), overrides the file
    #[arg(long)]
    scs_khz: Option<u32>,

    /// Number of emulated UEs, overrides the file
    #[arg(long)]
    nof_ues: Option<u16>,

    /// Seed of the emulated traffic, overrides the file
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many slots
    #[arg(long)]
    max_slots: Option<u64>,
}

fn load_config(args: &Args) -> Result<GnbConfig> {
    let mut config = match &args.config {
        Some(path) => GnbConfig::from_file(path)?,
        None => {
            info!("No configuration file given, using the built-in cell");
            GnbConfig::default()
        }
    };
    if let Some(scs_khz) = args.scs_khz {
        config.set_scs_khz(scs_khz)?;
    }
    if let Some(nof_ues) = args.nof_ues {
        config.emulation.nof_ues = nof_ues;
    }
    if let Some(seed) = args.seed {
        config.emulation.seed = seed;
    }
    if !(0.0..=1.0).contains(&config.emulation.bler) {
        return Err(anyhow::anyhow!("Invalid BLER: {}", config.emulation.bler));
    }
    Ok(config)
}

fn report_metrics(metrics: &SchedMetrics, json: bool) {
    if json {
        match serde_json::to_string(metrics) {
            Ok(report) => info!("{}", report),
            Err(e) => warn!("Cannot serialize metrics: {}", e),
        }
        return;
    }
    for cell in &metrics.cells {
        info!(
            "cc={} slots={} pdsch={} pusch={} si={} rar={} msg3={} rar_timeouts={}",
            cell.cc,
            cell.nof_slots,
            cell.pdsch_grants,
            cell.pusch_grants,
            cell.si_grants,
            cell.rar_grants,
            cell.msg3_grants,
            cell.rar_timeouts
        );
    }
    for ue in &metrics.ues {
        info!(
            "  rnti={} cc={} cqi={} dl_ok={} dl_ko={} ul_ok={} ul_ko={} dl_pending={} ul_pending={}",
            ue.rnti,
            ue.cc,
            ue.dl_cqi,
            ue.dl_harq.rx_ok,
            ue.dl_harq.rx_ko,
            ue.ul_harq.rx_ok,
            ue.ul_harq.rx_ko,
            ue.dl_pending_bytes,
            ue.ul_pending_bytes
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting NR gNodeB MAC scheduler");
    let config = load_config(&args)?;
    let scs = config.scs()?;
    info!("Cell configuration:");
    for (cc, cell) in config.cells.iter().enumerate() {
        info!("  cc={} PCI: {} PRBs: {} SCS: {:?} duplex: {:?}", cc, cell.pci, cell.nof_prb, cell.scs, cell.duplex);
    }
    info!("  Policy: {:?}", config.sched.policy);

    let mac = MacScheduler::new(config.sched.clone());
    mac.cell_cfg(&config.cells).await?;
    let nof_cells = mac.nof_cells().await;
    let mut emulator = UeEmulator::new(config.emulation.clone(), mac.feedback(), nof_cells);
    info!("Emulating {} UE(s)", config.emulation.nof_ues);

    let running = Arc::new(RwLock::new(true));

    // Start statistics reporting
    let stats_handle = (config.metrics.period_secs > 0).then(|| {
        let mac = mac.clone();
        let running = running.clone();
        let json = config.metrics.json;
        let period = tokio::time::Duration::from_secs(config.metrics.period_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            while *running.read().await {
                interval.tick().await;
                report_metrics(&mac.metrics().await, json);
            }
        })
    });

    // Slot clock
    let mut ticker = tokio::time::interval(slot_duration(scs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut slot = SlotPoint::from_count(scs.numerology(), 0)?;
    let mut nof_slots: u64 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                emulator.on_slot_start(slot);
                for cc in 0..nof_cells {
                    match mac.get_slot_schedule(cc, slot).await {
                        Ok(result) => emulator.on_slot_result(&result),
                        Err(e) => error!("cc={} slot={} scheduling failed: {}", cc, slot, e),
                    }
                }
                slot += 1;
                nof_slots += 1;
                if args.max_slots.is_some_and(|max| nof_slots >= max) {
                    info!("Reached {} slots", nof_slots);
                    break;
                }
            }
        }
    }

    // Shutdown
    info!("Shutting down gNodeB");
    *running.write().await = false;
    if let Some(handle) = stats_handle {
        handle.abort();
    }

    report_metrics(&mac.metrics().await, config.metrics.json);
    info!(
        "{} UE(s) connected, {} UL bytes delivered",
        emulator.nof_connected(),
        emulator.delivered_ul_bytes()
    );
    info!("gNodeB shutdown complete");
    Ok(())
}
