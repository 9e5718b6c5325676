//! ds-oc daemon
//!
//! Keeps a DualSense controller's HID interrupt endpoints at a faster
//! polling interval for as long as it stays connected, and puts the
//! original intervals back when it is released.

mod config;
mod service;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{TunerBridge, TunerCommand, TunerEvent, create_tuner_bridge, setup_logging};
use config::DaemonConfig;
use std::path::PathBuf;
use tokio::signal::unix::{Signal, SignalKind, signal as unix_signal};
use tracing::{error, info, warn};
use tuner::{DeviceMatch, ManagedInfo, TrackerStatus, polling_rate_hz};
use usb::spawn_tuner_worker;

#[derive(Parser, Debug)]
#[command(name = "ds-oc-daemon")]
#[command(
    author,
    version,
    about = "DualSense polling-rate daemon - lowers the controller's USB bInterval"
)]
#[command(long_about = "
Patches the bInterval of a DualSense controller's HID interrupt endpoints
while it is connected, resets the device so the new interval takes effect,
and restores the original values on unplug or shutdown.

EXAMPLES:
    # Run with default config (bInterval 1)
    ds-oc-daemon

    # Run with a different interval
    ds-oc-daemon --rate 4

    # Show the controller's current endpoint intervals and exit
    ds-oc-daemon --list-devices

    # Run as systemd service (Type=notify)
    ds-oc-daemon --service

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/ds-oc/daemon.toml
    3. /etc/ds-oc/daemon.toml
    4. Built-in defaults

    Send SIGHUP to reload the configured rate.
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Run as systemd service (sd-notify readiness and status)
    #[arg(long)]
    service: bool,

    /// List matching controllers and their interrupt endpoints, then exit
    #[arg(long)]
    list_devices: bool,

    /// Target bInterval (clamped to 1-255), overrides the config file
    #[arg(short, long, value_name = "N")]
    rate: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let mut config = DaemonConfig::default();
        if let Some(rate) = args.rate {
            config.device.rate = rate;
        }
        let path = DaemonConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let mut config = if let Some(ref path) = args.config {
        DaemonConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };
    if let Some(rate) = args.rate {
        config.device.rate = rate;
    }

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("ds-oc daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let matcher = config.matcher()?;

    if args.list_devices {
        return list_devices_mode(matcher);
    }

    let service_mode = args.service || config.daemon.service_mode;
    let target = config.target_interval();
    info!("Managing {} with target bInterval {}", matcher, target);

    // Installed before the worker starts patching, so an early Ctrl+C still
    // goes through the restoring shutdown path
    let signals = Signals::install()?;

    // Device resets block, so the tuner lives on its own thread
    let (bridge, worker) = create_tuner_bridge();
    let worker_handle =
        spawn_tuner_worker(worker, matcher, target).context("Failed to spawn USB worker")?;

    let result = run(&args, &bridge, signals, service_mode).await;

    info!("Shutting down USB subsystem...");
    if let Err(e) = bridge.send_command(TunerCommand::Shutdown).await {
        // Worker already gone; it restored on its way out
        warn!("Shutdown command not delivered: {}", e);
    }

    let worker_result = worker_handle
        .join()
        .map_err(|e| anyhow!("USB worker thread panicked: {:?}", e))?;

    match (result, worker_result) {
        (Err(e), Err(usb)) => Err(e.context(format!("USB worker failed: {}", usb))),
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(usb)) => Err(anyhow!("USB worker failed: {}", usb)),
        (Ok(()), Ok(())) => {
            info!("Daemon shutdown complete");
            Ok(())
        }
    }
}

/// Print matching controllers and their HID interrupt endpoints
fn list_devices_mode(matcher: DeviceMatch) -> Result<()> {
    let devices =
        usb::list_matching_devices(matcher).context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No devices matching {} found.", matcher);
        return Ok(());
    }

    println!("Found {} device(s) matching {}:\n", devices.len(), matcher);
    for device in devices {
        println!(
            "  {:04x}:{:04x} on {} Speed: {:?}",
            device.vendor_id, device.product_id, device.location, device.speed
        );
        match device.hid_interface {
            Some(number) => println!("      HID interface {}", number),
            None => println!("      No HID interface in the active configuration"),
        }
        for endpoint in &device.endpoints {
            println!(
                "      Endpoint 0x{:02x} {:<3} bInterval {:>3} ({:.0} Hz)",
                endpoint.address(),
                format!("{:?}", endpoint.direction()).to_uppercase(),
                endpoint.interval(),
                polling_rate_hz(endpoint.interval(), device.speed)
            );
        }
        println!();
    }

    Ok(())
}

/// Signals the daemon reacts to
struct Signals {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> Result<Self> {
        Ok(Self {
            interrupt: unix_signal(SignalKind::interrupt())
                .context("Failed to install SIGINT handler")?,
            terminate: unix_signal(SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
            hangup: unix_signal(SignalKind::hangup())
                .context("Failed to install SIGHUP handler")?,
        })
    }
}

/// Run until Ctrl+C, SIGTERM, or the USB worker stopping
async fn run(
    args: &Args,
    bridge: &TunerBridge,
    mut signals: Signals,
    service_mode: bool,
) -> Result<()> {
    // The worker answers only after its startup scan and hotplug
    // registration, so this doubles as the readiness barrier.
    let status = tokio::select! {
        status = bridge.status() => status.context("USB worker did not start")?,
        _ = signals.interrupt.recv() => {
            info!("Received Ctrl+C during startup, shutting down...");
            return Ok(());
        }
        _ = signals.terminate.recv() => {
            info!("Received SIGTERM during startup, shutting down...");
            return Ok(());
        }
    };

    let watchdog_handle = if service_mode {
        info!("Running in service mode");
        if service::is_systemd() {
            info!("Running under systemd");
        }
        let handle = service::spawn_watchdog_task();
        service::notify_ready().context("Failed to notify systemd ready")?;
        report_status(&status, service_mode);
        handle
    } else {
        report_status(&status, service_mode);
        None
    };

    info!("Press Ctrl+C to shutdown");

    let result = loop {
        tokio::select! {
            _ = signals.interrupt.recv() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break Ok(());
            }
            _ = signals.terminate.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break Ok(());
            }
            _ = signals.hangup.recv() => {
                info!("Received SIGHUP, reloading configuration");
                if let Err(e) = reload(args, bridge, service_mode).await {
                    error!("Configuration reload failed: {:#}", e);
                }
            }
            event = bridge.recv_event() => match event {
                Ok(event) => handle_event(event, bridge, service_mode).await,
                Err(_) => break Err(anyhow!("USB worker stopped unexpectedly")),
            }
        }
    };

    if service_mode {
        if let Err(e) = service::notify_stopping() {
            warn!("Failed to notify systemd stopping: {:#}", e);
        }
    }
    if let Some(handle) = watchdog_handle {
        handle.abort();
    }

    result
}

/// Re-read the configuration file and apply its rate
///
/// The device identity is fixed for the lifetime of the process; only the
/// target interval is reloaded.
async fn reload(args: &Args, bridge: &TunerBridge, service_mode: bool) -> Result<()> {
    if service_mode {
        service::notify_reloading()?;
    }

    let applied = async {
        let config = DaemonConfig::load(args.config.clone())?;
        if let Some(rate) = args.rate {
            info!("Ignoring --rate {} in favor of the reloaded file", rate);
        }
        let target = bridge
            .set_target_interval(config.device.rate)
            .await
            .context("Failed to apply reloaded rate")?;
        info!("Target bInterval is now {}", target);
        Ok::<_, anyhow::Error>(())
    }
    .await;

    if service_mode {
        service::notify_ready()?;
    }
    applied
}

async fn handle_event(event: TunerEvent, bridge: &TunerBridge, service_mode: bool) {
    match event {
        TunerEvent::DeviceManaged { device, patched } => {
            info!(
                "Controller {} connected ({})",
                describe(&device),
                if patched { "patched" } else { "already at target" }
            );
        }
        TunerEvent::DeviceReleased { device, restored } => {
            info!(
                "Controller {} released ({})",
                describe(&device),
                if restored { "restored" } else { "nothing to restore" }
            );
        }
        TunerEvent::TargetChanged { target } => {
            info!("Target bInterval set to {}", target);
        }
    }

    match bridge.status().await {
        Ok(status) => report_status(&status, service_mode),
        Err(e) => warn!("Failed to query tuner status: {}", e),
    }
}

/// Log the tracker state and mirror it into the systemd status line
fn report_status(status: &TrackerStatus, service_mode: bool) {
    let line = status_line(status);
    info!("{}", line);

    if service_mode {
        if let Err(e) = service::notify_status(&line) {
            warn!("Failed to send status to systemd: {:#}", e);
        }
    }
}

fn status_line(status: &TrackerStatus) -> String {
    match &status.managed {
        Some(device) if status.patched_endpoints.is_empty() => format!(
            "Managing {}, no bInterval changes needed for target {}",
            describe(device),
            status.target
        ),
        Some(device) => format!(
            "Managing {}, {} endpoint descriptor(s) set to bInterval {}, device reset issued",
            describe(device),
            status.patched_endpoints.len(),
            status.target
        ),
        None => format!("Waiting for controller, target bInterval {}", status.target),
    }
}

fn describe(device: &ManagedInfo) -> String {
    format!(
        "{:04x}:{:04x} on {}",
        device.vendor_id, device.product_id, device.location
    )
}
