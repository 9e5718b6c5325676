//! Systemd service integration
//!
//! Implements the sd-notify datagram protocol so the daemon can run as a
//! `Type=notify` unit: readiness, reloads on SIGHUP, shutdown, status text,
//! and watchdog keepalives.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use tracing::{debug, error, info};

/// Send one sd-notify message
///
/// Returns `Ok(false)` when not running under systemd.
fn send_notification(message: &str) -> Result<bool> {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        return Ok(false);
    };

    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send '{}' to systemd", message))?;
    Ok(true)
}

/// Notify systemd that the daemon is ready
///
/// Called after the startup scan and hotplug registration have completed.
pub fn notify_ready() -> Result<()> {
    if send_notification("READY=1")? {
        info!("Notified systemd: service ready");
    } else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Notify systemd that the daemon is stopping
///
/// Sent before the managed controller is restored, so `systemctl` shows the
/// unit as deactivating while the reset runs.
pub fn notify_stopping() -> Result<()> {
    if send_notification("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Notify systemd that the daemon is reloading its configuration
pub fn notify_reloading() -> Result<()> {
    if send_notification("RELOADING=1")? {
        info!("Notified systemd: service reloading");
    }
    Ok(())
}

/// Send watchdog keepalive to systemd
pub fn notify_watchdog() -> Result<()> {
    if send_notification("WATCHDOG=1")? {
        debug!("Notified systemd: watchdog keepalive");
    }
    Ok(())
}

/// Send a custom status message to systemd
///
/// The status will be visible in `systemctl status` output.
pub fn notify_status(status: &str) -> Result<()> {
    if send_notification(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

/// Get the watchdog timeout configured by systemd (in microseconds)
///
/// Returns None if watchdog is not enabled or not running under systemd.
pub fn get_watchdog_timeout() -> Option<u64> {
    env::var("WATCHDOG_USEC").ok().and_then(|s| s.parse().ok())
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

/// Spawn a task sending WATCHDOG=1 at half the configured watchdog interval
///
/// Returns `None` when the watchdog is not enabled.
pub fn spawn_watchdog_task() -> Option<tokio::task::JoinHandle<()>> {
    let timeout_usec = get_watchdog_timeout()?;
    let interval = std::time::Duration::from_micros(timeout_usec / 2)
        .max(std::time::Duration::from_millis(500));

    info!(
        "Systemd watchdog enabled, interval: {}ms (timeout: {}ms)",
        interval.as_millis(),
        timeout_usec / 1_000
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = notify_watchdog() {
                error!("Failed to send watchdog keepalive: {:#}", e);
            }
        }
    }))
}
