//! `lodestar server` - daemon lifecycle.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::Colorize;

use lodestar_core::LodestarHome;
use lodestar_proto::v1::DaemonStatusRequest;
use lodestar_proto::v1::daemon_service_client::DaemonServiceClient;
use lodestar_supervisor::pidfile;

use crate::client;

/// Start the daemon as a background process and block until it serves.
pub(crate) async fn start() -> Result<()> {
    let home = LodestarHome::resolve()?;

    if client::connect(client::STATUS_DIAL_TIMEOUT).await.is_ok() {
        println!("{} control plane already running", "✓".green());
        return Ok(());
    }

    home.ensure_layout()?;
    let exe = std::env::current_exe().context("cannot locate the lodestar executable")?;

    // Stderr goes to the daemon log so startup failures can be surfaced.
    let log_path = home.log_file("daemon");
    let log = std::fs::File::create(&log_path)
        .with_context(|| format!("cannot create {}", log_path.display()))?;

    std::process::Command::new(&exe)
        .args(["server", "foreground"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::from(log))
        .spawn()
        .context("failed to spawn the daemon")?;

    match client::connect(client::DIAL_TIMEOUT).await {
        Ok(_) => {
            println!("{} control plane started", "✓".green());
            Ok(())
        }
        Err(e) => {
            bail!("{e}\n  daemon log: {}", log_path.display());
        }
    }
}

/// Run the daemon in the foreground until SIGTERM/Ctrl-C.
pub(crate) async fn foreground() -> Result<()> {
    // The daemon replaces the CLI's terse logging with its own.
    let _ = lodestar_core::setup_logging(
        &lodestar_core::LogConfig::new("info").with_format(lodestar_core::LogFormat::Compact),
    );

    let home = LodestarHome::resolve()?;
    let control_plane = lodestar_server::ControlPlane::bootstrap(home).await?;
    control_plane.start_components().await?;
    control_plane
        .serve(async {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    std::future::pending::<()>().await;
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await?;
    Ok(())
}

/// Stop the daemon via SIGTERM, escalating after a grace window.
pub(crate) async fn stop() -> Result<()> {
    let home = LodestarHome::resolve()?;
    let pid_file = home.pid_file("daemon");

    let Some(record) = pidfile::read(&pid_file) else {
        println!("control plane is not running");
        return Ok(());
    };
    if !lodestar_supervisor::process::signal_alive(record.pid) {
        pidfile::remove(&pid_file);
        println!("control plane is not running (stale PID file removed)");
        return Ok(());
    }

    let pid = nix::unistd::Pid::from_raw(i32::try_from(record.pid)?);
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)
        .context("failed to signal the daemon")?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if !lodestar_supervisor::process::signal_alive(record.pid) {
            println!("{} control plane stopped", "✓".green());
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
    pidfile::remove(&pid_file);
    println!("{} control plane killed after grace window", "!".yellow());
    Ok(())
}

/// Restart the daemon.
pub(crate) async fn restart() -> Result<()> {
    stop().await?;
    start().await
}

/// Report daemon, engine, and component status.
pub(crate) async fn status() -> Result<()> {
    let channel = match client::connect(client::STATUS_DIAL_TIMEOUT).await {
        Ok(channel) => channel,
        Err(_) => {
            println!("{} control plane is not running", "✗".red());
            std::process::exit(1);
        }
    };

    let status = DaemonServiceClient::new(channel)
        .status(DaemonStatusRequest {})
        .await?
        .into_inner();

    println!(
        "{} control plane running (pid {}, v{}, up {}s)",
        "✓".green(),
        status.pid,
        status.version,
        status.uptime_secs
    );
    let engine_line = format!("engine connection: {}", status.engine_state);
    if status.engine_state == "connected" {
        println!("  {}", engine_line.green());
    } else {
        println!("  {}", engine_line.yellow());
    }
    for component in status.components {
        let line = format!(
            "{:<20} {} ({} recent restarts{})",
            component.name,
            component.state,
            component.recent_restarts,
            if component.required { "" } else { ", optional" },
        );
        match component.state.as_str() {
            "running" => println!("  {}", line.green()),
            "failed" => println!("  {}", line.red()),
            _ => println!("  {}", line.yellow()),
        }
    }
    Ok(())
}
