//! Sitekeeper Daemon - device polling and control loop
//!
//! This binary supervises the site's field devices: it polls relays and
//! Modbus controllers, publishes their readings, and runs the safety
//! control loop (generator hysteresis, purifier status, alarms) under a
//! crash-restarting supervisor.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (background, default)
//! sitekeeperd start
//!
//! # Start in the foreground
//! sitekeeperd start --foreground
//!
//! # Start with a custom config and the simulated device table
//! sitekeeperd start --config ./config.toml --sim
//!
//! # Stop the daemon
//! sitekeeperd stop
//!
//! # Check daemon status
//! sitekeeperd status
//! ```

use std::env;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sitekeeper_core::HysteresisBand;
use sitekeeper_transport::{Controller, MqttController};
use sitekeeperd::config::{Config, DEFAULT_CONFIG_PATH};
use sitekeeperd::inbound::spawn_inbound_task;
use sitekeeperd::manager::DeviceManager;
use sitekeeperd::supervisor::Supervisor;

/// Sitekeeper daemon - site device supervisor
#[derive(Parser, Debug)]
#[command(name = "sitekeeperd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Stay in the foreground instead of daemonizing
        #[arg(short = 'f', long)]
        foreground: bool,

        /// Configuration file path
        #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Use the simulated device table
        #[arg(long)]
        sim: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn pid_file_path() -> PathBuf {
    if let Ok(path) = env::var("SITEKEEPER_PID_FILE") {
        return PathBuf::from(path);
    }
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sitekeeper");
    state_dir.join("sitekeeperd.pid")
}

fn log_file_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sitekeeper");
    state_dir.join("sitekeeper.log")
}

fn read_pid() -> Option<u32> {
    let path = pid_file_path();
    let mut file = File::open(&path).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let path = pid_file_path();
    let _ = fs::remove_file(path);
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        foreground: false,
        config: PathBuf::from(DEFAULT_CONFIG_PATH),
        sim: false,
    });

    match command {
        Command::Start {
            foreground,
            config,
            sim,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'sitekeeperd stop' to stop it first.");
                process::exit(1);
            }

            if !foreground {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config, sim);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config_path: PathBuf, sim_flag: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_env("SITEKEEPER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        config = %config_path.display(),
        "Sitekeeper daemon starting"
    );

    let config = Config::load(&config_path)?;
    let sim = sim_flag || config.sim;

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let controller: Arc<dyn Controller> = Arc::new(
        MqttController::connect(
            &config.mqtt,
            config.site_path.clone(),
            cancel_token.child_token(),
        )
        .await?,
    );

    let mut manager = DeviceManager::new(Arc::clone(&controller), config.device_diagnostics);
    manager.load(config.device_rows(sim));
    let manager = Arc::new(manager);
    manager.run(&cancel_token);
    info!(devices = manager.len(), sim, "Device registry loaded");

    let inbound_handle = spawn_inbound_task(
        Arc::clone(&controller),
        Arc::clone(&manager),
        config.alarm_recipients.clone(),
        cancel_token.child_token(),
    );

    let band = HysteresisBand::new(config.thresholds.lower_soc, config.thresholds.upper_soc);
    let supervisor = Supervisor::new(
        Arc::clone(&controller),
        Arc::clone(&manager),
        band,
        config.alarm_recipients.clone(),
    );
    supervisor.run(cancel_token.clone()).await;

    manager.shutdown().await;
    if let Err(e) = inbound_handle.await {
        error!(error = %e, "Inbound task did not exit cleanly");
    }

    info!("Sitekeeper daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
