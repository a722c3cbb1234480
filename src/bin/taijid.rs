//! Taiji Daemon - Push-notification broker
//!
//! This binary runs the broker: push clients connect to the client port and
//! say `HELO <id>`, operators connect to the control port and send messages.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! taijid start
//!
//! # Start the daemon (background/daemonized)
//! taijid start -d
//!
//! # Start on other ports
//! taijid start --client-port 7000 --control-port 7001
//!
//! # Stop the daemon
//! taijid stop
//!
//! # Check daemon status
//! taijid status
//!
//! # Enable debug logging
//! RUST_LOG=taijid=debug taijid start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: stop accepting connections and exit

use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use taijid::config::Config;
use taijid::registry::spawn_registry;
use taijid::server::PushServer;

/// taiji daemon - TCP push-notification broker
#[derive(Parser, Debug)]
#[command(name = "taijid", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        overrides: ConfigArgs,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status {
        #[command(flatten)]
        overrides: ConfigArgs,
    },
}

/// Settings that take precedence over the config file and environment.
#[derive(ClapArgs, Debug, Default)]
struct ConfigArgs {
    /// Config file (defaults to $TAIJI_CONFIG, then ~/.config/taiji/taiji.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port push clients connect to
    #[arg(long)]
    client_port: Option<u16>,

    /// Port the operator console listens on
    #[arg(long)]
    control_port: Option<u16>,

    /// Address both listeners bind to
    #[arg(long)]
    bind: Option<IpAddr>,
}

impl ConfigArgs {
    /// Loads the layered configuration with these flags applied last.
    fn resolve(&self) -> Result<Config> {
        let mut config = Config::discover(self.config.as_deref())?;

        if let Some(port) = self.client_port {
            config.client_port = port;
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(addr) = self.bind {
            config.bind_address = addr;
        }

        config.validate()?;
        Ok(config)
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("taiji")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("taijid.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("taijid.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
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
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        // Stale PID file
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
        daemon: false,
        overrides: ConfigArgs::default(),
    });

    match command {
        Command::Start { daemon, overrides } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'taijid stop' to stop it first.");
                process::exit(1);
            }

            // Resolve before daemonizing, which changes the working directory.
            let config = overrides.resolve()?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

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
        Command::Status { overrides } => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                let config = overrides.resolve()?;
                println!("Client port: {}", config.client_addr());
                println!("Control port: {}", config.control_addr());

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
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    let daemonize = Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr);

    daemonize.start().context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("taijid=info".parse()?)
                .add_directive("taiji_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        overflow_policy = %config.overflow_policy,
        inbox_capacity = config.inbox_capacity,
        "taiji daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.overflow_policy);
    info!("Client registry started");

    let server = match PushServer::bind(&config, registry, cancel_token).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        }
    };

    server.run().await;

    info!("taiji daemon stopped");
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
