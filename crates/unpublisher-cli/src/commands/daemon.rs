use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};

use unpublisher_core::ipc::is_daemon_running as is_socket_alive;
use unpublisher_core::{AppConfig, DaemonClient, DaemonServer, Runtime};

/// Process id of a running daemon, kept next to its runtime files
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn locate() -> Self {
        let dir = dirs::runtime_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"));
        Self {
            path: dir.join("unpublisher").join("daemon.pid"),
        }
    }

    fn read(&self) -> Option<u32> {
        let mut contents = String::new();
        fs::File::open(&self.path)
            .ok()?
            .read_to_string(&mut contents)
            .ok()?;
        contents.trim().parse().ok()
    }

    /// Pid of a live daemon; a stale file is removed
    fn live_pid(&self) -> Option<u32> {
        let pid = self.read()?;
        if process_alive(pid) {
            return Some(pid);
        }
        self.remove();
        None
    }

    fn write_current(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(())
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: &str) -> bool {
    std::process::Command::new("kill")
        .arg(signal)
        .arg(pid.to_string())
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    send_signal(pid, "-0")
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Resolve when Ctrl+C or SIGTERM arrives
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Start the daemon
pub async fn start(config: AppConfig) -> Result<()> {
    let pid_file = PidFile::locate();
    if let Some(pid) = pid_file.live_pid() {
        println!("Daemon is already running (PID: {})", pid);
        return Ok(());
    }

    println!("Starting unpublisher daemon...");

    let runtime = Runtime::open(&config).await?;
    pid_file.write_current()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    });

    let server = DaemonServer::new(runtime.admin.clone(), config.socket_path());
    let server_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move { server.run(server_rx).await });

    let scheduler = runtime.scheduler(&config);

    println!(
        "Daemon started (PID: {}). Press Ctrl+C or run 'unpublisher daemon stop' to stop.",
        std::process::id()
    );
    println!("  Policies: {}", config.policies.len());
    println!("  Check interval: {} seconds", config.scheduler.check_interval_secs);
    println!("  Worker poll interval: {} seconds", config.worker.poll_interval_secs);
    println!("  Socket: {}", config.socket_path().display());

    // Run scheduler (blocks until shutdown)
    scheduler.run(shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    match server_handle.await {
        Ok(Err(e)) => error!("IPC server failed: {}", e),
        Err(e) => error!("IPC server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    pid_file.remove();
    println!("Daemon stopped.");

    Ok(())
}

/// Stop the daemon: SIGTERM, then SIGKILL if it is still up after two seconds
pub async fn stop() -> Result<()> {
    let pid_file = PidFile::locate();
    let Some(pid) = pid_file.live_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Stopping daemon (PID: {})...", pid);

    #[cfg(unix)]
    {
        if !send_signal(pid, "-TERM") {
            println!("Failed to stop daemon. You may need to kill it manually: kill {}", pid);
            return Ok(());
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        if pid_file.live_pid().is_none() {
            println!("Daemon stopped successfully.");
        } else {
            send_signal(pid, "-9");
            pid_file.remove();
            println!("Daemon forcefully terminated.");
        }
    }

    #[cfg(not(unix))]
    println!("Please stop the daemon manually (PID: {})", pid);

    Ok(())
}

/// Show daemon status
pub async fn status(config: &AppConfig, token: Option<String>) -> Result<()> {
    let pid_file = PidFile::locate();
    let Some(pid) = pid_file.live_pid() else {
        println!("Daemon is not running.");
        return Ok(());
    };

    println!("Daemon is running (PID: {})", pid);
    println!("PID file: {}", pid_file.path.display());

    let socket_path = config.socket_path();
    if !is_socket_alive(&socket_path).await {
        println!("IPC socket is not responding: {}", socket_path.display());
        return Ok(());
    }

    if token.is_some() {
        let status = DaemonClient::new(socket_path).with_token(token).status().await?;
        println!("Uptime: {} seconds", status.uptime_secs);
        println!(
            "Policies: {} ({} enabled)",
            status.policies, status.enabled_policies
        );
    }

    Ok(())
}
