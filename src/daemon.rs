//! Background daemon that keeps sources healthy, saved items fresh and the
//! library in sync.
//!
//! Runs the health monitor, cache eviction and sync trigger as independent
//! tasks, and refreshes saved items on its own timer.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::error;

use crate::app::{AppContext, EngineEvent, TankobonError};
use crate::config::EngineConfig;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Saved item refresh interval in seconds
    pub refresh_interval_secs: u64,
    /// Whether to refresh saved items immediately on start
    pub refresh_on_start: bool,
    /// Log file path (None = stdout)
    pub log_file: Option<PathBuf>,
}

impl DaemonConfig {
    /// The `--interval` flag when given, else the configured freshness
    /// interval.
    pub fn resolve_interval(flag: Option<&str>, engine: &EngineConfig) -> Result<u64, String> {
        match flag {
            Some(s) => Self::parse_interval(s),
            None => Ok(engine.freshness_interval().as_secs()),
        }
    }

    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> Result<u64, String> {
        let s = s.trim().to_lowercase();

        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c)),
            _ => (s.as_str(), None),
        };
        let multiplier = match unit {
            None | Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3600,
            Some('d') => 86400,
            Some(_) => {
                return Err(format!(
                    "Invalid interval: {}. Use format like '30s', '1h', '1d'",
                    s
                ))
            }
        };

        match digits.parse::<u64>() {
            Ok(0) => Err("Interval must be greater than zero".to_string()),
            Ok(n) => Ok(n * multiplier),
            Err(_) => Err(format!(
                "Invalid interval: {}. Use format like '30s', '1h', '1d'",
                s
            )),
        }
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs.is_multiple_of(86400) {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs.is_multiple_of(3600) {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs.is_multiple_of(60) {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Timestamped line log shared by the daemon's tasks.
#[derive(Debug, Clone)]
struct LogSink {
    file: Option<PathBuf>,
}

impl LogSink {
    fn line(&self, msg: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] {}", timestamp, msg);

        if let Some(ref log_path) = self.file {
            if let Ok(mut file) = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
            {
                let _ = writeln!(file, "{}", line);
            }
        } else {
            println!("{}", line);
        }
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    log: LogSink,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        let log = LogSink {
            file: config.log_file.clone(),
        };
        Self {
            ctx,
            config,
            log,
            running: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("tankobon").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        Self::running_pid().is_some()
    }

    fn running_pid() -> Option<u32> {
        let pid_path = Self::pid_file_path()?;
        let pid = fs::read_to_string(pid_path).ok()?.trim().parse::<u32>().ok()?;
        Self::process_exists(pid).then_some(pid)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    fn spawn_signal_handler(&self) {
        let running = self.running.clone();
        let shutdown = self.shutdown.clone();

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("Failed to set up signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            running.store(false, Ordering::SeqCst);
            shutdown.notify_one();
        });

        #[cfg(windows)]
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            running.store(false, Ordering::SeqCst);
            shutdown.notify_one();
        });
    }

    /// Writes notable engine events to the daemon log.
    fn spawn_event_logger(&self) -> JoinHandle<()> {
        let mut events = self.ctx.events.subscribe();
        let log = self.log.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    EngineEvent::SourceStatus { source, is_down } => log.line(&format!(
                        "Source {} is {}",
                        source,
                        if is_down { "down" } else { "up" }
                    )),
                    EngineEvent::ServerStatus { address, is_down } => log.line(&format!(
                        "Server {} is {}",
                        address,
                        if is_down { "down" } else { "up" }
                    )),
                    EngineEvent::SyncFinished { success } => log.line(if success {
                        "Sync complete"
                    } else {
                        "Sync finished with errors"
                    }),
                    EngineEvent::SessionExpired => {
                        log.line("Sync session expired, run `tankobon login` again")
                    }
                    _ => {}
                }
            }
        })
    }

    /// Run the daemon
    pub async fn run(&self) -> crate::app::Result<()> {
        if Self::is_running() {
            return Err(TankobonError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        self.write_pid_file()
            .map_err(|e| TankobonError::Other(format!("Failed to write PID file: {}", e)))?;

        self.spawn_signal_handler();
        let engine = &self.ctx.config.engine;

        self.log.line(&format!(
            "Tankobon daemon started (refresh interval: {}, PID: {})",
            DaemonConfig::format_interval(self.config.refresh_interval_secs),
            std::process::id()
        ));

        let drivers = self.ctx.bootstrap().await;
        self.log
            .line(&format!("Discovered {} sources", drivers.len()));

        let tasks = vec![
            self.spawn_event_logger(),
            tokio::spawn(self.ctx.health.clone().run()),
            tokio::spawn(
                self.ctx
                    .registry
                    .clone()
                    .run_cache_eviction(engine.cache_ttl()),
            ),
            tokio::spawn(
                self.ctx
                    .sync
                    .clone()
                    .run(engine.sync_debounce(), engine.sync_interval()),
            ),
        ];

        if self.config.refresh_on_start {
            self.log.line("Running initial refresh...");
            self.run_refresh().await;
        }

        let mut timer = interval(Duration::from_secs(self.config.refresh_interval_secs));
        timer.tick().await; // Skip the first immediate tick

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = timer.tick() => {}
                _ = self.shutdown.notified() => break,
            }

            self.log.line("Running scheduled refresh...");
            self.run_refresh().await;
        }

        self.log.line("Daemon shutting down...");
        for task in tasks {
            task.abort();
        }
        self.remove_pid_file();

        Ok(())
    }

    /// Refresh every saved item once
    async fn run_refresh(&self) {
        let start = Utc::now();

        match self.ctx.freshness.refresh().await {
            Ok(Some(report)) => {
                if report.total == 0 {
                    self.log.line("No saved items to refresh");
                    return;
                }
                let elapsed = Utc::now().signed_duration_since(start);
                self.log.line(&format!(
                    "Refresh complete: {} new chapters, {} updated, {} failed batches ({:.1}s)",
                    report.new_chapters,
                    report.patched,
                    report.failed_batches,
                    elapsed.num_milliseconds() as f64 / 1000.0
                ));
            }
            Ok(None) => self.log.line("Refresh already in progress"),
            Err(e) => self.log.line(&format!("Refresh failed: {}", e)),
        }
    }
}

/// Stop a running daemon by reading PID file and sending signal
pub fn stop_daemon() -> Result<(), String> {
    let pid_path =
        Daemon::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No daemon is running (PID file not found)".to_string());
    }

    let pid_str =
        fs::read_to_string(&pid_path).map_err(|e| format!("Failed to read PID file: {}", e))?;

    let pid: u32 = pid_str
        .trim()
        .parse()
        .map_err(|_| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .map_err(|e| format!("Failed to send signal: {}", e))?;

    #[cfg(windows)]
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status()
        .map_err(|e| format!("Failed to stop process: {}", e))?;

    if status.success() {
        let _ = fs::remove_file(&pid_path);
        Ok(())
    } else {
        Err(format!("Failed to stop daemon (PID {})", pid))
    }
}

/// Check daemon status
pub fn daemon_status() -> String {
    let Some(pid_path) = Daemon::pid_file_path() else {
        return "Daemon is not running".to_string();
    };
    if !pid_path.exists() {
        return "Daemon is not running".to_string();
    }
    match Daemon::running_pid() {
        Some(pid) => format!("Daemon is running (PID: {})", pid),
        None => "Daemon is not running (stale PID file)".to_string(),
    }
}
