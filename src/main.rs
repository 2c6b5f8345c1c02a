use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tankobon::app::AppContext;
use tankobon::cli::{commands, Cli, Commands, DaemonAction};
use tankobon::config::Config;
use tankobon::daemon::{self, Daemon, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Daemon control never needs the database
    if let Commands::Daemon { action } = &cli.command {
        match action {
            DaemonAction::Stop => {
                daemon::stop_daemon().map_err(anyhow::Error::msg)?;
                println!("Daemon stopped");
                return Ok(());
            }
            DaemonAction::Status => {
                println!("{}", daemon::daemon_status());
                return Ok(());
            }
            DaemonAction::Start { .. } => {}
        }
    }

    let ctx = AppContext::new(config, None)?;
    let source = cli.source.as_deref();

    match cli.command {
        Commands::Sources => commands::list_sources(&ctx).await?,
        Commands::Browse {
            category,
            status,
            page,
        } => commands::browse(&ctx, source, category.as_deref(), &status, page).await?,
        Commands::Search { keyword, page } => {
            commands::search(&ctx, source, &keyword, page).await?
        }
        Commands::Suggest { keyword } => commands::suggest(&ctx, source, &keyword).await?,
        Commands::Show { id } => commands::show(&ctx, source, &id).await?,
        Commands::Chapter { id, extra } => commands::chapter(&ctx, source, &id, extra).await?,
        Commands::Save { id } => commands::save(&ctx, source, &id).await?,
        Commands::Unsave { id } => commands::unsave(&ctx, source, &id).await?,
        Commands::Read { id, chapter, page } => {
            commands::read(&ctx, source, &id, &chapter, page).await?
        }
        Commands::Library => commands::list_library(&ctx)?,
        Commands::History { limit } => commands::list_history(&ctx, limit)?,
        Commands::Refresh => commands::refresh(&ctx).await?,
        Commands::Sync => commands::sync(&ctx).await?,
        Commands::Login { email, password } => commands::login(&ctx, &email, &password).await?,
        Commands::Register { email, password } => {
            commands::register(&ctx, &email, &password).await?
        }
        Commands::Settings { set } => commands::settings(&ctx, set.as_deref()).await?,
        Commands::Logout => commands::logout(&ctx)?,
        Commands::Whoami => commands::whoami(&ctx).await?,
        Commands::ClearRemote { yes } => commands::clear_remote(&ctx, yes).await?,
        Commands::Daemon { action } => {
            if let DaemonAction::Start {
                interval,
                no_initial_refresh,
                log,
                foreground,
            } = action
            {
                let refresh_interval_secs =
                    DaemonConfig::resolve_interval(interval.as_deref(), &ctx.config.engine)
                        .map_err(anyhow::Error::msg)?;

                if !foreground {
                    spawn_detached(&cli.config, refresh_interval_secs, no_initial_refresh, &log)?;
                    return Ok(());
                }

                let daemon = Daemon::new(
                    Arc::new(ctx),
                    DaemonConfig {
                        refresh_interval_secs,
                        refresh_on_start: !no_initial_refresh,
                        log_file: log,
                    },
                );
                daemon.run().await?;
            }
        }
    }

    Ok(())
}

/// Re-launches this binary in the foreground as a background process.
fn spawn_detached(
    config: &Option<std::path::PathBuf>,
    refresh_interval_secs: u64,
    no_initial_refresh: bool,
    log: &Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    use std::process::{Command, Stdio};

    if Daemon::is_running() {
        anyhow::bail!("Another daemon instance is already running");
    }

    let mut cmd = Command::new(std::env::current_exe()?);
    if let Some(config) = config {
        cmd.arg("--config").arg(config);
    }
    let interval = DaemonConfig::format_interval(refresh_interval_secs);
    cmd.args(["daemon", "start", "--foreground", "--interval", &interval]);
    if no_initial_refresh {
        cmd.arg("--no-initial-refresh");
    }
    if let Some(log) = log {
        cmd.arg("--log").arg(log);
    }

    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    println!(
        "Daemon started (PID: {}, refresh interval: {})",
        child.id(),
        interval
    );
    Ok(())
}
