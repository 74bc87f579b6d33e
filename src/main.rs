use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use portal_snapshot::auth::Authenticator;
use portal_snapshot::config::Config;
use portal_snapshot::constants::files;
use portal_snapshot::credentials::{load_credentials, Credentials};
use portal_snapshot::fs_utils::{ensure_dir, list_files_with_extension, write_diagnostic};
use portal_snapshot::poller::{AssetCollector, PollOutcome, Poller, SnapshotStore};
use portal_snapshot::schedule::{
    cancellable, resolve_start, Clock, PortalClock, Scheduler, WaitOutcome,
};
use portal_snapshot::session::{ChromiumConfig, ChromiumSession, SessionClient};
use portal_snapshot::shipper::{run_archive_path, ArtifactShipper};

#[derive(Parser)]
#[command(name = "portal-snapshot", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, wait for the scheduled start, and poll the target page
    Run,
    /// Log in once and report whether it worked
    Login,
    /// Zip and email the HTML files already in the output directory
    Ship,
    /// Send a test email with the configured SMTP settings
    SmtpTest,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping");
        signal_token.cancel();
    });

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_scraper(&config, &cancel).await,
        Command::Login => login_check(&config, &cancel).await,
        Command::Ship => ship_existing(&config).await,
        Command::SmtpTest => smtp_test(&config).await,
    }
}

async fn run_scraper(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let started = Instant::now();
    let run_stamp = current_run_stamp();
    info!(target_url = %config.target_url, run_stamp = %run_stamp, "Starting portal-snapshot");

    let credentials =
        load_credentials(&config.credentials_file).context("Failed to load credentials")?;
    ensure_dir(&config.output_dir).await?;

    let mut session = launch_session(config).await?;
    let result = drive_session(&mut session, config, &credentials, &run_stamp, cancel).await;
    session.shutdown().await;

    let outcome = result?;

    if config.ship_artifacts {
        let files: Vec<PathBuf> = outcome
            .iter()
            .flat_map(|o| o.snapshots.iter().map(|s| s.path.clone()))
            .collect();
        ship(config, &run_stamp, &files).await;
    }

    info!(
        successes = outcome.map_or(0, |o| o.successes),
        total_secs = started.elapsed().as_secs_f64(),
        "Run complete"
    );
    Ok(())
}

/// Login, schedule wait, and poll window. `None` when cancelled before polling.
async fn drive_session(
    session: &mut ChromiumSession,
    config: &Config,
    credentials: &Credentials,
    run_stamp: &str,
    cancel: &CancellationToken,
) -> Result<Option<PollOutcome>> {
    let authenticator = authenticator(config);
    let Some(login) = cancellable(cancel, authenticator.authenticate(session, credentials)).await
    else {
        info!("Cancelled during login");
        return Ok(None);
    };
    if !login.context("Login failed")? {
        bail!(
            "Login rejected, see {}",
            config.output_dir.join(files::LOGIN_FAILED).display()
        );
    }

    if config.save_home_page {
        save_home_page(session, config).await;
    }

    let clock: Arc<dyn Clock> = Arc::new(PortalClock);
    let scheduler = Scheduler::new(clock.clone());
    if let Some(target) = resolve_start(config.start_at, config.start_delay, clock.now()) {
        if scheduler.wait_until(target, cancel).await == WaitOutcome::Cancelled {
            info!("Cancelled while waiting for start time");
            return Ok(None);
        }
    }

    let assets = config.extract_assets.then(|| {
        AssetCollector::new(
            config
                .output_dir
                .join(format!("{}{run_stamp}", files::ASSET_DIR_PREFIX)),
            config.asset_extensions.clone(),
            config.page_timeout,
        )
    });
    let store = SnapshotStore::new(&config.output_dir, clock);
    let mut poller = Poller::new(
        authenticator,
        store,
        assets,
        config.poll_settings(),
        config.page_timeout,
    );

    let outcome = poller
        .poll_window(session, &config.target_url, credentials, cancel)
        .await
        .context("Poll window aborted")?;
    Ok(Some(outcome))
}

async fn login_check(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let credentials =
        load_credentials(&config.credentials_file).context("Failed to load credentials")?;
    ensure_dir(&config.output_dir).await?;

    let mut session = launch_session(config).await?;
    let authenticator = authenticator(config);
    let result = cancellable(cancel, authenticator.authenticate(&mut session, &credentials)).await;
    if matches!(result, Some(Ok(true))) && config.save_home_page {
        save_home_page(&mut session, config).await;
    }
    session.shutdown().await;

    let Some(result) = result else {
        info!("Cancelled during login");
        return Ok(());
    };
    if result.context("Login failed")? {
        info!("Login succeeded");
        Ok(())
    } else {
        bail!("Login rejected")
    }
}

async fn ship_existing(config: &Config) -> Result<()> {
    let files = list_files_with_extension(&config.output_dir, "html").await?;
    ship(config, &current_run_stamp(), &files).await;
    Ok(())
}

/// Zip `files` into this run's archive and mail it. Failures are logged only.
async fn ship(config: &Config, run_stamp: &str, files: &[PathBuf]) {
    let shipper = ArtifactShipper::new(
        run_archive_path(&config.output_dir, &config.archive_name, run_stamp),
        &config.smtp_config_file,
    );
    if !shipper.ship(files).await {
        warn!(files = files.len(), "Artifacts were not shipped");
    }
}

fn current_run_stamp() -> String {
    PortalClock.now().format("%Y%m%d_%H%M%S").to_string()
}

async fn smtp_test(config: &Config) -> Result<()> {
    let shipper = ArtifactShipper::new(
        config.output_dir.join(&config.archive_name),
        &config.smtp_config_file,
    );
    let receiver = shipper
        .send_test_message()
        .await
        .context("SMTP test failed")?;
    info!(receiver = %receiver, "SMTP test succeeded");
    Ok(())
}

fn authenticator(config: &Config) -> Authenticator {
    Authenticator::new(
        config.login_url.clone(),
        config.page_timeout,
        config.login_grace,
        config.output_dir.clone(),
    )
}

async fn launch_session(config: &Config) -> Result<ChromiumSession> {
    let chromium = ChromiumConfig {
        chrome_path: config.chrome_path.clone(),
        request_timeout: config.page_timeout,
        ..ChromiumConfig::default()
    };
    ChromiumSession::launch(&chromium)
        .await
        .context("Failed to launch browser")
}

async fn save_home_page(session: &mut ChromiumSession, config: &Config) {
    match session.content().await {
        Ok(markup) => {
            if let Err(e) = write_diagnostic(&config.output_dir, files::HOME_PAGE, &markup).await {
                warn!("Failed to save home page: {e:#}");
            }
        }
        Err(e) => warn!("Could not read post-login page: {e}"),
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,portal_snapshot=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
