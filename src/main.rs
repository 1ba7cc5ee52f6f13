//! mailbell - locked-screen email alarm client
//!
//! Listens to an alert server over redundant transports and turns every new
//! mail alert into a loud, persistent, multi-channel alarm.
//!
//! ## Usage
//!
//! ```bash
//! # Connect to the alert server and alarm on new mail
//! mailbell run --server http://10.0.0.170:8080
//!
//! # Fire a test alert through the normal delivery path
//! mailbell test-alert --duration 20
//!
//! # Validate the configuration file
//! mailbell check-config
//!
//! # With verbose logging
//! mailbell -v run
//! ```

use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mailbell_alert::{AlertActuator, AlertDispatcher, AlertJournal, Capabilities, PersistenceGuard};
use mailbell_core::types::now_epoch_secs;
use mailbell_core::ui::DEFAULT_UI_QUEUE_CAPACITY;
use mailbell_core::{
    AlertEvent, ConnectionState, LogGuard, MailbellConfig, MailbellError, UiHandle, UiUpdate,
    init_logging,
};
use mailbell_ingest::IngestSupervisor;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// mailbell email alarm
///
/// Receives new-mail alerts from an alert server and rings, vibrates and
/// notifies until the alert duration has passed.
#[derive(Parser, Debug)]
#[command(name = "mailbell")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.mailbell/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Configuration file (defaults to ~/.mailbell/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: AlertOverrides,

    #[command(subcommand)]
    command: Command,
}

/// Command-line values that take precedence over the configuration file.
#[derive(clap::Args, Debug, Default)]
struct AlertOverrides {
    /// Alert server base URL, e.g. http://10.0.0.170:8080
    #[arg(long, global = true)]
    server: Option<String>,

    /// Alert duration in seconds (10-300)
    #[arg(long, global = true)]
    duration: Option<u64>,

    /// Custom ringtone file
    #[arg(long, global = true)]
    ringtone: Option<PathBuf>,

    /// Do not hold wake locks while alerting or polling
    #[arg(long, global = true)]
    no_background: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the alert server and alarm on every new mail
    Run,
    /// Dispatch a synthetic alert and wait until it finishes
    TestAlert,
    /// Load and validate the configuration, then print it
    CheckConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    install_panic_hook();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            eprintln!("Error: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => {
            info!("mailbell exited normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("mailbell error: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<MailbellError>())
                .and_then(MailbellError::guidance)
            {
                eprintln!("Hint: {hint}");
            }
            ExitCode::from(1)
        }
    }
}

/// Route panics of background tasks into the log file as well as stderr.
fn install_panic_hook() {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        error!(panic = %panic_info, "task panicked");
        original_hook(panic_info);
    }));
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> mailbell_core::Result<LogGuard> {
    let debug = cli.verbose > 0;
    init_logging(cli.log_dir.clone(), debug)
}

fn load_config(cli: &Cli) -> Result<MailbellConfig> {
    let mut config = MailbellConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    let overrides = &cli.overrides;
    if let Some(server) = &overrides.server {
        config.server_url = Some(server.clone());
    }
    if let Some(duration) = overrides.duration {
        config.alert.duration_secs = duration;
    }
    if let Some(ringtone) = &overrides.ringtone {
        config.alert.ringtone = Some(ringtone.clone());
    }
    if overrides.no_background {
        config.alert.background_persistence = false;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::CheckConfig => check_config(&config),
        Command::TestAlert => test_alert(config).await,
        Command::Run => run_client(config).await,
    }
}

fn check_config(config: &MailbellConfig) -> Result<()> {
    let yaml = config.to_yaml().context("failed to render configuration")?;
    println!("{yaml}");
    match &config.server_url {
        Some(url) => println!("Configuration OK (server {url})"),
        None => println!("Configuration OK (no server configured; `run` needs --server)"),
    }
    Ok(())
}

/// The alert pipeline shared by `run` and `test-alert`.
struct Pipeline {
    caps: Capabilities,
    actuator: AlertActuator,
    dispatcher: Arc<AlertDispatcher>,
}

async fn build_pipeline(config: &MailbellConfig, ui: UiHandle) -> Result<Pipeline> {
    let caps = Capabilities::detect();
    let actuator = AlertActuator::new(caps.clone(), config.alert.clone())
        .context("failed to create alert actuator")?
        .with_ui(ui.clone());

    let mut dispatcher = AlertDispatcher::new(actuator.clone()).with_ui(ui);
    if config.journal.enabled {
        let path = config.journal.resolved_path()?;
        match AlertJournal::open(&path).await {
            Ok(journal) => dispatcher = dispatcher.with_journal(journal),
            Err(e) => warn!(path = %path.display(), error = %e, "alert journal disabled"),
        }
    }

    Ok(Pipeline {
        caps,
        actuator,
        dispatcher: Arc::new(dispatcher),
    })
}

async fn run_client(config: MailbellConfig) -> Result<()> {
    let server_url = config.require_server_url()?.to_string();

    let (ui, rx) = UiHandle::channel(DEFAULT_UI_QUEUE_CAPACITY);
    let shell = tokio::spawn(status_shell(rx));

    let pipeline = build_pipeline(&config, ui.clone()).await?;
    let guard = PersistenceGuard::from_capabilities(
        &pipeline.caps,
        config.alert.background_persistence,
    );
    let supervisor = IngestSupervisor::new(
        &config,
        Arc::new(ConnectionState::new()),
        pipeline.dispatcher.clone(),
        guard,
        ui,
    );

    supervisor
        .connect(&server_url)
        .with_context(|| format!("failed to connect to {server_url}"))?;
    info!(server_url = %server_url, "mailbell running; press Ctrl+C to quit");
    println!("Listening for alerts from {server_url}. Press Ctrl+C to quit.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutting down");
    pipeline.actuator.cancel();
    supervisor.disconnect();
    pipeline.actuator.wait_idle().await;
    shell.abort();

    println!(
        "Stopped. {} alert(s) received this session.",
        pipeline.dispatcher.count()
    );
    Ok(())
}

async fn test_alert(config: MailbellConfig) -> Result<()> {
    let (ui, rx) = UiHandle::channel(DEFAULT_UI_QUEUE_CAPACITY);
    let shell = tokio::spawn(status_shell(rx));

    let pipeline = build_pipeline(&config, ui).await?;
    let event = AlertEvent::new("Test alert", "This is a test email", now_epoch_secs());

    println!(
        "Alerting for {}s. Press Ctrl+C to stop.",
        config.alert.duration_secs
    );
    pipeline.dispatcher.dispatch(&event).await;

    tokio::select! {
        _ = pipeline.actuator.wait_idle() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            pipeline.actuator.cancel();
            pipeline.actuator.wait_idle().await;
        }
    }
    shell.abort();

    if let Some(summary) = pipeline.actuator.last_summary() {
        for report in &summary.reports {
            println!(
                "  {:<10} cycles={} failures={}{}",
                report.channel.to_string(),
                report.cycles,
                report.failures,
                if report.aborted { " (unavailable)" } else { "" }
            );
        }
    }
    Ok(())
}

/// Print status and alert lines as they arrive.
async fn status_shell(mut rx: mpsc::Receiver<UiUpdate>) {
    while let Some(update) = rx.recv().await {
        match update {
            UiUpdate::Status { worker, status } => println!("[{worker}] {status}"),
            UiUpdate::AlertReceived { count, entry } => {
                println!("#{count} {}", entry.format_line());
            }
            UiUpdate::WorkerRestarted { worker } => println!("[{worker}] restarted by watchdog"),
            UiUpdate::SessionEnded { .. } => println!("Alert finished"),
        }
    }
}
