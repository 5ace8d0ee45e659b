use clap::Parser;
use init_setup::error::{InitSetupError, Result};
use init_setup::setup::{self, SetupConfig, TickOutcome, Wizard};
use init_setup::web::{self, PageContext};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "init-setup")]
#[command(author, version, about = "Resumable first-boot provisioning wizard")]
struct Args {
    /// Run the next requested step and exit (meant for cron or a systemd timer)
    #[arg(long)]
    run_step: bool,

    /// Path to config file (default: /etc/init-setup/init-setup.toml)
    #[arg(long)]
    config: Option<String>,

    /// Simulate all commands without making real changes
    #[arg(long)]
    dryrun: bool,

    /// Log file path (logs go to stderr if not specified)
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.log_file.as_deref());

    let mut config = match args.config.as_deref() {
        Some(path) => SetupConfig::load_from(path)?,
        None => SetupConfig::load()?,
    };

    // --dryrun flag overrides config
    if args.dryrun {
        config.general.dryrun = true;
    }

    if !config.general.dryrun && !setup::is_root() {
        warn!("Not running as root; systemctl and privileged ports will likely fail");
    }

    let wizard = Wizard::new(config)?;

    let result = if args.run_step {
        run_step(wizard).await
    } else {
        serve(wizard).await
    };

    if let Err(ref e) = result {
        error!("init-setup error: {}", e);
    }

    result
}

fn init_logging(log_file: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file = log_file.and_then(|path| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .ok()
    });

    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(file)
            .with_ansi(false)
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

async fn run_step(wizard: Wizard) -> Result<()> {
    info!("Starting init-setup runner");

    let runner = wizard.runner();
    let (outcome, logs) = tokio::task::spawn_blocking(move || {
        let outcome = runner.tick()?;
        let logs = match outcome {
            TickOutcome::Ran { .. } => Some(runner.log().read_all()?),
            TickOutcome::Idle => None,
        };
        Ok::<_, setup::SetupError>((outcome, logs))
    })
    .await
    .map_err(|e| InitSetupError::Server(format!("runner task failed: {e}")))??;

    info!("Runner finished: {:?}", outcome);

    // Cron mails stdout to the operator; the journal keeps it for timers
    if let Some(logs) = logs {
        println!("{logs}");
    }

    Ok(())
}

async fn serve(wizard: Wizard) -> Result<()> {
    info!("Starting init-setup web UI");

    let addr: SocketAddr = wizard
        .config()
        .server
        .bind
        .parse()
        .map_err(|e| InitSetupError::Server(format!("invalid bind address: {e}")))?;

    wizard.reset_log_on_start()?;
    // Creates the state file on first start
    wizard.store().load()?;

    let gateway = Arc::new(wizard.gateway());
    let pages = Arc::new(PageContext::new(wizard.config().general.title.clone()));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down web UI");
    };

    let (bound, server) = web::bind(gateway, pages, addr, shutdown)?;
    info!("Serving setup UI on http://{}", bound);
    server.await;

    Ok(())
}
