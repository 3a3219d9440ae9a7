mod config;
mod database;
mod logging;
mod notify;
mod pool;
mod prompt;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use watchpost::{
    build_site, CheckScheduler, PromptAnswer, Site, SiteDraft, SiteStore, SiteWarning,
    ValidationExecutor,
};

use config::Config;
use database::SqlRepository;
use notify::{BusNotifier, EngineEvent};
use pool::{LibsqlManager, LibsqlPool};
use prompt::BusPrompt;

#[derive(Parser)]
#[command(name = "watchpost", version, about = "Periodic website validation service")]
struct Args {
    /// Config file path; defaults to $XDG_CONFIG_HOME/watchpost/config.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitoring service (the default).
    Run,
    /// Add a site to the monitored set.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// Check interval in seconds.
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Validation mode: status_code, term_search or script.
        #[arg(long, default_value = "status_code")]
        mode: String,
        /// Search term or script source, depending on the mode.
        #[arg(long)]
        content: Option<String>,
    },
    /// Remove a site and its certificate approval.
    Remove { id: Uuid },
    /// List monitored sites and their last verdicts.
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    let config = Config::load(args.config.as_ref())?;

    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await?;
    let setup_conn = database.connect()?;
    database::initialize_database(&setup_conn).await?;

    let pool = LibsqlPool::builder(LibsqlManager::new(database)).build()?;
    let repository = Arc::new(SqlRepository::new(pool));

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_service(&config, repository).await,
        Command::Add { name, url, interval, mode, content } => {
            let draft = SiteDraft {
                name,
                url,
                interval_secs: Some(interval),
                mode,
                content,
            };
            let site = add_site(&repository, &draft).await?;
            println!("added site {} ({})", site.name, site.id);
            Ok(())
        }
        Command::Remove { id } => {
            repository.delete_site(id).await?;
            println!("removed site {id}");
            Ok(())
        }
        Command::List => {
            for site in repository.list_sites().await? {
                let verdict = site
                    .last_verdict()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "unchecked".into());
                println!(
                    "{}  {}  every {}s  [{}]  {}",
                    site.id,
                    site.url,
                    site.interval.as_secs(),
                    site.rule.kind(),
                    verdict
                );
            }
            Ok(())
        }
    }
}

async fn run_service(config: &Config, repository: Arc<SqlRepository>) -> Result<()> {
    info!(database = %config.database.path, "configuration loaded");

    let prompt = Arc::new(BusPrompt::new());
    let executor = ValidationExecutor::builder()
        .site_store(repository.clone())
        .approval_store(repository.clone())
        .trust_prompt(prompt.clone())
        .notifier(Arc::new(BusNotifier))
        .config(config.engine_config())
        .build()?;

    // With a terminal attached the operator is watching: suppress the
    // background notification lines and answer trust prompts on stdin.
    // Headless runs leave prompts unanswered and let the engine's
    // default-deny timeout resolve them.
    let interactive = std::io::stdin().is_terminal();
    notify::set_app_foreground(interactive);
    if interactive {
        spawn_trust_responder(prompt);
    }

    let scheduler = CheckScheduler::new(Arc::new(executor), repository);
    let watching = scheduler.start().await?;
    info!(watching, "watchpost service running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    scheduler.shutdown();

    Ok(())
}

/// Validate a draft and persist the resulting site.
async fn add_site(repository: &SqlRepository, draft: &SiteDraft) -> Result<Site> {
    let (site, warnings) = match build_site(draft) {
        Ok(built) => built,
        Err(errors) => bail!("invalid site: {errors}"),
    };

    for warning in warnings {
        match warning {
            SiteWarning::InsecureScheme => {
                warn!(url = %site.url, "plain-http site; the exchange is unauthenticated");
            }
        }
    }

    repository.insert_site(&site).await?;
    Ok(site)
}

/// Answer certificate trust requests interactively over stdin.
fn spawn_trust_responder(prompt: Arc<BusPrompt>) {
    let mut events = notify::subscribe();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            let EngineEvent::TrustRequested { request_id, site_id, fingerprint } = event else {
                continue;
            };

            println!("site {site_id} presented an untrusted certificate (sha256 {fingerprint})");
            println!("trust this certificate? [y/N]");
            let accepted = matches!(
                lines.next_line().await,
                Ok(Some(line)) if line.trim().eq_ignore_ascii_case("y")
            );
            let answer = if accepted { PromptAnswer::Accepted } else { PromptAnswer::Rejected };

            if !prompt.answer(request_id, answer) {
                warn!(%request_id, "trust answer arrived after the prompt expired");
            }
        }
    });
}
