//! inbox-miner CLI: pull matching emails into SQLite.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use inbox_miner::config::{load_config, load_default_config, AuthType, Settings};
use inbox_miner::db::{activity_repo, email_repo, Database, EmailSink};
use inbox_miner::mail::{
    connector_from_settings, credentials_from_settings, CredentialProvider, DatePredicate,
    MailError, OAuthCredentialProvider,
};
use inbox_miner::pipeline::{
    ExtractionReport, ExtractionRequest, IngestionPipeline, ProgressEvent, ProgressReporter,
};
use inbox_miner::secrets::expand_home;
use inbox_miner::{logging, ConfigError, InboxMinerError, Result};

#[derive(Parser)]
#[command(
    name = "inbox-miner",
    version,
    about = "Extract matching emails from an IMAP or Microsoft Graph mailbox into SQLite"
)]
struct Cli {
    /// JSON config file. Built-in defaults plus environment overrides when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the mailbox and store every new matching message.
    Extract(ExtractArgs),

    /// Show counts of stored messages.
    Stats {
        /// Only count rows tagged with this processor type.
        #[arg(long)]
        processor: Option<String>,
    },

    /// Run the OAuth2 device flow and cache the token.
    Authorize {
        /// Discard any cached token first.
        #[arg(long)]
        force: bool,
    },

    /// Show recent activity log entries.
    Logs {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Args)]
struct ExtractArgs {
    /// Sender address or name substring.
    #[arg(long)]
    sender: Option<String>,

    /// Subject substring.
    #[arg(long)]
    subject: Option<String>,

    /// Received on this day (YYYY-MM-DD).
    #[arg(long, conflicts_with_all = ["since", "from", "to"])]
    on: Option<NaiveDate>,

    /// Received on or after this day (YYYY-MM-DD).
    #[arg(long, conflicts_with_all = ["from", "to"])]
    since: Option<NaiveDate>,

    /// Start of an inclusive date range (YYYY-MM-DD).
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// End of an inclusive date range (YYYY-MM-DD).
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,

    /// Processor profile from the config; tags stored rows with its name.
    #[arg(long)]
    processor: Option<String>,
}

impl ExtractArgs {
    fn date(&self) -> std::result::Result<Option<DatePredicate>, MailError> {
        match (self.on, self.since, self.from, self.to) {
            (Some(day), _, _, _) => Ok(Some(DatePredicate::Equals(day))),
            (_, Some(day), _, _) => Ok(Some(DatePredicate::After(day))),
            (_, _, Some(start), Some(end)) => DatePredicate::range(start, end).map(Some),
            _ => Ok(None),
        }
    }
}

/// Prints one line per message to stdout.
struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Found { total } => println!("Found {} matching messages", total),
            ProgressEvent::Stored {
                index,
                total,
                message_id,
            } => println!("[{}/{}] stored   {}", index, total, message_id),
            ProgressEvent::Skipped {
                index,
                total,
                message_id,
            } => println!("[{}/{}] skipped  {}", index, total, message_id),
            ProgressEvent::Failed {
                index,
                total,
                handle,
                error,
            } => println!("[{}/{}] failed   {}: {}", index, total, handle, error),
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };
    Ok(settings)
}

fn open_database(settings: &Settings) -> Result<Database> {
    let path = PathBuf::from(expand_home(&settings.database.path));
    Ok(Database::open(&path)?)
}

/// Resolves the requests to run: one, or one per sender pattern of a profile.
fn plan_requests(settings: &Settings, args: &ExtractArgs) -> Result<Vec<ExtractionRequest>> {
    let request = ExtractionRequest {
        sender: args.sender.clone(),
        subject: args.subject.clone(),
        date: args.date()?,
        processor_type: args.processor.clone(),
    };

    let Some(name) = &args.processor else {
        return Ok(vec![request]);
    };

    match settings.processors.get(name) {
        Some(profile) if profile.enabled => Ok(request.for_profile(name, profile)),
        Some(_) => Err(ConfigError::validation(format!("Processor '{}' is disabled", name)).into()),
        // Unknown names are just a tag.
        None => Ok(vec![request]),
    }
}

async fn extract(settings: &Settings, args: &ExtractArgs) -> Result<()> {
    let requests = plan_requests(settings, args)?;
    let db = open_database(settings)?;
    let credentials = credentials_from_settings(&settings.mailbox, &db)?;
    let sink: Arc<dyn EmailSink> = Arc::new(db);

    let mut total = ExtractionReport::default();
    for request in &requests {
        let connector = connector_from_settings(&settings.mailbox, credentials.clone())?;
        let mut pipeline =
            IngestionPipeline::new(connector, sink.clone()).with_progress(Arc::new(ConsoleProgress));

        let report = pipeline.run_with_report(request).await?;
        total.found += report.found;
        total.stored += report.stored;
        total.skipped += report.skipped;
        total.failed += report.failed;
        total.elapsed += report.elapsed;
    }

    println!("Extraction complete: {}", total);
    Ok(())
}

fn stats(settings: &Settings, processor: Option<&str>) -> Result<()> {
    let db = open_database(settings)?;
    let stats = email_repo::extraction_stats(&db, processor)?;

    println!("Processor:    {}", stats.processor_type.as_deref().unwrap_or("(all)"));
    println!("Total:        {}", stats.total);
    println!("Processed:    {}", stats.processed);
    println!("Unprocessed:  {}", stats.unprocessed);
    match stats.latest_extraction {
        Some(at) => println!("Latest:       {} UTC", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Latest:       never"),
    }
    Ok(())
}

async fn authorize(settings: &Settings, force: bool) -> Result<()> {
    let mailbox = &settings.mailbox;
    let oauth2 = match (&mailbox.auth.auth_type, &mailbox.auth.oauth2) {
        (AuthType::OAuth2, Some(oauth2)) => oauth2,
        _ => {
            return Err(ConfigError::validation(
                "authorize needs mailbox.auth.type = \"oauth2\" with an oauth2 block",
            )
            .into())
        }
    };
    if oauth2.has_static_token() {
        return Err(ConfigError::validation(
            "a static access token is configured; nothing to authorize",
        )
        .into());
    }

    let db = open_database(settings)?;
    let provider = OAuthCredentialProvider::new(
        db,
        mailbox.username.clone(),
        oauth2.clone(),
        mailbox.backend,
    )?;

    if force {
        provider.forget()?;
        provider.authorize().await?;
    } else {
        provider.acquire().await?;
    }

    println!("Authorized {} ({})", mailbox.username, provider.scopes().join(" "));
    Ok(())
}

fn logs(settings: &Settings, limit: u32) -> Result<()> {
    let db = open_database(settings)?;
    for row in activity_repo::list_recent(&db, limit)? {
        println!(
            "{}  {:<16} {:<8} {:<10} {}{}",
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.action,
            row.status,
            row.processor_type.as_deref().unwrap_or("-"),
            row.message.as_deref().unwrap_or(""),
            row.error_details
                .as_deref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    logging::init(&settings.logging)?;
    info!("inbox-miner {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Extract(args) => extract(&settings, &args).await,
        Commands::Stats { processor } => stats(&settings, processor.as_deref()),
        Commands::Authorize { force } => authorize(&settings, force).await,
        Commands::Logs { limit } => logs(&settings, limit),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            match e {
                InboxMinerError::Config(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}
