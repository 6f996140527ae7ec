//! `skyalert-firehose` binary entry point.

use clap::{Parser, Subcommand};
use skyalert::api::{
    CachedAccounts, Session, SessionEvent, XrpcClient, XrpcConfig, DEFAULT_SERVICE,
};
use skyalert::config::{DataPaths, FirehoseConfig, LoginInfo, DEFAULT_RELAY};
use skyalert::queue::DEFAULT_CAPACITY;
use skyalert::{
    Collaborators, CursorFile, Pipeline, Result, RetryPolicy, Seq, WatchSource, WebSocketSource,
    YamlWatchStore,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "skyalert-firehose", version, about = "Notify watchers of new posts and reposts from the firehose")]
struct Cli {
    /// Directory holding config.yaml, login-info.yaml and the cursor file.
    #[arg(long, env = "SKYALERT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Relay to subscribe to.
    #[arg(long, env = "SKYALERT_RELAY", default_value = DEFAULT_RELAY)]
    relay: String,

    /// PDS used for login, lookups and DMs.
    #[arg(long, env = "SKYALERT_SERVICE", default_value = DEFAULT_SERVICE)]
    service: String,

    /// Worker threads (default: 2 x cores - 1).
    #[arg(long, env = "SKYALERT_WORKERS")]
    workers: Option<usize>,

    /// Work queue capacity, in frames.
    #[arg(long, env = "SKYALERT_QUEUE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    queue_capacity: usize,

    /// Start from this sequence number instead of the saved cursor.
    #[arg(long, env = "SKYALERT_CURSOR")]
    cursor: Option<u64>,

    /// Ignore the saved cursor and start from the live stream.
    #[arg(long, env = "SKYALERT_NO_RESUME")]
    no_resume: bool,

    /// Debug logging for this crate.
    #[arg(short, long, env = "SKYALERT_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the firehose bot (default).
    Run,
    /// Summarize the watch document and exit.
    Audit,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,skyalert=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "skyalert-firehose failed");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let paths = DataPaths::new(&cli.data_dir);
    match cli.command.unwrap_or(Command::Run) {
        Command::Audit => audit(&paths),
        Command::Run => run_firehose(cli, &paths),
    }
}

fn audit(paths: &DataPaths) -> Result<i32> {
    let snapshot = YamlWatchStore::new(paths.watches()).load()?;
    let audit = snapshot.audit();

    println!("Active follow watches: {}", audit.follow_watches);
    match &audit.top_watcher {
        Some((handle, count)) => {
            println!("User with most watches: {} (with {} watches)", handle, count)
        }
        None => println!("No watchers found."),
    }
    println!("Unique watchers: {}", audit.unique_watchers);
    println!("Unique subjects: {}", audit.unique_subjects);
    Ok(0)
}

fn run_firehose(cli: &Cli, paths: &DataPaths) -> Result<i32> {
    let _lock = paths.acquire_lock()?;

    let mut config = FirehoseConfig {
        relay: cli.relay.clone(),
        queue_capacity: cli.queue_capacity,
        ..Default::default()
    };
    if let Some(workers) = cli.workers {
        config.workers = workers.max(1);
    }

    // --- Session ---
    let login = LoginInfo::load(paths.login())?;
    let login_path = paths.login();
    let client = XrpcClient::new(
        XrpcConfig {
            service: cli.service.clone(),
            timeout: config.api_timeout,
            // Retries happen once, around whole notifier operations.
            retry: RetryPolicy::none(),
        },
        login.credentials(),
    )
    .with_session_callback(Box::new(move |event: SessionEvent, session: &Session| {
        match LoginInfo::save_firehose_session(&login_path, session) {
            Ok(()) => tracing::debug!(?event, "session saved"),
            Err(e) => tracing::warn!(?event, error = %e, "cannot save session"),
        }
    }));
    match login.firehose_session() {
        Some(session) => client.resume(session)?,
        None => client.login()?,
    }
    let client = Arc::new(client);

    let collaborators = Collaborators {
        watches: Arc::new(YamlWatchStore::new(paths.watches())),
        accounts: Arc::new(CachedAccounts::new(client.clone(), config.profile_cache)),
        posts: client.clone(),
        dispatcher: client,
    };

    // --- Cursor ---
    let cursor_file = CursorFile::new(paths.cursor());
    let initial = match (cli.cursor, cli.no_resume) {
        (Some(seq), _) => Some(Seq(seq)),
        (None, true) => None,
        (None, false) => cursor_file.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "saved cursor unreadable, starting from the live stream");
            None
        }),
    };

    // --- Signals ---
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;

    let source = Arc::new(WebSocketSource::new(&config.relay, config.read_timeout));
    let report = Pipeline::new(config, source, collaborators)
        .with_cursor_file(cursor_file)
        .run(initial, shutdown)?;

    if let Some(cause) = &report.cause {
        tracing::info!(cause = %cause, undrained = report.undrained, "shutdown complete");
    }
    Ok(report.exit_code)
}
