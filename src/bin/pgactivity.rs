//! pgactivity - watch and manage PostgreSQL backend activity.
//!
//! Usage:
//!   pgactivity                          # connect using PG* environment variables
//!   pgactivity -h db1 -U ops -d app     # explicit connection
//!   pgactivity --no-connect             # start with the connect dialog
//!   pgactivity --demo                   # simulated server, no database needed
//!   pgactivity --log-file /tmp/pga.log -v

use std::error::Error;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use pgactivity::activity::mock::{MockConnector, scenarios};
use pgactivity::activity::{ConnectionParams, Connector, PgConnector, SslMode};
use pgactivity::controller::ActivityController;
use pgactivity::tui::{App, EventHandler};
use pgactivity::worker::panic_message;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

/// UI tick: drives refresh timers and the countdown display.
const TICK_RATE: Duration = Duration::from_millis(250);

/// Interactive viewer for pg_stat_activity.
#[derive(Parser, Debug)]
#[command(name = "pgactivity", about = "PostgreSQL activity viewer", disable_help_flag = true)]
struct Args {
    /// Server host (default: PGHOST or localhost).
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Server port (default: PGPORT or 5432).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Database name (default: PGDATABASE or the user name).
    #[arg(short = 'd', long)]
    dbname: Option<String>,

    /// User name (default: PGUSER or $USER).
    /// The password is read from PGPASSWORD.
    #[arg(short = 'U', long)]
    user: Option<String>,

    /// TLS mode: disable, prefer or require.
    #[arg(long, env = "PGSSLMODE", default_value = "prefer", value_parser = SslMode::parse)]
    sslmode: SslMode,

    /// Refresh interval in seconds.
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Do not connect on start; open the connect dialog instead.
    #[arg(long)]
    no_connect: bool,

    /// Use a simulated server instead of PostgreSQL.
    #[arg(long)]
    demo: bool,

    /// Write logs to this file. Without it nothing is logged, since the
    /// terminal is taken by the UI.
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only log errors.
    #[arg(short, long)]
    quiet: bool,

    /// Print help.
    #[arg(long, action = clap::ArgAction::Help)]
    help: Option<bool>,
}

impl Args {
    /// Applies command line overrides on top of `base` (usually built from
    /// the environment). The database follows an overridden user unless a
    /// database was given explicitly, on the command line or via
    /// `database_from_env`.
    fn connection_params(&self, base: ConnectionParams, database_from_env: bool) -> ConnectionParams {
        let mut params = base;
        if let Some(host) = &self.host {
            params.host = host.clone();
        }
        if let Some(port) = self.port {
            params.port = port;
        }
        if let Some(user) = &self.user {
            params.user = user.clone();
            if self.dbname.is_none() && !database_from_env {
                params.database = user.clone();
            }
        }
        if let Some(dbname) = &self.dbname {
            params.database = dbname.clone();
        }
        params
    }
}

fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let Some(path) = log_file else {
        return Ok(());
    };
    let file = open_log_file(path)?;
    let level = log_level(verbose, quiet);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pgactivity={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

/// Sends panic reports to the log instead of stderr, where they would
/// write over the terminal UI. Panics inside background work and callbacks
/// are caught and shown in the status line, so the log keeps the location.
/// Without a log file the default hook stays.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_default();
        error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = %location,
            "panic: {}",
            panic_message(info.payload())
        );
        if !tracing::dispatcher::has_been_set() {
            previous(info);
        }
    }));
}

fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet, args.log_file.as_deref()) {
        eprintln!("Error: cannot set up logging: {}", e);
        std::process::exit(1);
    }
    install_panic_hook();
    info!("pgactivity {} starting", env!("CARGO_PKG_VERSION"));

    let params = args.connection_params(
        ConnectionParams::from_env(),
        std::env::var_os("PGDATABASE").is_some(),
    );
    let connector: Box<dyn Connector> = if args.demo {
        info!("demo mode");
        Box::new(MockConnector::new(scenarios::demo_server()))
    } else {
        Box::new(PgConnector::new(args.sslmode))
    };
    info!(
        "Config: server={}, port={}, sslmode={:?}, interval={}s",
        params.label(),
        params.port,
        args.sslmode,
        args.interval
    );

    let events = EventHandler::new(TICK_RATE);
    let controller = match ActivityController::spawn(
        connector,
        Duration::from_secs(args.interval),
        events.waker(),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: cannot start background worker: {}", e);
            std::process::exit(1);
        }
    };

    let app = App::new(controller, events, params, !args.no_connect);
    if let Err(e) = app.run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("pgactivity").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.interval, 10);
        assert!(!args.demo);
        assert!(!args.no_connect);
        assert!(args.log_file.is_none());
    }

    #[test]
    fn rejects_zero_interval_and_bad_sslmode() {
        let argv = ["pgactivity", "--interval", "0"];
        assert!(Args::try_parse_from(argv).is_err());
        let argv = ["pgactivity", "--sslmode", "verify-full"];
        assert!(Args::try_parse_from(argv).is_err());
    }

    #[test]
    fn sslmode_is_parsed() {
        let args = parse(&["--sslmode", "require"]);
        assert_eq!(args.sslmode, SslMode::Require);
    }

    #[test]
    fn overrides_apply_on_top_of_environment() {
        let base = ConnectionParams {
            host: "envhost".to_string(),
            port: 5433,
            database: "envuser".to_string(),
            user: "envuser".to_string(),
            password: "pw".to_string(),
        };

        let args = parse(&["-h", "db1", "-U", "ops"]);
        let params = args.connection_params(base.clone(), false);
        assert_eq!(params.host, "db1");
        assert_eq!(params.port, 5433);
        assert_eq!(params.user, "ops");
        assert_eq!(params.database, "ops");
        assert_eq!(params.password, "pw");

        // A database from PGDATABASE is kept.
        let params = args.connection_params(base.clone(), true);
        assert_eq!(params.database, "envuser");

        let args = parse(&["-U", "ops", "-d", "app", "-p", "6432"]);
        let params = args.connection_params(base, false);
        assert_eq!(params.database, "app");
        assert_eq!(params.port, 6432);
    }

    #[test]
    fn log_levels() {
        assert_eq!(log_level(0, false), Level::INFO);
        assert_eq!(log_level(1, false), Level::DEBUG);
        assert_eq!(log_level(3, false), Level::TRACE);
        assert_eq!(log_level(2, true), Level::ERROR);
    }

    #[test]
    fn log_file_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgactivity.log");

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();
        drop(file);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn no_log_file_means_no_logging_setup() {
        assert!(init_logging(2, false, None).is_ok());
    }
}
