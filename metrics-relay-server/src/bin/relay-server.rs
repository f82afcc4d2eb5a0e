use std::{env, process::ExitCode, sync::Arc};

use getopts::{Matches, Options};
use metrics_relay::{MemoryStore, Store};
use metrics_relay_server::ServerBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt(
        "a",
        "address",
        "listen address, env ADDRESS (default: localhost:8080)",
        "HOST:PORT",
    );
    opts.optopt(
        "d",
        "database",
        "SQLite database path, env DATABASE_DSN (default: in-memory storage)",
        "PATH",
    );
    opts.optopt("k", "key", "payload verification key, env KEY", "KEY");
    opts.optflag("h", "help", "print this help menu");

    opts
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {program} [options]");
    print!("{}", opts.usage(&brief));
}

/// Looks up a setting, letting a non-empty environment variable override the flag.
fn setting(matches: &Matches, opt: &str, var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.is_empty()).or_else(|| matches.opt_str(opt))
}

#[cfg(feature = "sqlite")]
fn open_store(dsn: Option<String>) -> Result<Arc<dyn Store>, String> {
    match dsn.filter(|dsn| !dsn.is_empty()) {
        Some(path) => {
            let store = metrics_relay::SqliteStore::open(&path).map_err(|e| e.to_string())?;
            info!(%path, "Using SQLite storage.");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory storage.");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[cfg(not(feature = "sqlite"))]
fn open_store(dsn: Option<String>) -> Result<Arc<dyn Store>, String> {
    if dsn.is_some_and(|dsn| !dsn.is_empty()) {
        return Err("built without the `sqlite` feature, DATABASE_DSN is not supported".into());
    }
    info!("Using in-memory storage.");
    Ok(Arc::new(MemoryStore::new()))
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => {
            error!("Failed to parse command line args: {}", f);
            return ExitCode::FAILURE;
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return ExitCode::SUCCESS;
    }

    let store = match open_store(setting(&matches, "d", "DATABASE_DSN")) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Failed to open storage.");
            return ExitCode::FAILURE;
        }
    };

    let mut builder = ServerBuilder::new();
    if let Some(address) = setting(&matches, "a", "ADDRESS") {
        builder = builder.with_listen_address(address);
    }
    if let Some(key) = setting(&matches, "k", "KEY") {
        builder = builder.with_signing_key(key);
    }

    let server = match builder.build(store) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to start server.");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down."),
            Err(e) => error!(error = %e, "Failed to listen for interrupt, shutting down."),
        }
        signal.cancel();
    });

    match server.serve(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed.");
            ExitCode::FAILURE
        }
    }
}
