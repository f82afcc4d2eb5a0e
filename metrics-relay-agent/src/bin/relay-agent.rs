use std::{env, process::ExitCode, str::FromStr, time::Duration};

use getopts::{Matches, Options};
use metrics_relay_agent::AgentBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn opts() -> Options {
    let mut opts = Options::new();

    opts.optopt(
        "a",
        "address",
        "server address, env ADDRESS (default: localhost:8080)",
        "HOST:PORT",
    );
    opts.optopt(
        "p",
        "poll-interval",
        "seconds between polls, env POLL_INTERVAL (default: 2)",
        "SECS",
    );
    opts.optopt(
        "r",
        "report-interval",
        "seconds between reports, env REPORT_INTERVAL (default: 10)",
        "SECS",
    );
    opts.optopt("k", "key", "payload signing key, env KEY", "KEY");
    opts.optopt("l", "rate-limit", "concurrent sends, env RATE_LIMIT (default: 1)", "COUNT");
    opts.optopt("b", "batch-size", "metrics per batch, env BATCH_SIZE (default: 20)", "COUNT");
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

fn parsed<T: FromStr>(matches: &Matches, opt: &str, var: &str) -> Result<Option<T>, String> {
    match setting(matches, opt, var) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| format!("invalid {var}: '{raw}'")),
        None => Ok(None),
    }
}

fn configure(matches: &Matches) -> Result<AgentBuilder, String> {
    let mut builder = AgentBuilder::new();

    if let Some(address) = setting(matches, "a", "ADDRESS") {
        builder = builder.with_address(&address).map_err(|e| e.to_string())?;
    }
    if let Some(secs) = parsed::<u64>(matches, "p", "POLL_INTERVAL")? {
        builder = builder.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(secs) = parsed::<u64>(matches, "r", "REPORT_INTERVAL")? {
        builder = builder.with_report_interval(Duration::from_secs(secs));
    }
    if let Some(key) = setting(matches, "k", "KEY") {
        builder = builder.with_signing_key(key);
    }
    if let Some(rate_limit) = parsed::<usize>(matches, "l", "RATE_LIMIT")? {
        builder = builder.with_rate_limit(rate_limit);
    }
    if let Some(batch_size) = parsed::<usize>(matches, "b", "BATCH_SIZE")? {
        builder = builder.with_max_batch_size(batch_size);
    }

    Ok(builder)
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

    let agent = match configure(&matches).and_then(|b| b.build().map_err(|e| e.to_string())) {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Invalid agent configuration.");
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

    agent.run(shutdown).await;
    ExitCode::SUCCESS
}
