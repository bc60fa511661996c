use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use qlook::lookup::lookup_all;
use qlook::query::create_queries;
use qlook::transport::build_tls_config;

mod args;
mod output;

use args::Args;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbosity);

    let queries = create_queries(&args.query).context("Invalid query options.")?;
    let tls = build_tls_config(&args.tls).context("Invalid TLS options.")?;
    let entries = lookup_all(
        &args.servers,
        args.protocol,
        &queries,
        &args.transport,
        &tls,
        &args.ptr,
    )
    .context("Invalid transport options.")?;

    output::print_entries(&entries, args.format)
}

/// Logs to stderr. `RUST_LOG` takes precedence over the verbosity flags.
fn init_logging(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
