use std::path::PathBuf;

use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "depscope",
    version,
    about = "Compile and query pip dependencies across a custom-node registry"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Config file (default: ./depscope.toml if present)
    #[arg(long, global = true, env = "DEPSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Registry dump to read instead of `sources.nodes_path`
    #[arg(long, global = true, env = "DEPSCOPE_NODES")]
    nodes: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
/// Exit codes:
///   0: success
///   1: general/unknown error
///   2: configuration error
///   3: data source missing or unreadable
///   5: registry / network error
///   10: partial success (some fetch units failed)
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("partial fetch") {
        10
    } else if lower.contains("cannot read source")
        || lower.contains("io error reading")
        || lower.contains("json error in")
    {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("fetch error")
        || lower.contains("network error")
        || lower.contains("http ")
        || lower.contains("registry")
    {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // reqwest is built without a bundled crypto provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    let opts = commands::GlobalOpts {
        config: cli.config,
        nodes: cli.nodes,
        quiet: cli.quiet,
    };
    match runtime.block_on(commands::run(cli.command, &opts)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}
