mod commands;

use std::io;

use clap::Parser;
use commands::Commands;
use logutil::LogFormat;
use tracing::Level;

#[derive(Parser)]
#[clap(name = "collabql", version, about = "Multi-party query plan compiler")]
struct Arguments {
    /// Log level, `RUST_LOG` takes precedence when set.
    #[clap(
        long,
        global = true,
        env = "COLLABQL_LOG_LEVEL",
        default_value = "warn",
        value_parser = logutil::parse_level
    )]
    log_level: Level,

    /// Emit logs as JSON.
    #[clap(long, global = true)]
    log_json: bool,

    #[clap(subcommand)]
    command: Commands,
}

fn main() {
    let args = Arguments::parse();

    let format = if args.log_json {
        LogFormat::Json
    } else {
        LogFormat::HumanReadable
    };
    // Logs go to stderr, stdout is reserved for command output.
    logutil::configure_global_logger(args.log_level, format, io::stderr);

    if let Err(err) = args.command.run() {
        eprintln!("ERROR: {err:#}");
        std::process::exit(1);
    }
}
