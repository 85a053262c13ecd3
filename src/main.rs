use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sdk_setup::commands::{self, setup::SetupOptions};

#[derive(Parser)]
#[clap(name = "sdk-setup")]
#[clap(about = "Checks and installs the Vulkan SDK and debug libraries the engine needs")]
#[clap(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    global: GlobalArgs,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a TOML config file (default: ./sdk-setup.toml)
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    /// Use this SDK root instead of reading the environment variable
    #[clap(long, global = true)]
    sdk_path: Option<String>,
    /// Show debug logging
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the environment and install whatever is missing (default)
    Setup {
        /// Answer yes to every prompt
        #[clap(long, conflicts_with = "no")]
        yes: bool,
        /// Answer no to every prompt
        #[clap(long)]
        no: bool,
        /// Download deadline in seconds (0 disables it)
        #[clap(long)]
        timeout: Option<u64>,
        /// Do not wait for Enter before exiting
        #[clap(long)]
        no_pause: bool,
    },
    /// Report what is installed without changing anything
    Check,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "sdk_setup=debug"
    } else {
        "sdk_setup=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let mut options = SetupOptions {
        config_path: cli.global.config,
        sdk_path: cli.global.sdk_path,
        pause: true,
        ..SetupOptions::default()
    };

    let result = match cli.command.unwrap_or(Commands::Setup {
        yes: false,
        no: false,
        timeout: None,
        no_pause: false,
    }) {
        Commands::Setup {
            yes,
            no,
            timeout,
            no_pause,
        } => {
            options.answer = match (yes, no) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            options.timeout_secs = timeout;
            options.pause = !no_pause;
            commands::setup::run_setup(&options)
        }
        Commands::Check => commands::check::check_environment(&options),
    };

    match result {
        Ok(status) => std::process::exit(status.exit_code()),
        Err(e) => {
            tracing::error!("setup aborted: {e}");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
