use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapbooth::estimator::ScriptedEstimator;
use snapbooth::media::SyntheticMediaSource;
use snapbooth::wallet::{StaticWalletProvider, WalletProvider};
use snapbooth::{BoothDevices, SnapboothApp, SnapboothConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "snapbooth")]
#[command(about = "Smile-triggered photo booth backend")]
#[command(version)]
#[command(long_about = "Runs the photo booth: capture sessions that fire when the subject smiles, \
uploads to the photo bucket, the winners gallery and the HTTP API used by the booth front end.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "snapbooth.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the booth")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Happiness replies the estimator plays back, e.g. "0.2,0.5,0.97"
    #[arg(long, default_value = "0.2,0.6,0.97")]
    samples: String,

    /// Pretend a wallet with this address is available
    #[arg(long, value_name = "ADDRESS")]
    wallet: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Serve the HTTP API and run the booth headless (default)
    Serve,
    /// Drive capture sessions from the terminal
    Session {
        /// Skip the HTTP API
        #[arg(long)]
        no_server: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting Snapbooth v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = SnapboothConfig::load_from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate().context("invalid configuration")?;

    let (server_enabled, keyboard_enabled) = match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => (true, false),
        Command::Session { no_server } => (!no_server, true),
    };

    let estimator = ScriptedEstimator::parse(&args.samples)
        .with_context(|| format!("invalid sample script '{}'", args.samples))?;
    let devices = BoothDevices {
        estimator: Arc::new(estimator),
        media: Arc::new(SyntheticMediaSource::new()),
        wallet_provider: args.wallet.clone().map(|address| {
            Arc::new(StaticWalletProvider::new(address)) as Arc<dyn WalletProvider>
        }),
        minter: None,
    };

    let mut app = SnapboothApp::new(config, devices).map_err(|e| {
        error!("Failed to create booth: {}", e);
        e
    })?;
    app.set_server_enabled(server_enabled);
    app.set_keyboard_enabled(keyboard_enabled);

    app.initialize().await.map_err(|e| {
        error!("Failed to initialize booth: {}", e);
        e
    })?;

    app.start().await.map_err(|e| {
        error!("Failed to start booth: {}", e);
        e
    })?;

    let exit_code = app.run().await.map_err(|e| {
        error!("Booth error during execution: {}", e);
        e
    })?;

    info!("Snapbooth exited with code: {}", exit_code);
    drop(log_guard);

    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("snapbooth={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "snapbooth.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Snapbooth Configuration File");
    println!("# Every key can be overridden with SNAPBOOTH__<SECTION>__<KEY> environment variables");
    println!();
    let rendered = toml::to_string_pretty(&SnapboothConfig::default())
        .context("failed to render default configuration")?;
    println!("{}", rendered);
    Ok(())
}
