use anyhow::Result;
use clap::Parser;
use csi_cam_harness::{run_scenario, HarnessConfig, ScenarioSettings};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "csi-cam-harness")]
#[command(about = "Readiness checks for a packaged CSI camera module")]
#[command(version)]
#[command(long_about = "Locates a packaged CSI camera module, loads it into a local runtime \
as a single camera component, and polls its image, batch image and property methods until \
they succeed or their deadlines pass. Exits non-zero when any check fails.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "csi-cam-harness.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Directory containing the packaged module
    #[arg(short, long, value_name = "DIR", help = "Override artifact.base_dir from the configuration")]
    base_dir: Option<PathBuf>,

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
    #[arg(long, help = "Validate configuration file and exit without running the scenario")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - locate the module but don't launch it
    #[arg(long, help = "Locate the module and print the configuration document without launching it")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a file in this directory
    #[arg(long, value_name = "DIR", help = "Write logs to csi-cam-harness.log in this directory")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let guard = init_logging(&args)?;

    info!("Starting csi-cam-harness v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match HarnessConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(base_dir) = &args.base_dir {
        info!("Artifact directory overridden: {}", base_dir.display());
        config.artifact.base_dir = base_dir.clone();
    }

    match config.validate() {
        Ok(()) if args.validate_config => {
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let settings = ScenarioSettings::from_config(&config);

    if args.dry_run {
        let executable = settings.locator.locate()?;
        let document = settings.configuration(&executable)?.to_document()?;
        println!("{}", document);
        println!("✓ Dry run completed - module found at {}", executable.display());
        return Ok(());
    }

    let report = run_scenario(&settings).await;
    println!("{}", report);

    let exit_code = report.exit_code();
    info!("Scenario finished with exit code: {}", exit_code);

    // Flush the file writer before exiting
    drop(guard);
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
        .unwrap_or_else(|_| EnvFilter::new(format!("csi_cam_harness={}", log_level)));

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
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, "csi-cam-harness.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
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
    println!("# csi-cam-harness configuration file");
    println!("# Every value can also be set through CSI_HARNESS__<SECTION>__<KEY>");
    println!();
    print!("{}", toml::to_string_pretty(&HarnessConfig::default())?);
    Ok(())
}
