use anyhow::Result;
use clap::{Parser, ValueEnum};
use csi_cam_harness::module::{DeviceType, ModuleService};
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceArg {
    /// Read the board model from the device tree
    Auto,
    Pi,
    Jetson,
}

/// CSI camera module speaking the line-delimited JSON protocol on stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "csi-cam-module")]
#[command(about = "CSI camera module for Raspberry Pi and Jetson boards")]
#[command(version)]
struct Args {
    /// Board the module runs on
    #[arg(long, value_enum, default_value_t = DeviceArg::Auto)]
    device: DeviceArg,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr only
    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("csi_cam_harness={}", level))),
        )
        .init();

    let device = match args.device {
        DeviceArg::Auto => DeviceType::detect(),
        DeviceArg::Pi => DeviceType::RaspberryPi,
        DeviceArg::Jetson => DeviceType::Jetson,
    };
    info!("Running on {} ({})", device.name(), device.camera_model());

    let service = ModuleService::new(device);
    let code = match service
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
    {
        Ok(()) => 0,
        Err(e) => {
            error!("Module stopped: {}", e);
            1
        }
    };

    // A blocking stdin read would otherwise hold up runtime shutdown
    std::process::exit(code);
}
