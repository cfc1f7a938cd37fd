//! Axis Probe CLI Tool
//!
//! Opens a Zaber controller chain over the ASCII protocol and reports the
//! state of one axis: whether it is busy and its tracking limits in mm.
//!
//! # Usage
//!
//! ```bash
//! # Focus stage on a serial port
//! cargo run --bin axis_probe -- --serial /dev/ttyUSB0 --device 1 --axis 1
//!
//! # Through a TCP bridge, with settings from a file
//! cargo run --bin axis_probe -- --tcp 192.168.0.40:55550 --config adapters.toml
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use device_adapters::ascii::AsciiLink;
use device_adapters::autofocus::{LIMIT_MAX_SETTING, LIMIT_MIN_SETTING, NATIVE_PER_MM};
use device_adapters::config::AdapterSettings;
use device_adapters::driver::{MotionLink, Target};
use device_adapters::logging;
use device_adapters::transport::Endpoint;
use std::path::PathBuf;
use std::process;

// =============================================================================
// CLI Argument Structure
// =============================================================================

/// Axis Probe - query a Zaber axis over the ASCII protocol
#[derive(Parser, Debug)]
#[command(name = "axis_probe")]
#[command(version = "0.1.0")]
#[command(about = "Report busy state and tracking limits of a Zaber axis", long_about = None)]
struct Args {
    /// Serial port of the controller chain
    #[arg(long, conflicts_with = "tcp", value_name = "PATH")]
    serial: Option<String>,

    /// TCP bridge address (host or host:port)
    #[arg(long, value_name = "HOST[:PORT]")]
    tcp: Option<String>,

    /// Device number; defaults to the configured focus device
    #[arg(short, long)]
    device: Option<u8>,

    /// Axis number; defaults to the configured focus axis
    #[arg(short, long)]
    axis: Option<u8>,

    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("axis_probe: {err:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => AdapterSettings::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AdapterSettings::load()?,
    };
    logging::init(&settings.logging.level)?;

    let endpoint = match (&args.serial, &args.tcp) {
        (Some(path), _) => Endpoint::serial(path.as_str()),
        (None, Some(address)) => Endpoint::tcp(address, settings.transport.tcp_default_port)?,
        (None, None) if !settings.autofocus.serial_port.is_empty() => {
            Endpoint::serial(settings.autofocus.serial_port.as_str())
        }
        (None, None) => {
            bail!("no endpoint: pass --serial or --tcp, or configure autofocus.serial_port")
        }
    };

    let device = match args.device {
        Some(device) => device,
        None => u8::try_from(settings.autofocus.focus_device)?,
    };
    let axis = match args.axis {
        Some(axis) => axis,
        None => u8::try_from(settings.autofocus.focus_axis)?,
    };
    let target = Target::new(device, axis);

    let link = AsciiLink::open(&endpoint, settings.transport.read_timeout())
        .await
        .with_context(|| format!("opening {endpoint}"))?;
    let handle = link
        .axis(target)
        .await
        .with_context(|| format!("resolving axis {target}"))?;

    let busy = handle.is_busy().await?;
    let min = handle.get_setting(LIMIT_MIN_SETTING).await? / NATIVE_PER_MM;
    let max = handle.get_setting(LIMIT_MAX_SETTING).await? / NATIVE_PER_MM;

    println!("endpoint : {endpoint}");
    println!("target   : device {device}, axis {axis}");
    println!("busy     : {busy}");
    println!("limits   : {min:.6} mm .. {max:.6} mm");
    Ok(())
}
