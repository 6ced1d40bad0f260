//! `iio_info`: print everything a context exposes.
//!
//! # Usage
//!
//! ```bash
//! iio_info --uri ip:192.168.2.1
//! iio_info --uri dummy:
//! IIO_URI=xml:/tmp/board.xml iio_info
//! ```
//!
//! Settings come from `iio.toml` (or `--config`), then `IIO_` environment
//! variables, then the command line.

use std::path::PathBuf;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use rust_iio::config::{IioConfig, DEFAULT_CONFIG_FILE};
use rust_iio::logging::{self, TracingConfig};
use rust_iio::{AttrScope, BackendRegistry, Channel, Context, Device, Version};

#[derive(Parser)]
#[command(name = "iio_info")]
#[command(about = "Dump the devices, channels and attributes of an IIO context", long_about = None)]
struct Cli {
    /// Context URI, e.g. ip:192.168.2.1, serial:/dev/ttyUSB0, xml:board.xml, dummy:
    #[arg(short, long)]
    uri: Option<String>,

    /// I/O timeout in milliseconds (0 = backend default)
    #[arg(short = 'T', long)]
    timeout: Option<u32>,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// List registered backends and exit
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IioConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(uri) = cli.uri {
        config.uri = Some(uri);
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_ms = timeout;
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let tracing = TracingConfig::from_log_config(&config.log).map_err(|e| anyhow!(e))?;
    logging::init(tracing).map_err(|e| anyhow!(e))?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let registry = BackendRegistry::with_defaults();
    if cli.list_backends {
        println!("Available backends:");
        for entry in registry.entries() {
            println!("\t{} ({})", entry.name, entry.uri_prefix);
        }
        return Ok(());
    }

    let uri = config
        .uri
        .as_deref()
        .ok_or_else(|| anyhow!("no context URI given (use --uri or IIO_URI)"))?;
    let ctx = registry
        .create_context(uri, &config.context_params())
        .with_context(|| format!("unable to create context from '{uri}'"))?;

    print_context(&ctx);
    ctx.shutdown();
    Ok(())
}

fn print_context(ctx: &Context) {
    println!("Library version: {}", Version::library());
    match ctx.version() {
        Ok(version) => println!("Backend version: {version}"),
        Err(e) => println!("Backend version: ERROR: {e}"),
    }
    println!("IIO context created with {} backend.", ctx.name());
    if !ctx.description().is_empty() {
        println!("Backend description string: {}", ctx.description());
    }

    println!("IIO context has {} attributes:", ctx.attrs().len());
    for (key, value) in ctx.attrs() {
        println!("\t{key}: {value}");
    }

    println!("IIO context has {} devices:", ctx.devices_count());
    for dev in ctx.devices() {
        print_device(&dev);
    }
}

fn print_device(dev: &Device) {
    print!("\t{}", dev.id());
    if let Some(label) = dev.label() {
        print!(", label: {label}");
    }
    if let Some(name) = dev.name() {
        print!(": {name}");
    }
    if dev.is_trigger() {
        print!(" (trigger)");
    }
    println!();

    println!("\t\t{} channels found:", dev.channels_count());
    for chn in dev.channels() {
        print_channel(&chn);
    }

    for (scope, label) in [
        (AttrScope::Device, "device-specific"),
        (AttrScope::Buffer, "buffer-specific"),
        (AttrScope::Debug, "debug"),
    ] {
        let names = dev.attr_names(scope);
        if names.is_empty() {
            continue;
        }
        println!("\t\t{} {label} attributes found:", names.len());
        for (i, name) in names.iter().enumerate() {
            let value = match scope {
                AttrScope::Device => dev.read_attr(name),
                AttrScope::Buffer => dev.read_buffer_attr(name),
                AttrScope::Debug => dev.read_debug_attr(name),
            };
            print_attr_value(3, i, name, value);
        }
    }

    if !dev.is_trigger() {
        match dev.trigger() {
            Ok(Some(trigger)) => println!(
                "\t\tCurrent trigger: {}({})",
                trigger.id(),
                trigger.name().unwrap_or("")
            ),
            Ok(None) => println!("\t\tNo trigger assigned to device"),
            Err(e) if e.is_not_supported() => {}
            Err(e) => println!("\t\tUnable to get trigger: {e}"),
        }
    }
}

fn print_channel(chn: &Channel) {
    let direction = if chn.is_output() { "output" } else { "input" };
    print!("\t\t\t{}", chn.id());
    if let Some(name) = chn.name() {
        print!(": {name}");
    }
    print!(" ({direction}");
    if let Some(index) = chn.scan_index() {
        let format = chn.data_format();
        print!(", index: {index}, format: {format}");
        if let Some(scale) = format.scale {
            print!(", scale: {scale}");
        }
    }
    println!(")");

    if chn.attrs().is_empty() {
        return;
    }
    println!("\t\t\t{} channel-specific attributes found:", chn.attrs().len());
    for (i, attr) in chn.attrs().iter().enumerate() {
        print_attr_value(4, i, &attr.name, chn.read_attr(&attr.name));
    }
}

fn print_attr_value(depth: usize, index: usize, name: &str, value: rust_iio::Result<String>) {
    let indent = "\t".repeat(depth);
    match value {
        Ok(value) => println!("{indent}attr {index:2}: {name} value: {value}"),
        Err(e) => println!("{indent}attr {index:2}: {name} ERROR: {e}"),
    }
}
