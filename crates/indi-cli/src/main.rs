//! INDI command-line client
//!
//! Watch a server's event stream, list devices, or set property values.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indi_client::{Client, ClientBuilder, ClientConfig};
use indi_core::{Event, Interface, Property, SwitchState, Value};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "indi")]
#[command(author, version, about = "INDI instrument control client")]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ServerArgs {
    /// Server host
    #[arg(short = 'H', long, env = "INDI_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(short, long, env = "INDI_PORT")]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print server events until interrupted
    Watch {
        #[command(flatten)]
        server: ServerArgs,

        /// Only request properties of this device
        #[arg(short, long)]
        device: Option<String>,

        /// Liveness polling period in milliseconds (0 disables)
        #[arg(long, default_value = "1000")]
        poll_ms: u64,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List devices known to the server
    List {
        #[command(flatten)]
        server: ServerArgs,

        /// Only devices implementing this interface (name or bitmask)
        #[arg(short, long)]
        interface: Option<String>,

        /// How long to collect definitions, in milliseconds
        #[arg(long, default_value = "1000")]
        wait_ms: u64,
    },

    /// Set number elements: DEVICE PROPERTY NAME=VALUE...
    SetNumber(SetArgs),

    /// Set text elements: DEVICE PROPERTY NAME=VALUE...
    SetText(SetArgs),

    /// Set switch elements: DEVICE PROPERTY NAME=On|Off...
    SetSwitch(SetArgs),
}

#[derive(Args)]
struct SetArgs {
    #[command(flatten)]
    server: ServerArgs,

    device: String,

    property: String,

    /// Element assignments, NAME=VALUE
    #[arg(required = true)]
    values: Vec<String>,

    /// How long to wait for the property definition, in milliseconds
    #[arg(long, default_value = "3000")]
    wait_ms: u64,
}

/// Contents of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: ClientConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let file_config = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Commands::Watch {
            server,
            device,
            poll_ms,
            json,
        } => {
            let config = merge_config(file_config.server, &server);
            watch(config, device, poll_ms, json).await?;
        }
        Commands::List {
            server,
            interface,
            wait_ms,
        } => {
            let config = merge_config(file_config.server, &server);
            let mask = interface
                .as_deref()
                .map(|name| {
                    name.parse::<Interface>()
                        .map_err(|_| anyhow!("Unknown interface: {}", name))
                })
                .transpose()?;
            list(config, mask, Duration::from_millis(wait_ms)).await?;
        }
        Commands::SetNumber(args) => {
            let config = merge_config(file_config.server, &args.server);
            let values = parse_assignments(&args.values, |v| {
                indi_core::parse_number(v).ok_or_else(|| anyhow!("Not a number: {}", v))
            })?;
            let client = connect_for_property(config, &args).await?;
            client
                .send_new_number(&args.device, &args.property, values)
                .await?;
            finish_send(&client, &args).await;
        }
        Commands::SetText(args) => {
            let config = merge_config(file_config.server, &args.server);
            let values = parse_assignments(&args.values, |v| Ok(v.to_string()))?;
            let client = connect_for_property(config, &args).await?;
            client
                .send_new_text(&args.device, &args.property, values)
                .await?;
            finish_send(&client, &args).await;
        }
        Commands::SetSwitch(args) => {
            let config = merge_config(file_config.server, &args.server);
            let values = parse_assignments(&args.values, parse_switch)?;
            let client = connect_for_property(config, &args).await?;
            client
                .send_new_switch(&args.device, &args.property, values)
                .await?;
            finish_send(&client, &args).await;
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: FileConfig = toml::from_str(&text)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Command-line endpoint flags win over the config file
fn merge_config(mut config: ClientConfig, args: &ServerArgs) -> ClientConfig {
    if let Some(host) = &args.host {
        config.host = Some(host.clone());
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if config.host.is_none() {
        config.host = Some("localhost".to_string());
    }
    config
}

/// Split `NAME=VALUE` arguments and convert each value
fn parse_assignments<T>(
    raw: &[String],
    convert: impl Fn(&str) -> Result<T>,
) -> Result<Vec<(String, T)>> {
    raw.iter()
        .map(|item| {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected NAME=VALUE, got {}", item))?;
            if name.is_empty() {
                bail!("Empty element name in {}", item);
            }
            Ok((name.to_string(), convert(value)?))
        })
        .collect()
}

fn parse_switch(value: &str) -> Result<SwitchState> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Ok(SwitchState::On),
        "off" | "0" | "false" => Ok(SwitchState::Off),
        _ => Err(anyhow!("Switch value must be On or Off, got {}", value)),
    }
}

async fn watch(config: ClientConfig, device: Option<String>, poll_ms: u64, json: bool) -> Result<()> {
    let address = config.address().unwrap_or_default();
    let client = ClientBuilder::from_config(config).build()?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    client.subscribe_all(move |event| {
        let _ = event_tx.send(event.clone());
    });

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    println!(
        "{} watching {}",
        "INDI".cyan().bold(),
        address.yellow()
    );

    if let Err(e) = client.connect().await {
        warn!("Initial connect failed: {}", e);
        if poll_ms == 0 {
            return Err(e.into());
        }
    }
    if poll_ms > 0 {
        client.start_liveness_polling(Duration::from_millis(poll_ms));
    }

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if matches!(event, Event::ServerConnected) {
                    request_properties(&client, device.clone());
                }
                print_event(&client, &event, json)?;
            }
            _ = shutdown_rx.recv() => {
                info!("Shutting down");
                break;
            }
        }
    }

    client.stop_liveness_polling();
    client.disconnect()?;
    Ok(())
}

fn request_properties(client: &Client, device: Option<String>) {
    let client = client.clone();
    tokio::spawn(async move {
        let result = match &device {
            Some(name) => client.watch_device(name).await,
            None => client.get_properties(None, None).await,
        };
        if let Err(e) = result {
            warn!("Property request failed: {}", e);
        }
    });
}

fn print_event(client: &Client, event: &Event, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        Event::ServerConnected => println!("{} connected", "SERVER".green().bold()),
        Event::ServerDisconnected { devices } => println!(
            "{} disconnected ({} devices dropped)",
            "SERVER".red().bold(),
            devices.len()
        ),
        Event::NewDevice { device } => println!("{} {}", "+DEVICE".green(), device.bold()),
        Event::RemoveDevice { device } => println!("{} {}", "-DEVICE".red(), device.bold()),
        Event::NewProperty { .. } => {}
        Event::RemoveProperty { device, property } => {
            println!("{} {}.{}", "-PROP".red(), device, property)
        }
        Event::Defined {
            device, property, ..
        } => {
            let values = client
                .with_registry(|r| r.property(device, property).map(format_values))
                .unwrap_or_default();
            println!("{} {}.{} {}", "DEF".cyan(), device, property, values);
        }
        Event::Updated {
            device, property, ..
        } => {
            let values = client
                .with_registry(|r| r.property(device, property).map(format_values))
                .unwrap_or_default();
            println!("{} {}.{} {}", "SET".yellow(), device, property, values);
        }
        Event::Message {
            device,
            message,
            timestamp,
        } => println!(
            "{} [{}] {}: {}",
            "MSG".magenta(),
            timestamp.as_deref().unwrap_or("-"),
            device.as_deref().unwrap_or("server"),
            message
        ),
        Event::DeviceConnected { device } => {
            println!("{} {} connected", "DEVICE".green().bold(), device)
        }
        Event::DeviceDisconnected { device } => {
            println!("{} {} disconnected", "DEVICE".red().bold(), device)
        }
    }
    Ok(())
}

fn format_values(property: &Property) -> String {
    let parts: Vec<String> = property
        .elements
        .values()
        .map(|element| {
            let value = match &element.value {
                Value::Number(v) => v.to_string(),
                Value::Switch(on) => SwitchState::from(*on).as_str().to_string(),
                Value::Text(text) => format!("{:?}", text),
                Value::Blob(blob) => format!("<{} bytes {}>", blob.size, blob.format),
                Value::Empty => "<empty>".to_string(),
            };
            format!("{}={}", element.name, value)
        })
        .collect();
    let state = property.state().map(|s| s.as_str()).unwrap_or("?");
    format!("[{}] {}", state, parts.join(" "))
}

async fn list(config: ClientConfig, mask: Option<Interface>, wait: Duration) -> Result<()> {
    let client = ClientBuilder::from_config(config).connect().await?;
    client.get_properties(None, None).await?;
    tokio::time::sleep(wait).await;

    let names = match mask {
        Some(mask) => client.devices(mask),
        None => client.device_names(),
    };

    if names.is_empty() {
        println!("{}", "No devices".yellow());
    }
    for name in names {
        let count = client
            .device(&name)
            .map(|d| d.properties.len())
            .unwrap_or(0);
        println!("{} ({} properties)", name.bold(), count);
    }

    client.disconnect()?;
    Ok(())
}

/// Connect and wait until the target property has been defined
async fn connect_for_property(config: ClientConfig, args: &SetArgs) -> Result<Client> {
    let client = ClientBuilder::from_config(config).connect().await?;
    client.watch_device(&args.device).await?;

    let wait = Duration::from_millis(args.wait_ms);
    let defined = tokio::time::timeout(wait, async {
        loop {
            if client.with_registry(|r| r.property(&args.device, &args.property).is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    if defined.is_err() {
        client.disconnect()?;
        bail!(
            "Property {}.{} was not defined within {:?}",
            args.device,
            args.property,
            wait
        );
    }
    Ok(client)
}

async fn finish_send(client: &Client, args: &SetArgs) {
    if let Err(e) = client.close().await {
        warn!("Disconnect failed: {}", e);
    }
    println!(
        "{} {}.{}",
        "OK".green().bold(),
        args.device,
        args.property
    );
}
