//! usbser serial terminal
//!
//! Lists serial ports, including USB adapters driven without a kernel
//! driver, and runs a line-oriented terminal on one of them.

mod settings;
mod terminal;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use usbser_detect::{DiscoveredPort, PortScanner};

use settings::Settings;
use terminal::SessionOptions;

#[derive(Debug, Parser)]
#[command(name = "usbser", version, about = "Serial terminal for USB-serial adapters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available ports
    List,
    /// Open a port by list index or name
    Open {
        /// Index from `usbser list`, or the port name
        port: String,
        /// Baud rate
        #[arg(long)]
        baud: Option<u32>,
        /// Data bits, parity and stop bits, e.g. 8N1 or 7E2
        #[arg(long)]
        framing: Option<String>,
        /// Show received data as hex
        #[arg(long)]
        hex: bool,
        /// Break duration for ~b, in milliseconds
        #[arg(long)]
        break_ms: Option<u64>,
    },
    /// Show the settings file
    Config {
        /// Write the current settings (defaults included) to disk
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "usbser=info,usbser_protocol=info,usbser_port=info,usbser_detect=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = Settings::load();

    match cli.command {
        Command::List => list(&settings),
        Command::Open {
            port,
            baud,
            framing,
            hex,
            break_ms,
        } => {
            let mut line = settings.line;
            if let Some(baud) = baud {
                line.baud_rate = baud;
            }
            if let Some(framing) = framing {
                line = line
                    .with_framing(&framing)
                    .with_context(|| format!("invalid framing {:?}", framing))?;
            }
            let options = SessionOptions {
                line,
                hex: hex || settings.show_hex,
                break_duration: break_ms
                    .map(std::time::Duration::from_millis)
                    .unwrap_or_else(|| settings.break_duration()),
                line_ending: settings.line_ending,
            };
            let found = select_port(&settings, &port)?;
            terminal::run(found.port, options).await
        }
        Command::Config { save } => show_config(&settings, save),
    }
}

fn scan(settings: &Settings) -> Result<Vec<DiscoveredPort>> {
    PortScanner::with_config(settings.scanner.clone())
        .scan()
        .context("port scan failed")
}

fn list(settings: &Settings) -> Result<()> {
    let ports = scan(settings)?;
    if ports.is_empty() {
        println!("No ports found");
    }
    for (index, found) in ports.iter().enumerate() {
        println!("{:>3}  {}", index, found.summary);
    }
    Ok(())
}

fn select_port(settings: &Settings, wanted: &str) -> Result<DiscoveredPort> {
    let mut ports = scan(settings)?;
    let position = match wanted.parse::<usize>() {
        Ok(index) if index < ports.len() => index,
        Ok(index) => bail!("no port at index {} ({} found)", index, ports.len()),
        Err(_) => ports
            .iter()
            .position(|p| p.summary.name == wanted)
            .ok_or_else(|| anyhow!("no port named {:?}", wanted))?,
    };
    Ok(ports.swap_remove(position))
}

fn show_config(settings: &Settings, save: bool) -> Result<()> {
    if save {
        let path = settings.save()?;
        println!("Saved {}", path.display());
    } else {
        match Settings::settings_path() {
            Some(path) if path.exists() => println!("{}", path.display()),
            Some(path) => println!("{} (not created, showing defaults)", path.display()),
            None => println!("(no settings location)"),
        }
    }
    println!(
        "{}",
        serde_json::to_string_pretty(settings).context("failed to serialize settings")?
    );
    Ok(())
}
