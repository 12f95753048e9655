use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use uart_channel::{discover_ports, Parity, SerialChannel, SerialConfig, SerialEvent, StopBits};

#[derive(Parser, Debug)]
#[command(name = "uart-term", about = "Line-oriented serial terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports
    List,
    /// Open a port, optionally send a line, then print received lines
    Open(OpenArgs),
}

#[derive(clap::Args, Debug)]
struct OpenArgs {
    port: String,

    /// JSON file with a full line configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    baud: Option<u32>,

    #[arg(long)]
    data_bits: Option<u8>,

    #[arg(long, value_enum)]
    parity: Option<ParityArg>,

    #[arg(long, value_enum)]
    stop_bits: Option<StopBitsArg>,

    /// Read timeout in milliseconds, 0 waits forever
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Text sent (newline terminated) right after opening
    #[arg(short, long)]
    send: Option<String>,

    /// Exit after this many lines
    #[arg(short = 'n', long)]
    lines: Option<usize>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ParityArg {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl From<ParityArg> for Parity {
    fn from(arg: ParityArg) -> Self {
        match arg {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
            ParityArg::Mark => Parity::Mark,
            ParityArg::Space => Parity::Space,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StopBitsArg {
    #[value(name = "1")]
    One,
    #[value(name = "1.5")]
    OnePointFive,
    #[value(name = "2")]
    Two,
}

impl From<StopBitsArg> for StopBits {
    fn from(arg: StopBitsArg) -> Self {
        match arg {
            StopBitsArg::One => StopBits::One,
            StopBitsArg::OnePointFive => StopBits::OnePointFive,
            StopBitsArg::Two => StopBits::Two,
        }
    }
}

fn build_config(args: &OpenArgs) -> anyhow::Result<SerialConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            SerialConfig::from_json(&json)?
        }
        None => SerialConfig::default(),
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(data_bits) = args.data_bits {
        config.data_bits = data_bits;
    }
    if let Some(parity) = args.parity {
        config.parity = parity.into();
    }
    if let Some(stop_bits) = args.stop_bits {
        config.stop_bits = stop_bits.into();
    }
    if let Some(ms) = args.timeout_ms {
        config.read_timeout = Duration::from_millis(ms);
    }
    Ok(config)
}

fn list_ports() -> anyhow::Result<()> {
    let ports = discover_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04X}:{:04X}  {}",
                port.port_name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.port_name),
        }
    }
    Ok(())
}

async fn run_terminal(args: OpenArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let port = SerialChannel::native(args.port.clone(), config);
    port.open()
        .await
        .with_context(|| format!("opening {}", args.port))?;

    let mut events = port.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SerialEvent::BufferOverrun { dropped } = event {
                log::warn!("Receive buffer overrun, {} bytes lost", dropped);
            }
        }
    });

    if let Some(text) = &args.send {
        let line = format!("{}\n", text);
        let written = port.write(line.as_bytes()).await?;
        log::debug!("Sent {} bytes", written);
    }

    let mut printed = 0;
    loop {
        if args.lines.is_some_and(|limit| printed >= limit) {
            break;
        }
        tokio::select! {
            line = port.read_line() => {
                let line = line?;
                if !line.is_empty() {
                    println!("{}", line);
                    printed += 1;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let metrics = port.metrics();
    log::info!(
        "{}: {} bytes received, {} dropped, {} written",
        port,
        metrics.bytes_received,
        metrics.bytes_dropped,
        metrics.bytes_written
    );
    port.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::List => list_ports(),
        Command::Open(args) => run_terminal(args).await,
    }
}
