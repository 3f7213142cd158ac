use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use macropad::config::Config;
use macropad::hal::host::{ChannelSerial, DirFs, LogHid, SystemClock};
use macropad::hal::sim::{
    BufferedSerial, ManualClock, MemoryFs, RecordingHid, VirtualPins, VirtualStrip,
};
use macropad::hal::{Board, Clock, HidTransport, TouchPad};
use macropad::profiles::{Profile, ProfileDocument};
use macropad::{Device, TickOutcome};

/// Untouched reading of a simulated touch pad
const TOUCH_IDLE_LEVEL: u16 = 1000;

#[derive(Parser, Debug)]
#[command(name = "macropad")]
#[command(about = "Programmable macro keypad firmware, simulated on the host")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/macropad/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the device loop; stdin is the serial console
    Run {
        /// Where key reports go
        #[arg(long, value_enum, default_value_t = HidBackend::Log)]
        hid: HidBackend,
    },
    /// Resolve a profile document and report problems
    Validate { file: PathBuf },
    /// Execute one key's macro in virtual time and print the HID log
    Play { file: PathBuf, key: u8 },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum HidBackend {
    /// Log reports only
    Log,
    /// Inject into the desktop session (needs the `enigo` feature)
    Enigo,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is the serial console
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run {
        hid: HidBackend::Log,
    }) {
        Commands::Run { hid } => run(config, hid).await,
        Commands::Validate { file } => validate(&file, &config),
        Commands::Play { file, key } => play(&file, key, &config),
    }
}

async fn run(config: Config, backend: HidBackend) -> Result<()> {
    info!("Starting macropad simulator");
    info!(
        "Pin directives: !press N, !release N, !touch <next|prev> <level> (idle level {})",
        TOUCH_IDLE_LEVEL
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let pins = VirtualPins::new(config.device.num_keys as usize, TOUCH_IDLE_LEVEL);
    let shutdown = Arc::new(AtomicBool::new(false));

    // Feed stdin to the serial channel, peeling off pin directives
    let stdin_pins = pins.clone();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(directive) = line.strip_prefix('!') {
                if let Err(e) = apply_directive(&stdin_pins, directive) {
                    warn!("{}", e);
                }
            } else if tx.send(line).is_err() {
                break;
            }
        }
    });

    // The board is not Send, so it is built on the loop's own thread
    let loop_shutdown = shutdown.clone();
    let mut device_loop = tokio::task::spawn_blocking(move || -> Result<()> {
        let board = Board {
            clock: Box::new(SystemClock::new()),
            hid: make_hid(backend)?,
            fs: Box::new(DirFs::new(config.storage.root.clone())?),
            strip: Box::new(VirtualStrip::new(config.led.count)),
            pins: Box::new(pins),
            serial: Box::new(ChannelSerial::new(rx)),
        };
        let idle = Duration::from_millis(config.device.loop_idle_ms);

        let mut device = Device::boot(config.clone(), board);
        while !loop_shutdown.load(Ordering::Relaxed) {
            if device.tick() == TickOutcome::Reboot {
                info!("Rebooting");
                device = Device::boot(config.clone(), device.into_board());
            }
            std::thread::sleep(idle);
        }
        Ok(())
    });

    let finished = tokio::select! {
        result = &mut device_loop => Some(result),
        _ = signal::ctrl_c() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Received Ctrl+C, shutting down...");
            shutdown.store(true, Ordering::Relaxed);
            device_loop.await
        }
    };

    stdin_task.abort();
    info!("Shutdown complete");
    result.context("device loop panicked")?
}

fn make_hid(backend: HidBackend) -> Result<Box<dyn HidTransport>> {
    match backend {
        HidBackend::Log => Ok(Box::new(LogHid)),
        #[cfg(feature = "enigo")]
        HidBackend::Enigo => Ok(Box::new(macropad::hal::host::EnigoHid::new()?)),
        #[cfg(not(feature = "enigo"))]
        HidBackend::Enigo => bail!("built without the `enigo` feature"),
    }
}

/// `press N`, `release N` or `touch <next|prev> <level>`
fn apply_directive(pins: &VirtualPins, directive: &str) -> Result<()> {
    let parts: Vec<&str> = directive.split_whitespace().collect();
    match parts.as_slice() {
        ["press", key] => pins.set_key(key.parse().context("key id")?, true),
        ["release", key] => pins.set_key(key.parse().context("key id")?, false),
        ["touch", pad, level] => {
            let pad = match pad.to_ascii_lowercase().as_str() {
                "next" => TouchPad::Next,
                "prev" => TouchPad::Prev,
                other => bail!("unknown touch pad '{}'", other),
            };
            pins.set_touch(pad, level.parse().context("touch level")?);
        }
        _ => bail!("unknown directive '!{}'", directive),
    }
    Ok(())
}

fn read_document(path: &Path) -> Result<(Vec<u8>, ProfileDocument)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok((bytes, doc))
}

fn validate(path: &Path, config: &Config) -> Result<()> {
    let (_, doc) = read_document(path)?;
    let profile = Profile::from_document(
        1,
        doc,
        config.device.num_keys,
        config.macros.default_delay_ms,
    );

    println!(
        "{}: '{}', idle {}, default delay {} ms",
        path.display(),
        profile.name,
        profile.idle,
        profile.default_delay_ms
    );
    for binding in &profile.bindings {
        println!("  key {:>2}: {} actions", binding.key, binding.actions.len());
    }

    if profile.diagnostics.is_empty() {
        println!("✓ No problems found");
        return Ok(());
    }
    for diagnostic in &profile.diagnostics {
        println!("  ✗ {}", diagnostic);
    }
    bail!("{} problems found", profile.diagnostics.len())
}

fn play(path: &Path, key: u8, config: &Config) -> Result<()> {
    let (bytes, _) = read_document(path)?;

    let clock = ManualClock::new();
    let hid = RecordingHid::with_clock(clock.clone());
    let strip = VirtualStrip::new(config.led.count);
    let fs = MemoryFs::new();
    fs.put("/profile1.json", &bytes);

    let mut config = config.clone();
    config.device.start_profile = 1;
    let board = Board {
        clock: Box::new(clock.clone()),
        hid: Box::new(hid.clone()),
        fs: Box::new(fs),
        strip: Box::new(strip.clone()),
        pins: Box::new(VirtualPins::new(config.device.num_keys as usize, TOUCH_IDLE_LEVEL)),
        serial: Box::new(BufferedSerial::new()),
    };
    let mut device = Device::boot(config, board);

    let start = clock.now_ms();
    let frames = strip.frames();
    if !device.run_macro_for_key(key) {
        bail!("key {} has no actions in {}", key, path.display());
    }

    for (at, event) in hid.timed_events() {
        println!("{:>7} ms  {:?}", at.saturating_sub(start), event);
    }
    println!(
        "done after {} ms, {} led frames",
        clock.now_ms() - start,
        strip.frames() - frames
    );
    Ok(())
}
