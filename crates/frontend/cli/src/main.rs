use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use picocart_core::catalog::Catalog;
use picocart_core::config::{ConfigStore, HOME_DIR};
use picocart_core::display::TextBuffer;
use picocart_core::emulator::HeadlessEmulator;
use picocart_core::flash::{
    CountingInterrupts, FlashProgrammer, MemoryFlash, ProgramRegion, DEFAULT_IMAGE_CEILING,
};
use picocart_core::input::{hid, KeyboardReport, GamepadState, ScriptedInput};
use picocart_core::lockout::{Lockout, StartSignal};
use picocart_core::logging::{LogCategory, LogConfig, LogLevel};
use picocart_core::platform::HostPlatform;
use picocart_core::presentation::{Disconnected, PresentationWorker, FRAME_TICK};
use picocart_core::storage::{self, HostStorage, Storage};
use picocart_core::{LoadedImage, Session, SessionExit, SessionOptions};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "picocart", version, about = "Browse, flash and run cartridge images from a host directory")]
struct Cli {
    /// Host directory standing in for the storage card root
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Home directory on the card, backslash separated
    #[arg(long, global = true, default_value = HOME_DIR)]
    home: String,

    /// Extensions of runnable images
    #[arg(long, global = true, default_value = "pce")]
    ext: String,

    /// Size of the simulated flash device in bytes
    #[arg(long, global = true, default_value_t = 16 * 1024 * 1024)]
    flash_size: u32,

    /// XIP address one past the running firmware
    #[arg(long, global = true, default_value = "0x10040000", value_parser = parse_u32)]
    image_end: u32,

    /// Largest image accepted, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_IMAGE_CEILING)]
    ceiling: u32,

    /// Core log level for all categories: off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Per-category override, e.g. `flash=debug`. May be repeated.
    #[arg(long = "log", global = true)]
    log_category: Vec<String>,

    /// Append core log output to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Show the composite TV output settings in the menu
    #[arg(long, global = true)]
    tv_out: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print one directory's catalog as JSON
    List {
        /// Card path; defaults to the home directory
        path: Option<String>,
    },
    /// Write an image into simulated flash and report what happened
    Flash {
        /// Card path of the image
        path: String,
        /// Dump the programmed flash range to this host file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show or change the stored configuration
    Config {
        #[arg(long)]
        swap_ab: Option<bool>,
        #[arg(long)]
        tv_system: Option<u8>,
        #[arg(long)]
        tv_lines: Option<u8>,
        #[arg(long)]
        color_freq: Option<u8>,
        #[arg(long)]
        color: Option<bool>,
        #[arg(long)]
        shift_lines: Option<bool>,
        #[arg(long)]
        shift_half_frame: Option<bool>,
    },
    /// Run a session headless, driven by a key script
    Browse {
        /// Comma separated frames, e.g. `-,down,enter,-,ctrl+f1,enter+esc*2`.
        /// `-` is a frame with nothing held; `*N` repeats a frame.
        #[arg(long, default_value = "-")]
        keys: String,
        /// Print the final text screen
        #[arg(long)]
        screen: bool,
    },
}

#[derive(Serialize)]
struct FlashReport<'a> {
    image: &'a LoadedImage,
    offset: u32,
    ceiling: u32,
    erases: usize,
    pages: usize,
    worker_ticks: u64,
}

#[derive(Serialize)]
struct SessionReport<'a> {
    exit: &'static str,
    loaded: Option<&'a LoadedImage>,
    frames: u64,
    save_slot: u8,
    reboots: usize,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{}: {}", s, e))
}

fn configure_logging(cli: &Cli) -> Result<()> {
    let config = LogConfig::global();
    if let Some(level) = &cli.log_level {
        let level = LogLevel::from_str(level).with_context(|| format!("unknown log level {:?}", level))?;
        config.set_global_level(level);
    }
    for entry in &cli.log_category {
        let (name, level) = entry
            .split_once('=')
            .with_context(|| format!("expected CATEGORY=LEVEL, got {:?}", entry))?;
        let category = LogCategory::from_name(name).with_context(|| format!("unknown log category {:?}", name))?;
        let level = LogLevel::from_str(level).with_context(|| format!("unknown log level {:?}", level))?;
        config.set_level(category, level);
    }
    if let Some(path) = &cli.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("cannot open log file {}", path.display()))?;
    }
    Ok(())
}

fn key_code(name: &str) -> Option<u8> {
    let code = match name {
        "up" => hid::UP,
        "down" => hid::DOWN,
        "left" => hid::LEFT,
        "right" => hid::RIGHT,
        "enter" | "start" => hid::ENTER,
        "esc" | "select" => hid::ESCAPE,
        "backspace" => hid::BACKSPACE,
        "delete" | "del" => hid::DELETE,
        "z" | "a" => hid::Z,
        "x" | "b" => hid::X,
        f if f.starts_with('f') => {
            let n: u8 = f[1..].parse().ok()?;
            if !(1..=8).contains(&n) {
                return None;
            }
            hid::F1 + n - 1
        }
        _ => return None,
    };
    Some(code)
}

/// Parse a key script into replayable input frames
fn parse_script(script: &str) -> Result<ScriptedInput> {
    let mut input = ScriptedInput::new();
    for token in script.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (frame, count) = match token.split_once('*') {
            Some((frame, n)) => (frame, n.parse::<usize>().with_context(|| format!("bad repeat in {:?}", token))?),
            None => (token, 1),
        };

        let mut modifier = 0;
        let mut keys = Vec::new();
        if frame != "-" {
            for part in frame.split('+') {
                match part.to_ascii_lowercase().as_str() {
                    "ctrl" => modifier |= hid::MOD_LCTRL,
                    "alt" => modifier |= hid::MOD_LALT,
                    name => keys.push(key_code(name).with_context(|| format!("unknown key {:?}", part))?),
                }
            }
        }
        if keys.len() > 6 {
            bail!("more than six keys in {:?}", token);
        }
        for _ in 0..count {
            input.push(KeyboardReport::with_keys(modifier, &keys), GamepadState::default());
        }
    }
    Ok(input)
}

fn programmer(cli: &Cli, lockout: Lockout) -> FlashProgrammer<MemoryFlash, CountingInterrupts> {
    let irq = CountingInterrupts::default();
    FlashProgrammer::new(
        MemoryFlash::new(cli.flash_size).observing(&irq),
        irq,
        ProgramRegion::after_image(cli.image_end, cli.ceiling),
        lockout,
    )
}

fn list(cli: &Cli, path: Option<&str>) -> Result<()> {
    let mut storage = HostStorage::new(&cli.root);
    let path = path.unwrap_or(&cli.home);
    let catalog = Catalog::build(&mut storage, path, &cli.ext)
        .with_context(|| format!("cannot list {:?}", path))?;
    log::info!("{} entries in {:?}", catalog.len(), path);
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}

fn flash(cli: &Cli, path: &str, out: Option<&PathBuf>) -> Result<()> {
    let mut storage = HostStorage::new(&cli.root);
    let lockout = Lockout::new();
    let start = StartSignal::new();
    let worker = PresentationWorker::spawn(
        Disconnected,
        Disconnected,
        picocart_core::input::InputLatch::new(),
        &lockout,
        start.clone(),
        FRAME_TICK,
    )
    .context("cannot start presentation worker")?;
    start.release();

    let mut programmer = programmer(cli, lockout);
    let result = programmer.write(&mut storage, path);
    let worker_ticks = worker.ticks();
    if worker.shutdown().is_err() {
        log::error!("presentation worker panicked");
    }
    let image = result.with_context(|| format!("cannot flash {:?}", path))?;

    let region = programmer.region();
    let flash = programmer.flash();
    if let Some(out) = out {
        let start = region.offset() as usize;
        let end = start + image.size as usize;
        fs::write(out, &flash.contents()[start..end])
            .with_context(|| format!("cannot write {}", out.display()))?;
        log::info!("wrote {} bytes to {}", image.size, out.display());
    }

    let report = FlashReport {
        image: &image,
        offset: region.offset(),
        ceiling: region.ceiling(),
        erases: flash.erase_calls().len(),
        pages: flash.program_calls(),
        worker_ticks,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn config(
    cli: &Cli,
    swap_ab: Option<bool>,
    tv_system: Option<u8>,
    tv_lines: Option<u8>,
    color_freq: Option<u8>,
    color: Option<bool>,
    shift_lines: Option<bool>,
    shift_half_frame: Option<bool>,
) -> Result<()> {
    let mut storage = HostStorage::new(&cli.root);
    let store = ConfigStore::in_dir(&cli.home);
    let mut record = store.load(&mut storage);
    let before = record;

    if let Some(v) = swap_ab {
        record.swap_ab = v;
    }
    let d = &mut record.display;
    if let Some(v) = tv_system {
        d.tv_system = v;
    }
    if let Some(v) = tv_lines {
        d.tv_lines = v;
    }
    if let Some(v) = color_freq {
        d.color_freq = v;
    }
    if let Some(v) = color {
        d.color = v;
    }
    if let Some(v) = shift_lines {
        d.shift_lines = v;
    }
    if let Some(v) = shift_half_frame {
        d.shift_half_frame = v;
    }

    if record != before {
        storage
            .mkdir(&cli.home)
            .with_context(|| format!("cannot create {:?}", cli.home))?;
        store
            .save(&mut storage, &record)
            .with_context(|| format!("cannot save {:?}", store.path()))?;
        log::info!("saved {}", storage::file_name(store.path()));
    }
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn browse(cli: &Cli, keys: &str, show_screen: bool) -> Result<()> {
    let input = parse_script(keys)?;
    let options = SessionOptions {
        home: cli.home.clone(),
        extensions: cli.ext.clone(),
        tv_out: cli.tv_out,
        program_name: "picocart".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let mut session = Session::new(
        HostStorage::new(&cli.root),
        programmer(cli, Lockout::new()),
        HeadlessEmulator::new(),
        HostPlatform::default(),
        input,
        TextBuffer::default(),
        options,
    );
    let exit = session.run().context("session failed")?;

    if show_screen {
        print!("{}", session.display());
    }
    let report = SessionReport {
        exit: match exit {
            SessionExit::Reboot => "reboot",
            SessionExit::InputClosed => "input-closed",
        },
        loaded: session.context().loaded.as_ref(),
        frames: session.emulator().frames(),
        save_slot: session.context().save_slot,
        reboots: session.platform().reboots(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    configure_logging(&cli)?;

    match &cli.command {
        Command::List { path } => list(&cli, path.as_deref()),
        Command::Flash { path, out } => flash(&cli, path, out.as_ref()),
        Command::Config {
            swap_ab,
            tv_system,
            tv_lines,
            color_freq,
            color,
            shift_lines,
            shift_half_frame,
        } => config(
            &cli,
            *swap_ab,
            *tv_system,
            *tv_lines,
            *color_freq,
            *color,
            *shift_lines,
            *shift_half_frame,
        ),
        Command::Browse { keys, screen } => browse(&cli, keys, *screen),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picocart_core::input::ControlSource;

    #[test]
    fn test_parse_u32_accepts_hex_and_decimal() {
        assert_eq!(parse_u32("0x10040000"), Ok(0x1004_0000));
        assert_eq!(parse_u32("4096"), Ok(4096));
        assert!(parse_u32("0xZZ").is_err());
    }

    #[test]
    fn test_parse_script_frames() {
        let mut input = parse_script("-, down*2, ctrl+f3, enter+esc").unwrap();
        assert_eq!(input.remaining(), 5);

        assert!(!input.poll().unwrap().buttons.any());
        assert!(input.poll().unwrap().buttons.down);
        assert!(input.poll().unwrap().buttons.down);
        let state = input.poll().unwrap();
        assert!(state.ctrl);
        assert_eq!(state.function_key, Some(3));
        assert!(input.poll().unwrap().menu_chord);
        assert!(input.poll().is_none());
    }

    #[test]
    fn test_parse_script_rejects_unknown_keys() {
        assert!(parse_script("down,jump").is_err());
        assert!(parse_script("f9").is_err());
        assert!(parse_script("down*x").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "picocart",
            "flash",
            "\\PCE\\game.pce",
            "--root",
            "/tmp/card",
            "--image-end",
            "0x10020000",
        ])
        .unwrap();
        assert_eq!(cli.image_end, 0x1002_0000);
        assert!(matches!(cli.command, Command::Flash { .. }));
    }
}
