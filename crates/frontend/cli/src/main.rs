use anyhow::{Context, Result};
use clap::Parser;
use emu_bbc::serial::acia::{STATUS_RDRF, STATUS_TDRE};
use emu_bbc::serial::{ACIA_BASE, ULA_BASE, ULA_RS423};
use emu_bbc::{BbcOptions, ByteInput, ByteOutput, ChannelInput, CpuDriver, CpuMode, SerialController};
use emu_core::{IrqLines, LogConfig, LogFlags, LogLevel};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

/// ACIA control for the echo loop: divide by 64, 8N1, RTS low, no TX IRQ.
const ECHO_CONTROL: u8 = 0x16;
const ACIA_MASTER_RESET: u8 = 0x03;

/// Run the serial controller headless with a tiny guest that echoes every
/// RS423 byte back out.
#[derive(Parser)]
struct Args {
    /// File fed into the RS423 input; stdin if omitted
    input: Option<PathBuf>,

    /// Ticks to run; 0 runs until the input is exhausted and echoed
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Core log level: off, error, warn, info, debug, trace
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Write core logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Comma-separated log flags, e.g. "serial:state"
    #[arg(long, default_value = "")]
    log_flags: String,

    /// CPU execution strategy: interp, inturbo or jit
    #[arg(long, default_value = "interp")]
    cpu_mode: String,

    /// Send CR bytes to the terminal unchanged. By default this harness turns
    /// the guest's CR into LF for display; the controller itself never remaps
    /// outbound bytes.
    #[arg(long, default_value_t = false)]
    raw: bool,

    /// Dump the serial save-state to this file as JSON on exit
    #[arg(long)]
    save: Option<PathBuf>,
}

/// Host terminal output. The guest ends lines with CR; shown as LF unless `raw`.
struct HostOutput {
    out: io::Stdout,
    raw: bool,
}

impl ByteOutput for HostOutput {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        let byte = if !self.raw && byte == b'\r' { b'\n' } else { byte };
        self.out.write_all(&[byte])?;
        self.out.flush()
    }
}

fn configure_logging(args: &Args) -> Result<LogFlags> {
    let config = LogConfig::global();
    let level = LogLevel::from_str(&args.log_level)
        .with_context(|| format!("unknown log level {:?}", args.log_level))?;
    config.set_global_level(level);

    if let Some(path) = args.log_file.as_ref() {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let flags = LogFlags::parse(&args.log_flags);
    config.enable_flags(&flags);
    Ok(flags)
}

/// What the guest does each tick: poll status, stash received bytes, send
/// the oldest stashed byte once the transmitter is free.
fn guest_step(serial: &mut SerialController, pending: &mut VecDeque<u8>) {
    let status = serial.read_mapped(ACIA_BASE).unwrap_or(0);
    if status & STATUS_RDRF != 0 {
        if let Some(byte) = serial.read_mapped(ACIA_BASE + 1) {
            pending.push_back(byte);
        }
    }
    if status & STATUS_TDRE != 0 {
        if let Some(byte) = pending.pop_front() {
            serial.write_mapped(ACIA_BASE + 1, byte);
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let log_flags = configure_logging(&args)?;
    let cpu_mode: CpuMode = args.cpu_mode.parse()?;
    let options = BbcOptions {
        log_flags,
        cpu_mode,
    };
    let cpu = CpuDriver::new(options.cpu_mode);
    log::info!("cpu mode: {}", cpu.mode());

    let input = match args.input.as_ref() {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            ChannelInput::spawn_reader(file)?
        }
        None => ChannelInput::spawn_reader(io::stdin())?,
    };
    let input = Rc::new(RefCell::new(input));
    let port_input: Box<dyn ByteInput> = Box::new(input.clone());

    let irq = IrqLines::new();
    let mut serial = SerialController::new(irq.clone(), &options);
    serial.set_io_handles(
        Some(port_input),
        Some(Box::new(HostOutput {
            out: io::stdout(),
            raw: args.raw,
        })),
    );
    serial.write_mapped(ULA_BASE, ULA_RS423);
    serial.write_mapped(ACIA_BASE, ACIA_MASTER_RESET);
    serial.write_mapped(ACIA_BASE, ECHO_CONTROL);

    let mut pending = VecDeque::new();
    let mut ticks = 0u64;
    loop {
        guest_step(&mut serial, &mut pending);
        serial.tick();
        ticks += 1;

        if args.ticks != 0 {
            if ticks >= args.ticks {
                break;
            }
            continue;
        }

        let idle = pending.is_empty() && serial.status() & STATUS_TDRE != 0;
        if idle && serial.status() & STATUS_RDRF == 0 {
            if input.borrow_mut().is_exhausted() {
                break;
            }
            // Nothing to do until the reader thread delivers more.
            thread::sleep(Duration::from_millis(1));
        }
    }
    log::info!("ran {} ticks, irq asserted: {}", ticks, irq.is_asserted());

    if let Some(path) = args.save.as_ref() {
        let state = serial.save_state();
        let mut f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
    }

    Ok(())
}
