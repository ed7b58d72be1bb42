//! Categorized logging shared by every emulated subsystem.
//!
//! # Architecture
//!
//! - **LogConfig**: process-wide configuration held in atomics, so the hot
//!   "is this enabled?" check never takes a lock
//! - **LogLevel**: Off < Error < Warn < Info < Debug < Trace
//! - **LogCategory**: which subsystem a message belongs to
//! - **LogFlags**: `subsystem:flag` switches such as `serial:state` that turn on
//!   verbose state-change tracing inside one peripheral
//! - **log()**: the single entry point; the message closure only runs when the
//!   message will actually be written
//!
//! File output goes through a background writer thread so a slow disk never
//! stalls emulation. Without a log file, messages go to stderr.
//!
//! # Usage
//!
//! ```rust
//! use emu_core::logging::{log, LogCategory, LogLevel};
//!
//! log(LogCategory::Serial, LogLevel::Info, || {
//!     format!("new motor state: {}", true)
//! });
//! ```

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Log level for controlling verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "err" | "1" => Some(LogLevel::Error),
            "warn" | "warning" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(val: u8) -> Self {
        match val {
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            5 => LogLevel::Trace,
            _ => LogLevel::Off,
        }
    }
}

/// Subsystem a log message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    /// CPU driver and execution engines
    Cpu,
    /// Memory-mapped register decoding
    Bus,
    /// ACIA and serial ULA
    Serial,
    /// Cassette deck and motor control
    Tape,
    /// Interrupt line changes
    Interrupts,
    /// Unimplemented or degraded hardware behavior
    Stubs,
}

impl LogCategory {
    /// Every category, in index order.
    pub const ALL: [LogCategory; 6] = [
        LogCategory::Cpu,
        LogCategory::Bus,
        LogCategory::Serial,
        LogCategory::Tape,
        LogCategory::Interrupts,
        LogCategory::Stubs,
    ];

    const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        match self {
            LogCategory::Cpu => 0,
            LogCategory::Bus => 1,
            LogCategory::Serial => 2,
            LogCategory::Tape => 3,
            LogCategory::Interrupts => 4,
            LogCategory::Stubs => 5,
        }
    }

    /// Short lowercase tag used as the message prefix and in `LogFlags`.
    pub fn tag(self) -> &'static str {
        match self {
            LogCategory::Cpu => "cpu",
            LogCategory::Bus => "bus",
            LogCategory::Serial => "serial",
            LogCategory::Tape => "tape",
            LogCategory::Interrupts => "irq",
            LogCategory::Stubs => "unimplemented",
        }
    }

    /// Parse a category from its tag (case-insensitive)
    pub fn from_tag(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        Self::ALL.into_iter().find(|c| c.tag() == s)
    }
}

/// Set of `subsystem:flag` switches, e.g. `serial:state`.
///
/// Parsed from a comma-separated list. Whitespace around entries is ignored
/// and empty entries are skipped. Flags are matched case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LogFlags {
    flags: BTreeSet<String>,
}

impl LogFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(list: &str) -> Self {
        let flags = list
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        Self { flags }
    }

    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn insert(&mut self, flag: &str) {
        self.flags.insert(flag.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Categories named by at least one flag (`serial:state` names `serial`).
    pub fn categories(&self) -> Vec<LogCategory> {
        let mut out: Vec<LogCategory> = self
            .flags
            .iter()
            .filter_map(|f| f.split(':').next())
            .filter_map(LogCategory::from_tag)
            .collect();
        out.dedup();
        out
    }
}

impl From<String> for LogFlags {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<LogFlags> for String {
    fn from(flags: LogFlags) -> Self {
        flags.to_string()
    }
}

impl fmt::Display for LogFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.flags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", flag)?;
        }
        Ok(())
    }
}

/// Sliding one-second window per category.
struct RateLimiter {
    max_per_second: AtomicUsize,
    window: Duration,
    state: Mutex<[WindowState; LogCategory::COUNT]>,
}

#[derive(Default)]
struct WindowState {
    stamps: VecDeque<Instant>,
    dropped: usize,
    last_report: Option<Instant>,
}

impl RateLimiter {
    fn new(max_per_second: usize) -> Self {
        Self {
            max_per_second: AtomicUsize::new(max_per_second),
            window: Duration::from_secs(1),
            state: Mutex::new(Default::default()),
        }
    }

    /// Returns (allowed, dropped count to report)
    fn should_allow(&self, category: LogCategory) -> (bool, Option<usize>) {
        let now = Instant::now();
        let max = self.max_per_second.load(Ordering::Relaxed);
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = &mut state[category.index()];

        while let Some(&front) = slot.stamps.front() {
            if now.duration_since(front) > self.window {
                slot.stamps.pop_front();
            } else {
                break;
            }
        }

        if slot.stamps.len() < max {
            slot.stamps.push_back(now);
            if slot.dropped > 0 {
                let dropped = std::mem::take(&mut slot.dropped);
                slot.last_report = Some(now);
                return (true, Some(dropped));
            }
            return (true, None);
        }

        slot.dropped += 1;
        let report_due = match slot.last_report {
            None => true,
            Some(last) => now.duration_since(last) >= self.window,
        };
        if report_due {
            let dropped = std::mem::take(&mut slot.dropped);
            slot.last_report = Some(now);
            (false, Some(dropped))
        } else {
            (false, None)
        }
    }
}

/// Global logging configuration
pub struct LogConfig {
    global_level: AtomicU8,
    category_levels: [AtomicU8; LogCategory::COUNT],
    log_sender: Mutex<Option<Sender<String>>>,
    file_logging_enabled: AtomicBool,
    rate_limiter: RateLimiter,
}

impl LogConfig {
    /// All logging off, 60 messages per second per category.
    pub fn new() -> Self {
        Self {
            global_level: AtomicU8::new(LogLevel::Off as u8),
            category_levels: Default::default(),
            log_sender: Mutex::new(None),
            file_logging_enabled: AtomicBool::new(false),
            rate_limiter: RateLimiter::new(60),
        }
    }

    /// Get the global singleton instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<LogConfig> = OnceLock::new();
        INSTANCE.get_or_init(LogConfig::new)
    }

    pub fn set_global_level(&self, level: LogLevel) {
        self.global_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_global_level(&self) -> LogLevel {
        LogLevel::from_u8(self.global_level.load(Ordering::Relaxed))
    }

    /// Set log level for a specific category
    pub fn set_level(&self, category: LogCategory, level: LogLevel) {
        self.category_levels[category.index()].store(level as u8, Ordering::Relaxed);
    }

    pub fn get_level(&self, category: LogCategory) -> LogLevel {
        LogLevel::from_u8(self.category_levels[category.index()].load(Ordering::Relaxed))
    }

    /// A category-specific level wins; `Off` there falls back to the global level.
    pub fn should_log(&self, category: LogCategory, level: LogLevel) -> bool {
        if level == LogLevel::Off {
            return false;
        }
        let category_level = self.get_level(category);
        if category_level != LogLevel::Off {
            level <= category_level
        } else {
            level <= self.get_global_level()
        }
    }

    /// Raise every category named in `flags` to at least `Info`.
    pub fn enable_flags(&self, flags: &LogFlags) {
        for category in flags.categories() {
            if self.get_level(category) < LogLevel::Info {
                self.set_level(category, LogLevel::Info);
            }
        }
    }

    /// Reset all logging to Off
    pub fn reset(&self) {
        self.set_global_level(LogLevel::Off);
        for category in LogCategory::ALL {
            self.set_level(category, LogLevel::Off);
        }
    }

    pub fn set_rate_limit(&self, max_logs_per_second: usize) {
        self.rate_limiter
            .max_per_second
            .store(max_logs_per_second, Ordering::Relaxed);
    }

    pub fn get_rate_limit(&self) -> usize {
        self.rate_limiter.max_per_second.load(Ordering::Relaxed)
    }

    /// Append log output to `path` from a background writer thread.
    ///
    /// Replaces any previous log file; the old writer exits once its channel closes.
    pub fn set_log_file(&self, path: PathBuf) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = channel::<String>();

        thread::Builder::new()
            .name("log-writer".to_string())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    let _ = writeln!(file, "{}", message);
                    let _ = file.flush();
                }
            })?;

        if let Ok(mut slot) = self.log_sender.lock() {
            *slot = Some(sender);
        }
        self.file_logging_enabled.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop logging to file and go back to stderr
    pub fn clear_log_file(&self) {
        if let Ok(mut slot) = self.log_sender.lock() {
            *slot = None;
        }
        self.file_logging_enabled.store(false, Ordering::Relaxed);
    }

    fn write_message(&self, message: String) {
        if self.file_logging_enabled.load(Ordering::Relaxed) {
            if let Ok(slot) = self.log_sender.lock() {
                if let Some(sender) = slot.as_ref() {
                    if let Err(failed) = sender.send(message) {
                        eprintln!("{}", failed.0);
                    }
                    return;
                }
            }
        }
        eprintln!("{}", message);
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Off => "off",
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Log a message with the specified category and level.
///
/// The closure only runs when the category/level is enabled and the
/// category's rate limit has room. Output looks like `[serial:info] reset`.
pub fn log<F>(category: LogCategory, level: LogLevel, message_fn: F)
where
    F: FnOnce() -> String,
{
    let config = LogConfig::global();
    if !config.should_log(category, level) {
        return;
    }

    let (allowed, dropped) = config.rate_limiter.should_allow(category);
    if let Some(count) = dropped.filter(|&n| n > 0) {
        config.write_message(format!(
            "[{}:warn] rate limit exceeded, {} message(s) dropped",
            category.tag(),
            count
        ));
    }
    if allowed {
        config.write_message(format!(
            "[{}:{}] {}",
            category.tag(),
            level_tag(level),
            message_fn()
        ));
    }
}
