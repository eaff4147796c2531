//! Heap tracing - subscriber setup and collector events
//!
//! Every collection runs inside a `minor_gc` span, so events from the
//! mark, copy and update phases carry the core and cycle number. Output
//! goes to the console or a daily-rotated file, as compact text or JSON.
//!
//! Per-object events (allocation, promotion) are at `trace` level and cost
//! nothing unless that level is enabled.

use once_cell::sync::OnceCell;
use std::path::Path;
use tracing::Level;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter};

pub use tracing::{debug, error, info, trace, warn};

const DEFAULT_LOG_FILE: &str = "cellheap.log";

static SUBSCRIBER: OnceCell<()> = OnceCell::new();

/// Held so the background writer flushes until exit
static WRITER_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Where and how heap events are written
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Most verbose level emitted when `RUST_LOG` is unset
    pub level: Level,
    /// File to append to; the console when None
    pub log_path: Option<String>,
    /// One JSON object per event
    pub json_format: bool,
    /// Emit span open/close events with timings
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

impl LogConfig {
    /// Read `CELLHEAP_LOG_LEVEL`, `CELLHEAP_LOG_FILE`, `CELLHEAP_LOG_JSON`
    /// and `CELLHEAP_LOG_SPANS`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok();

        Self {
            level: var("CELLHEAP_LOG_LEVEL").map_or(Level::INFO, |level| parse_level(&level)),
            log_path: var("CELLHEAP_LOG_FILE"),
            json_format: var("CELLHEAP_LOG_JSON").is_some(),
            show_spans: var("CELLHEAP_LOG_SPANS").is_some(),
        }
    }

    /// Errors only
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Every allocation and promotion, with collection spans, to a file
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            log_path: Some(DEFAULT_LOG_FILE.to_string()),
            show_spans: true,
            ..Self::default()
        }
    }
}

/// Unknown names fall back to `info`
fn parse_level(level: &str) -> Level {
    level.trim().parse().unwrap_or(Level::INFO)
}

pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Install the global subscriber
///
/// Only the first call does anything. A subscriber installed earlier by
/// the embedding program is left in place.
pub fn init_with_config(config: LogConfig) {
    SUBSCRIBER.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("cellheap={}", config.level.as_str().to_lowercase())));
        let spans = if config.show_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match config.log_path.as_deref() {
            Some(path) => {
                let path = Path::new(path);
                let directory = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
                let prefix = path.file_name().map_or_else(|| DEFAULT_LOG_FILE.into(), |name| name.to_os_string());
                tracing_appender::non_blocking(rolling::daily(directory, prefix))
            }
            None => tracing_appender::non_blocking(std::io::stdout()),
        };
        let _ = WRITER_GUARD.set(guard);

        let layer = fmt::layer().with_writer(writer).with_span_events(spans);
        let installed = if config.json_format {
            tracing_subscriber::registry()
                .with(layer.json().with_filter(filter))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(layer.compact().with_line_number(cfg!(debug_assertions)).with_filter(filter))
                .try_init()
        };

        if installed.is_err() {
            debug!("Global subscriber already installed; keeping it");
        }
    });
}

pub fn is_initialized() -> bool {
    SUBSCRIBER.get().is_some()
}

// ===== Collector events =====

#[inline]
pub fn log_allocation(core: u32, object_type: &str, size: usize, addr: usize) {
    trace!(
        event = "allocation",
        core,
        object_type,
        size_bytes = size,
        address = format_args!("{:#x}", addr),
        "Object allocated"
    );
}

pub fn log_gc_start(core: u32, cycle: u64, nursery_used: usize) {
    debug!(event = "gc_start", core, cycle, nursery_used_bytes = nursery_used, "Minor collection started");
}

pub fn log_gc_mark(marked: usize, marked_bytes: usize) {
    debug!(event = "gc_mark", marked, marked_bytes, "Survivors marked");
}

pub fn log_gc_copy(copied: usize, promoted: usize, reclaimed_bytes: usize) {
    debug!(event = "gc_copy", copied, promoted, reclaimed_bytes, "Survivors evacuated");
}

pub fn log_gc_update(relocations: usize, references_updated: usize, frames_released: usize) {
    debug!(
        event = "gc_update",
        relocations,
        references_updated,
        coroutine_frames_released = frames_released,
        "References updated"
    );
}

/// Summary line, one per collection
pub fn log_gc_complete(pause_us: u64, reclaimed: usize, live: usize) {
    info!(event = "gc_complete", reclaimed, live, pause_us, "Minor collection finished");
}

#[inline]
pub fn log_promotion(uid: u64, size: usize, addr: usize) {
    trace!(
        event = "promotion",
        uid,
        size_bytes = size,
        address = format_args!("{:#x}", addr),
        "Object promoted to old generation"
    );
}

pub fn log_fatal(core: u32, code: i32, message: &str) {
    error!(event = "fatal", core, code, error = message, "Core halted by fatal heap error");
}
