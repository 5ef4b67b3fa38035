// src/report.rs
use tracing::{info, warn};

use crate::engine::machine::TickReport;

pub fn log_tick(started_ms: i64, report: &TickReport) {
    if report.failed > 0 {
        warn!(
            tick = started_ms,
            tickers = report.total(),
            written = report.written(),
            failed = report.failed,
            "tick finished with failures"
        );
        return;
    }

    info!(
        tick = started_ms,
        tickers = report.total(),
        initialized = report.initialized,
        moved = report.moved,
        unchanged = report.unchanged,
        "tick"
    );
}
