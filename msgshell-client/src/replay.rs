//! JSON-lines replay: one [`HostEvent`] per input line, one decision
//! per output line.
//!
//! Events without `at_ms` are stamped with the replay clock, which starts at
//! zero and follows the most recent `at_ms` seen. Streams can therefore mix
//! timestamped and untimestamped events without jumping to wall-clock time.

use std::io::{self, BufRead, Write};

use serde::Serialize;
use tracing::{info, warn};

use crate::host::{HostEvent, PolicyHost};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub handled: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub enum ReplayError {
    Read(io::Error),
    Encode(serde_json::Error),
    Write(io::Error),
}

impl std::fmt::Display for ReplayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayError::Read(e) => write!(f, "failed to read event stream: {e}"),
            ReplayError::Encode(e) => write!(f, "failed to encode output: {e}"),
            ReplayError::Write(e) => write!(f, "failed to write output: {e}"),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Read(e) | ReplayError::Write(e) => Some(e),
            ReplayError::Encode(e) => Some(e),
        }
    }
}

/// Feeds every event in `reader` through `host` and writes the decisions to
/// `out`. Blank lines and `#` comments are ignored; malformed events are
/// logged and skipped.
pub fn replay(
    reader: impl BufRead,
    out: &mut impl Write,
    host: &mut PolicyHost,
) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary::default();
    let mut clock_ms = 0_u64;

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(ReplayError::Read)?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: HostEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(err) => {
                warn!(line = index + 1, "skipping malformed event: {}", err);
                summary.skipped += 1;
                continue;
            }
        };

        if let Some(at_ms) = event.at_ms() {
            clock_ms = at_ms;
        }
        let decision = host.handle(event, clock_ms);
        write_json_line(out, &decision)?;
        summary.handled += 1;
    }

    info!(
        handled = summary.handled,
        skipped = summary.skipped,
        open_sessions = host.open_sessions(),
        "replay finished"
    );
    Ok(summary)
}

pub fn write_json_line(out: &mut impl Write, value: &impl Serialize) -> Result<(), ReplayError> {
    serde_json::to_writer(&mut *out, value).map_err(ReplayError::Encode)?;
    out.write_all(b"\n")
        .and_then(|()| out.flush())
        .map_err(ReplayError::Write)
}
