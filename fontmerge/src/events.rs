//! Progress reporting.
//!
//! Build code reports what it does through an [`EventSink`] rather than
//! printing, so callers decide whether events go to the log, a UI, or a test
//! buffer.

use std::{path::PathBuf, sync::Mutex};

use log::{debug, info, warn};

use crate::merge::MergeResult;

/// Something that happened during a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildEvent {
    UnitStarted {
        family: String,
        variant: String,
    },
    /// The unit's output already exists.
    UnitSkippedExisting {
        family: String,
        variant: String,
        path: PathBuf,
    },
    SourceMerged {
        source: String,
        result: MergeResult,
    },
    /// A source contributed nothing because it could not be used.
    SourceSkipped {
        source: String,
        reason: String,
    },
    CapacityReached {
        source: String,
        glyph_count: usize,
    },
    FrequencyFill {
        candidates: usize,
        result: MergeResult,
    },
    TablesRemoved {
        tags: Vec<String>,
    },
    UnitFinished {
        family: String,
        variant: String,
        path: PathBuf,
        glyph_count: usize,
        codepoint_count: usize,
    },
    UnitFailed {
        family: String,
        variant: String,
        reason: String,
    },
    Delivered {
        path: PathBuf,
    },
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: BuildEvent);
}

/// Forwards events to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: BuildEvent) {
        match event {
            BuildEvent::UnitStarted { family, variant } => info!("building {family} {variant}"),
            BuildEvent::UnitSkippedExisting { path, .. } => {
                info!("{} already exists, skipping", path.display())
            }
            BuildEvent::SourceMerged { source, result } => {
                if result.glyphs_added > 0 || result.codepoints_added > 0 {
                    info!(
                        "added {} glyphs, {} codepoints from {source}",
                        result.glyphs_added, result.codepoints_added
                    );
                } else {
                    debug!("nothing new in {source}");
                }
            }
            BuildEvent::SourceSkipped { source, reason } => warn!("skipped {source}: {reason}"),
            BuildEvent::CapacityReached {
                source,
                glyph_count,
            } => warn!("glyph limit reached merging {source} ({glyph_count} glyphs)"),
            BuildEvent::FrequencyFill { candidates, result } => info!(
                "frequency fill: {} of {candidates} available characters added in {} glyphs",
                result.codepoints_added, result.glyphs_added
            ),
            BuildEvent::TablesRemoved { tags } => debug!("removed tables {}", tags.join(" ")),
            BuildEvent::UnitFinished {
                family,
                variant,
                path,
                glyph_count,
                codepoint_count,
            } => info!(
                "finished {family} {variant}: {glyph_count} glyphs, {codepoint_count} codepoints in {}",
                path.display()
            ),
            BuildEvent::UnitFailed {
                family,
                variant,
                reason,
            } => warn!("failed {family} {variant}: {reason}"),
            BuildEvent::Delivered { path } => debug!("delivered {}", path.display()),
        }
    }
}

/// Keeps every event, for inspection after the fact.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<BuildEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: BuildEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
