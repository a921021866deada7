//! Merge the glyph repertoires of many fonts into unified font families.
//!
//! Sources are grouped into priority stages and merged one after another
//! into a base font; the first source to supply a codepoint owns it. What is
//! left of the 65535 glyph budget is then filled with Han characters in
//! frequency order, and regional families are derived from the result.
//!
//! The [`Pipeline`] drives whole builds. The pieces it is made of, the
//! [`GlyphMerger`], the [`Classifier`] and the frequency fill, work on any
//! [`FontHandle`] and can be used on their own.

pub mod binary;
pub mod classify;
pub mod config;
pub mod deliver;
pub mod engine;
pub mod error;
pub mod events;
pub mod extract;
pub mod finalize;
pub mod font;
pub mod hani;
pub mod merge;
pub mod pipeline;
pub mod scale;
pub mod sources;
pub mod summary;

pub use binary::BinaryEngine;
pub use classify::{Classifier, CodepointPolicy};
pub use config::{BuildConfig, BuildVariant, FamilySpec, LayoutMode, StageDescriptor};
pub use deliver::deliver;
pub use engine::{CachedEngine, FontEngine};
pub use error::{BuildError, ConfigError, EngineError, FrequencyError};
pub use events::{BuildEvent, EventSink, LogSink, MemorySink};
pub use font::{Font, FontHandle};
pub use merge::{GlyphMerger, MergeResult, MergeStatus, MAX_GLYPHS};
pub use pipeline::Pipeline;
pub use summary::{BuildSummary, UnitOutcome};
