//! Error types.

use std::path::PathBuf;

use write_fonts::{read::ReadError, BuilderError};

/// Failures reading, instancing or writing a font file.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse font: {0}")]
    Read(#[from] ReadError),
    #[error("failed to build font: {0}")]
    Build(#[from] BuilderError),
    #[error("font has no '{0}' table")]
    MissingTable(&'static str),
    #[error("glyph '{0}' references unknown component '{1}'")]
    UnknownComponent(String, String),
    #[error("font has {0} glyphs, more than a font can address")]
    TooManyGlyphs(usize),
    #[error("failed to draw glyph {0}: {1}")]
    Outline(u32, String),
    #[error("failed to compile glyph '{0}': {1}")]
    Glyph(String, String),
}

/// Failures loading a build configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate variant '{0}'")]
    DuplicateVariant(String),
}

/// Failures reading the frequency-ordered character list.
#[derive(Debug, thiserror::Error)]
pub enum FrequencyError {
    #[error("failed to read frequency list '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("frequency list is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frequency list has no '{0}' field")]
    MissingField(String),
    #[error("frequency list field '{0}' is not a string")]
    NotAString(String),
}

/// Failures that end one build unit.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no base font for variant '{variant}' in '{dir}'")]
    MissingBase { variant: String, dir: PathBuf },
    #[error("base font '{path}' does not have TrueType outlines")]
    NotTrueType { path: PathBuf },
    #[error("engine error on '{path}': {source}")]
    Engine {
        path: PathBuf,
        #[source]
        source: EngineError,
    },
    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl BuildError {
    pub(crate) fn engine(path: impl Into<PathBuf>, source: EngineError) -> Self {
        BuildError::Engine {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
