//! Loading, instancing and saving fonts.
//!
//! Build code never touches font files directly; it goes through a
//! [`FontEngine`]. The [`BinaryEngine`](crate::binary::BinaryEngine) is the
//! real implementation, and [`CachedEngine`] adds the on-disk instance cache
//! on top of any engine.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::{error::EngineError, font::Font};

/// Reads and writes fonts.
///
/// Engines are shared between worker threads.
pub trait FontEngine: Sync {
    /// Read the font at `path`.
    fn load(&self, path: &Path) -> Result<Font, EngineError>;

    /// Read the font at `path` and pin its `wght` and `wdth` axes.
    ///
    /// A static font is returned as loaded. Requested values outside an
    /// axis' range fall back to the axis default; axes other than `wght` and
    /// `wdth` stay at their defaults.
    fn instantiate(&self, path: &Path, weight: u16, width: u16) -> Result<Font, EngineError>;

    /// Write `font` to `path`, replacing any existing file.
    fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError>;
}

impl<E: FontEngine + ?Sized> FontEngine for &E {
    fn load(&self, path: &Path) -> Result<Font, EngineError> {
        (**self).load(path)
    }

    fn instantiate(&self, path: &Path, weight: u16, width: u16) -> Result<Font, EngineError> {
        (**self).instantiate(path, weight, width)
    }

    fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError> {
        (**self).save(font, path)
    }
}

/// One axis of a variable font, in user coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct AxisInfo {
    pub tag: String,
    pub min: f32,
    pub default: f32,
    pub max: f32,
}

impl AxisInfo {
    pub fn new(tag: &str, min: f32, default: f32, max: f32) -> Self {
        AxisInfo {
            tag: tag.to_string(),
            min,
            default,
            max,
        }
    }

    fn clamp_or_default(&self, requested: f32) -> f32 {
        if (self.min..=self.max).contains(&requested) {
            requested
        } else {
            debug!(
                "{} {requested} outside {}..={}, using default {}",
                self.tag, self.min, self.max, self.default
            );
            self.default
        }
    }
}

/// The user-space location for a `weight`/`width` request.
///
/// Every axis of the font gets a coordinate: `wght` and `wdth` take the
/// requested values when they are in range, everything else sits at its
/// default.
pub fn resolve_location(axes: &[AxisInfo], weight: u16, width: u16) -> Vec<(String, f32)> {
    axes.iter()
        .map(|axis| {
            let value = match axis.tag.as_str() {
                "wght" => axis.clamp_or_default(weight as f32),
                "wdth" => axis.clamp_or_default(width as f32),
                _ => axis.default,
            };
            (axis.tag.clone(), value)
        })
        .collect()
}

/// The cache file for an instance of `source`.
pub fn cache_file_name(source: &Path, weight: u16, width: u16) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    format!("{stem}-wght{weight}-wdth{width}.ttf")
}

/// Serves instances from a directory of previously saved instances.
///
/// A cached instance is used whenever its file exists; nothing checks it
/// against the source it came from.
#[derive(Clone, Debug)]
pub struct CachedEngine<E> {
    inner: E,
    cache_dir: PathBuf,
}

impl<E: FontEngine> CachedEngine<E> {
    pub fn new(inner: E, cache_dir: impl Into<PathBuf>) -> Self {
        CachedEngine {
            inner,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where the instance of `source` at `weight`/`width` is cached.
    pub fn cache_path(&self, source: &Path, weight: u16, width: u16) -> PathBuf {
        self.cache_dir
            .join(cache_file_name(source, weight, width))
    }
}

impl<E: FontEngine> FontEngine for CachedEngine<E> {
    fn load(&self, path: &Path) -> Result<Font, EngineError> {
        self.inner.load(path)
    }

    fn instantiate(&self, path: &Path, weight: u16, width: u16) -> Result<Font, EngineError> {
        let cached = self.cache_path(path, weight, width);
        if cached.is_file() {
            debug!("instance cache hit {}", cached.display());
            let mut font = self.inner.load(&cached)?;
            font.set_instanced(true);
            return Ok(font);
        }
        let font = self.inner.instantiate(path, weight, width)?;
        if font.is_instanced() {
            let stored = std::fs::create_dir_all(&self.cache_dir)
                .map_err(|source| EngineError::Io {
                    path: self.cache_dir.clone(),
                    source,
                })
                .and_then(|_| self.inner.save(&font, &cached));
            if let Err(e) = stored {
                warn!("failed to cache instance {}: {e}", cached.display());
            }
        }
        Ok(font)
    }

    fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError> {
        self.inner.save(font, path)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use super::*;
    use crate::font::{FontHandle, GlyphRecord};

    #[test]
    fn out_of_range_axes_use_their_default() {
        let axes = [
            AxisInfo::new("wght", 100.0, 400.0, 900.0),
            AxisInfo::new("wdth", 87.5, 100.0, 100.0),
            AxisInfo::new("opsz", 8.0, 14.0, 144.0),
        ];
        let location = resolve_location(&axes, 700, 75);
        assert_eq!(
            location,
            [
                ("wght".to_string(), 700.0),
                ("wdth".to_string(), 100.0),
                ("opsz".to_string(), 14.0),
            ]
        );
        let location = resolve_location(&axes, 1000, 100);
        assert_eq!(location[0].1, 400.0);
        assert_eq!(location[1].1, 100.0);
    }

    #[test]
    fn cache_names() {
        assert_eq!(
            cache_file_name(Path::new("/src/NotoSans[wdth,wght].ttf"), 700, 75),
            "NotoSans[wdth,wght]-wght700-wdth75.ttf"
        );
    }

    /// Instances are fonts whose glyph count records the requested weight.
    #[derive(Default)]
    struct CountingEngine {
        instantiated: AtomicUsize,
        saved: Mutex<HashMap<PathBuf, usize>>,
    }

    impl FontEngine for CountingEngine {
        fn load(&self, path: &Path) -> Result<Font, EngineError> {
            let saved = self.saved.lock().unwrap();
            let glyphs = saved.get(path).copied().ok_or_else(|| EngineError::Io {
                path: path.to_owned(),
                source: std::io::ErrorKind::NotFound.into(),
            })?;
            let mut font = Font::new(1000);
            for i in 0..glyphs {
                font.push_glyph(format!("g{i}"), GlyphRecord::default());
            }
            Ok(font)
        }

        fn instantiate(&self, _path: &Path, weight: u16, _width: u16) -> Result<Font, EngineError> {
            self.instantiated.fetch_add(1, Ordering::SeqCst);
            let mut font = Font::new(1000);
            for i in 0..weight / 100 {
                font.push_glyph(format!("g{i}"), GlyphRecord::default());
            }
            font.set_instanced(true);
            Ok(font)
        }

        fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError> {
            std::fs::write(path, b"").map_err(|source| EngineError::Io {
                path: path.to_owned(),
                source,
            })?;
            self.saved
                .lock()
                .unwrap()
                .insert(path.to_owned(), font.glyph_count());
            Ok(())
        }
    }

    #[test]
    fn second_instantiation_comes_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = CachedEngine::new(CountingEngine::default(), dir.path().join("cache"));
        let source = Path::new("Var[wght].ttf");

        let first = engine.instantiate(source, 700, 100).unwrap();
        let second = engine.instantiate(source, 700, 100).unwrap();
        assert_eq!(engine.inner().instantiated.load(Ordering::SeqCst), 1);
        assert_eq!(first.glyph_count(), second.glyph_count());
        assert!(engine.cache_path(source, 700, 100).is_file());

        engine.instantiate(source, 400, 100).unwrap();
        assert_eq!(engine.inner().instantiated.load(Ordering::SeqCst), 2);
    }
}
