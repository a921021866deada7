//! Loading sources and collecting their candidates ahead of a merge.
//!
//! Extraction only reads: every font is loaded and scanned on its own, so a
//! batch can be spread over the rayon pool. Results arrive in completion order
//! and are put back into source order before anything is merged, since the
//! merge order decides which source owns a codepoint.

use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::mpsc,
};

use log::debug;
use rayon::prelude::*;

use crate::{
    classify::{Classifier, CodepointPolicy},
    engine::FontEngine,
    error::EngineError,
    font::{Font, FontHandle, OutlineFormat},
    merge::{collect_candidates, Candidate},
};

/// A loaded source and the glyphs a merge would consider.
#[derive(Clone, Debug)]
pub struct SourceSnapshot {
    /// The source's file name, for reporting.
    pub label: String,
    pub path: PathBuf,
    pub font: Font,
    pub candidates: Vec<Candidate>,
}

/// A source that could not be used, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipRecord {
    pub source: String,
    pub reason: String,
}

impl SkipRecord {
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        SkipRecord {
            source: source.into(),
            reason: reason.into(),
        }
    }
}

/// The outcome of extracting one source.
#[derive(Clone, Debug)]
pub enum Extracted {
    Ready(SourceSnapshot),
    Skipped(SkipRecord),
}

/// What to extract, and how.
#[derive(Clone, Debug)]
pub struct ExtractRequest<'a> {
    pub classifier: &'a Classifier,
    pub policy: CodepointPolicy,
    /// Only sources with this outline format are usable.
    pub format: OutlineFormat,
    pub is_base_font: bool,
    pub parallel: bool,
}

pub(crate) fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f` on behalf of the source at `path`. An error or a panic becomes
/// the [`SkipRecord`] that reports the source as unusable.
pub(crate) fn run_guarded<T>(
    path: &Path,
    action: &str,
    f: impl FnOnce() -> Result<T, EngineError>,
) -> Result<T, SkipRecord> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SkipRecord::new(source_label(path), e.to_string())),
        Err(payload) => Err(SkipRecord::new(
            source_label(path),
            format!("{action} panicked: {}", panic_message(payload)),
        )),
    }
}

/// Load a source, as extraction does, outside of a batch.
pub(crate) fn load_guarded<E: FontEngine + ?Sized>(
    engine: &E,
    path: &Path,
) -> Result<Font, SkipRecord> {
    run_guarded(path, "loading", || engine.load(path))
}

fn extract_one<E: FontEngine + ?Sized>(
    engine: &E,
    path: &Path,
    request: &ExtractRequest,
) -> Extracted {
    let label = source_label(path);
    let font = match engine.load(path) {
        Ok(font) => font,
        Err(e) => return Extracted::Skipped(SkipRecord::new(label, e.to_string())),
    };
    if font.outline_format() != request.format {
        return Extracted::Skipped(SkipRecord::new(
            label,
            format!("{:?} outlines, expected {:?}", font.outline_format(), request.format),
        ));
    }
    let candidates = collect_candidates(
        &font,
        request.classifier,
        request.policy,
        request.is_base_font,
    );
    debug!("{label}: {} candidate glyphs", candidates.len());
    Extracted::Ready(SourceSnapshot {
        label,
        path: path.to_owned(),
        font,
        candidates,
    })
}

fn extract_guarded<E: FontEngine + ?Sized>(
    engine: &E,
    path: &Path,
    request: &ExtractRequest,
) -> Extracted {
    panic::catch_unwind(AssertUnwindSafe(|| extract_one(engine, path, request))).unwrap_or_else(
        |payload| {
            Extracted::Skipped(SkipRecord::new(
                source_label(path),
                format!("extraction panicked: {}", panic_message(payload)),
            ))
        },
    )
}

/// Extract every source in `paths`, returning results in the order of
/// `paths`.
///
/// A source that fails to load, has the wrong outline format or panics
/// becomes a [`Extracted::Skipped`] entry; the rest of the batch is
/// unaffected.
pub fn extract_sources<E: FontEngine + ?Sized>(
    engine: &E,
    paths: &[PathBuf],
    request: &ExtractRequest,
) -> Vec<Extracted> {
    if !request.parallel {
        return paths
            .iter()
            .map(|path| extract_guarded(engine, path, request))
            .collect();
    }

    let (sender, receiver) = mpsc::channel();
    paths
        .par_iter()
        .enumerate()
        .for_each_with(sender, |sender, (i, path)| {
            // the receiver outlives the pool, so sending cannot fail
            let _ = sender.send((i, extract_guarded(engine, path, request)));
        });
    let mut completed = receiver.into_iter().collect::<Vec<_>>();
    completed.sort_by_key(|(i, _)| *i);
    completed.into_iter().map(|(_, extracted)| extracted).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::font::GlyphRecord;

    struct MapEngine(HashMap<PathBuf, Font>);

    impl FontEngine for MapEngine {
        fn load(&self, path: &Path) -> Result<Font, EngineError> {
            if path.ends_with("panics.ttf") {
                panic!("corrupt glyph data");
            }
            self.0.get(path).cloned().ok_or_else(|| EngineError::Io {
                path: path.to_owned(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }

        fn instantiate(&self, path: &Path, _: u16, _: u16) -> Result<Font, EngineError> {
            self.load(path)
        }

        fn save(&self, _: &Font, _: &Path) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn font(codepoints: &[u32]) -> Font {
        let mut font = Font::new(1000);
        for cp in codepoints {
            let name = format!("g{cp:X}");
            font.push_glyph(name.clone(), GlyphRecord::default());
            font.map_codepoint(*cp, &name);
        }
        font
    }

    fn labels(results: &[Extracted]) -> Vec<String> {
        results
            .iter()
            .map(|r| match r {
                Extracted::Ready(snapshot) => format!("ok {}", snapshot.label),
                Extracted::Skipped(skip) => format!("skip {}", skip.source),
            })
            .collect()
    }

    #[test]
    fn results_keep_source_order_and_skip_failures() {
        let mut fonts = HashMap::new();
        for i in 0..16u32 {
            fonts.insert(PathBuf::from(format!("f{i:02}.ttf")), font(&[0x41 + i]));
        }
        fonts.insert(
            PathBuf::from("cff.otf"),
            font(&[0x41]).with_format(OutlineFormat::Cff),
        );
        let engine = MapEngine(fonts);
        let mut paths = (0..16)
            .map(|i| PathBuf::from(format!("f{i:02}.ttf")))
            .collect::<Vec<_>>();
        paths.insert(3, PathBuf::from("missing.ttf"));
        paths.insert(7, PathBuf::from("panics.ttf"));
        paths.insert(9, PathBuf::from("cff.otf"));

        let classifier = Classifier::default();
        for parallel in [false, true] {
            let request = ExtractRequest {
                classifier: &classifier,
                policy: CodepointPolicy::ALLOW_ALL,
                format: OutlineFormat::TrueType,
                is_base_font: false,
                parallel,
            };
            let results = extract_sources(&engine, &paths, &request);
            let expected = paths
                .iter()
                .map(|p| {
                    let name = p.to_string_lossy();
                    if name.starts_with('f') {
                        format!("ok {name}")
                    } else {
                        format!("skip {name}")
                    }
                })
                .collect::<Vec<_>>();
            assert_eq!(labels(&results), expected);
            let Extracted::Skipped(skip) = &results[7] else {
                panic!("expected a skip");
            };
            assert!(skip.reason.contains("corrupt glyph data"), "{}", skip.reason);
        }
    }

    #[test]
    fn candidates_respect_policy() {
        let engine = MapEngine(HashMap::from([(
            PathBuf::from("mixed.ttf"),
            font(&[0x41, 0x4E00, 0xAC00]),
        )]));
        let classifier = Classifier::default();
        let request = ExtractRequest {
            classifier: &classifier,
            policy: CodepointPolicy::EXCLUDE_CJK,
            format: OutlineFormat::TrueType,
            is_base_font: false,
            parallel: true,
        };
        let results = extract_sources(&engine, &[PathBuf::from("mixed.ttf")], &request);
        let Extracted::Ready(snapshot) = &results[0] else {
            panic!("expected a snapshot");
        };
        let codepoints = snapshot
            .candidates
            .iter()
            .flat_map(|c| c.codepoints.iter().copied())
            .collect::<Vec<_>>();
        assert_eq!(codepoints, [0x41]);
    }

    #[test]
    fn guarded_loads_report_errors_and_panics() {
        let engine = MapEngine(HashMap::from([(PathBuf::from("ok.ttf"), font(&[0x41]))]));
        assert!(load_guarded(&engine, Path::new("ok.ttf")).is_ok());

        let missing = load_guarded(&engine, Path::new("dir/missing.ttf")).unwrap_err();
        assert_eq!(missing.source, "missing.ttf");

        let panicked = load_guarded(&engine, Path::new("dir/panics.ttf")).unwrap_err();
        assert_eq!(panicked.source, "panics.ttf");
        assert_eq!(panicked.reason, "loading panicked: corrupt glyph data");
    }
}
