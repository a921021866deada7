//! Filling a target with Han characters, most frequent first.
//!
//! Han repertoires are far larger than the glyph budget left after the other
//! stages, so instead of merging whole fonts, the characters of a frequency
//! list are pulled one at a time from whichever source has them until the
//! target is full.

use std::{collections::BTreeMap, path::Path};

use log::{debug, info, warn};

use crate::{
    error::FrequencyError,
    font::{FontHandle, OutlineFormat},
    merge::{
        component_closure, synthesize_glyph_name, CapacityReached, CopyRequest, GlyphCopier,
        MergeResult, MergeStatus,
    },
    scale,
};

/// Every codepoint covered by a set of sources, each resolved to the first
/// source that maps it.
#[derive(Debug)]
pub struct CollectiveMap<'s, F> {
    sources: &'s [F],
    entries: BTreeMap<u32, (usize, String)>,
}

impl<'s, F: FontHandle> CollectiveMap<'s, F> {
    /// Combine the codepoint maps of `sources`, earlier sources winning.
    ///
    /// Sources without TrueType outlines cannot be copied from and are
    /// ignored.
    pub fn build(sources: &'s [F]) -> Self {
        let mut entries = BTreeMap::new();
        for (i, source) in sources.iter().enumerate() {
            if source.outline_format() != OutlineFormat::TrueType {
                debug!("source {i} has no TrueType outlines, not used for fill");
                continue;
            }
            for (&codepoint, glyph) in source.charmap() {
                entries
                    .entry(codepoint)
                    .or_insert_with(|| (i, glyph.clone()));
            }
        }
        CollectiveMap { sources, entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The source index and source glyph name for `codepoint`.
    pub fn get(&self, codepoint: u32) -> Option<(usize, &str)> {
        self.entries
            .get(&codepoint)
            .map(|(i, glyph)| (*i, glyph.as_str()))
    }

    pub fn source(&self, index: usize) -> Option<&'s F> {
        self.sources.get(index)
    }
}

/// Convenience for [`CollectiveMap::build`].
pub fn build_collective_map<F: FontHandle>(sources: &[F]) -> CollectiveMap<'_, F> {
    CollectiveMap::build(sources)
}

/// Copy characters into `target` in the order of `characters`.
///
/// Characters the target covers, or no source has, are passed over. Each copy
/// is scaled from its own source's UPM. The fill ends at the first character
/// that does not fit under `glyph_limit`; later characters are not
/// considered even if they would have fit.
pub fn fill_by_frequency<F, T>(
    target: &mut T,
    characters: impl IntoIterator<Item = char>,
    collective: &CollectiveMap<F>,
    glyph_limit: usize,
) -> MergeResult
where
    F: FontHandle,
    T: FontHandle + ?Sized,
{
    let target_upm = target.units_per_em();
    let mut copier = GlyphCopier::new(target, glyph_limit);
    if copier.is_full() {
        return copier.finish(MergeStatus::CapacityReached);
    }

    for ch in characters {
        let codepoint = ch as u32;
        if copier.target().covers(codepoint) {
            continue;
        }
        let Some((source_id, glyph)) = collective.get(codepoint) else {
            continue;
        };
        let Some(source) = collective.source(source_id) else {
            continue;
        };
        let components = match component_closure(source, glyph) {
            Ok(components) => components,
            Err(e) => {
                debug!("skipping U+{codepoint:04X}: {e}");
                continue;
            }
        };
        let ratio = scale::direct_scale_factor(source.units_per_em(), target_upm);
        let request = CopyRequest::renamed(glyph, &components, synthesize_glyph_name(codepoint));
        match copier.copy(source_id, source, request, ratio) {
            Ok(Some(name)) => {
                copier.map_codepoint(codepoint, &name);
            }
            Ok(None) => continue,
            Err(CapacityReached) => {
                info!("glyph limit reached at U+{codepoint:04X}, frequency fill stops");
                return copier.finish(MergeStatus::CapacityReached);
            }
        }
    }
    copier.finish(MergeStatus::Complete)
}

/// Read the frequency-ordered character list from a JSON document.
///
/// The document is an object; `field` names the string member holding the
/// characters, most frequent first.
pub fn load_frequency_list(path: &Path, field: &str) -> Result<String, FrequencyError> {
    let contents = std::fs::read_to_string(path).map_err(|source| FrequencyError::Io {
        path: path.to_owned(),
        source,
    })?;
    parse_frequency_list(&contents, field)
}

pub fn parse_frequency_list(contents: &str, field: &str) -> Result<String, FrequencyError> {
    let doc: serde_json::Value = serde_json::from_str(contents)?;
    match doc.get(field) {
        Some(serde_json::Value::String(chars)) => Ok(chars.clone()),
        Some(_) => Err(FrequencyError::NotAString(field.to_string())),
        None => {
            warn!("frequency document has no '{field}' member");
            Err(FrequencyError::MissingField(field.to_string()))
        }
    }
}
