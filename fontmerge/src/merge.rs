//! Copying glyphs from a source font into a target font.
//!
//! A merge walks the source's codepoint map, keeps the codepoints the target
//! does not yet cover and the policy allows, and copies each glyph those
//! codepoints reach, along with every glyph it references as a component.
//! The target only ever grows: existing glyphs and mappings are never
//! touched, so the first font to supply a codepoint owns it.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use crate::{
    classify::{Classifier, CodepointPolicy},
    font::{FontHandle, GlyphRecord},
    scale,
};

/// The most glyphs a font can address.
pub const MAX_GLYPHS: usize = 65535;

// arbitrary, but matches what shapers tolerate
const MAX_NESTING_LEVEL: u8 = 64;

/// How a merge call ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeStatus {
    /// Every eligible glyph was considered.
    #[default]
    Complete,
    /// The target hit its glyph limit; glyphs added before that are kept.
    CapacityReached,
    /// The source's outlines cannot be copied into the target.
    FormatMismatch,
}

/// What a merge call added to its target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub glyphs_added: usize,
    pub codepoints_added: usize,
    pub status: MergeStatus,
}

impl MergeResult {
    pub fn new(glyphs_added: usize, codepoints_added: usize) -> Self {
        MergeResult {
            glyphs_added,
            codepoints_added,
            status: MergeStatus::Complete,
        }
    }

    fn with_status(status: MergeStatus) -> Self {
        MergeResult {
            status,
            ..Default::default()
        }
    }

    pub fn reached_capacity(&self) -> bool {
        self.status == MergeStatus::CapacityReached
    }
}

impl std::ops::AddAssign for MergeResult {
    /// Accumulate counts. Capacity, once reached, sticks.
    fn add_assign(&mut self, rhs: Self) {
        self.glyphs_added += rhs.glyphs_added;
        self.codepoints_added += rhs.codepoints_added;
        if rhs.status == MergeStatus::CapacityReached {
            self.status = MergeStatus::CapacityReached;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClosureError {
    #[error("glyph '{0}' is referenced but does not exist")]
    MissingGlyph(String),
    #[error("components of '{0}' are nested more than {MAX_NESTING_LEVEL} levels deep")]
    TooDeep(String),
}

/// Every glyph `glyph` references, directly or through other composites.
///
/// Glyphs are listed so that each one comes after everything it references,
/// which is the order in which they can be copied. `glyph` itself is not
/// included.
pub fn component_closure<F: FontHandle + ?Sized>(
    font: &F,
    glyph: &str,
) -> Result<Vec<String>, ClosureError> {
    let record = font
        .glyph(glyph)
        .ok_or_else(|| ClosureError::MissingGlyph(glyph.to_string()))?;
    let mut visited = HashSet::from([glyph.to_string()]);
    let mut closure = Vec::new();
    for child in record.component_names() {
        visit_components(font, child, 1, &mut visited, &mut closure)?;
    }
    Ok(closure)
}

fn visit_components<F: FontHandle + ?Sized>(
    font: &F,
    name: &str,
    depth: u8,
    visited: &mut HashSet<String>,
    closure: &mut Vec<String>,
) -> Result<(), ClosureError> {
    if depth > MAX_NESTING_LEVEL {
        return Err(ClosureError::TooDeep(name.to_string()));
    }
    if !visited.insert(name.to_string()) {
        return Ok(());
    }
    let record = font
        .glyph(name)
        .ok_or_else(|| ClosureError::MissingGlyph(name.to_string()))?;
    for child in record.component_names() {
        visit_components(font, child, depth + 1, visited, closure)?;
    }
    closure.push(name.to_string());
    Ok(())
}

/// A source glyph that some eligible codepoint maps to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub glyph: String,
    /// Eligible codepoints mapped to this glyph, ascending.
    pub codepoints: Vec<u32>,
    /// The glyph's component closure, see [`component_closure`].
    pub components: Vec<String>,
}

/// Collect the glyphs of `source` that a merge under `policy` would consider.
///
/// Which of these are actually copied depends on what the target already
/// covers. Candidates are ordered by their lowest codepoint. Glyphs whose
/// closure cannot be resolved are left out.
pub fn collect_candidates<F: FontHandle + ?Sized>(
    source: &F,
    classifier: &Classifier,
    policy: CodepointPolicy,
    is_base_font: bool,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (&codepoint, glyph) in source.charmap() {
        if classifier.is_excluded(codepoint, policy) {
            continue;
        }
        if !is_base_font && !classifier.is_valid_assigned(codepoint) {
            continue;
        }
        match index.get(glyph.as_str()) {
            Some(&i) => candidates[i].codepoints.push(codepoint),
            None => {
                index.insert(glyph, candidates.len());
                candidates.push(Candidate {
                    glyph: glyph.clone(),
                    codepoints: vec![codepoint],
                    components: Vec::new(),
                });
            }
        }
    }
    candidates.retain_mut(
        |candidate| match component_closure(source, &candidate.glyph) {
            Ok(components) => {
                candidate.components = components;
                true
            }
            Err(e) => {
                debug!("dropping '{}': {e}", candidate.glyph);
                false
            }
        },
    );
    candidates
}

/// The name given to a glyph copied in on behalf of `codepoint`.
pub fn synthesize_glyph_name(codepoint: u32) -> String {
    if codepoint <= 0xFFFF {
        format!("u{codepoint:04X}")
    } else {
        format!("u{codepoint:05X}")
    }
}

/// `base` if the font does not use it, otherwise the first free `base.N`.
pub fn first_free_name<F: FontHandle + ?Sized>(font: &F, base: &str) -> String {
    if !font.contains_glyph(base) {
        return base.to_string();
    }
    // a font has fewer than 65536 glyphs, so a free suffix is always found
    let mut n = 1u32;
    loop {
        let name = format!("{base}.{n}");
        if !font.contains_glyph(&name) {
            return name;
        }
        n += 1;
    }
}

/// Merges source fonts into a target.
#[derive(Clone, Debug)]
pub struct GlyphMerger {
    classifier: Classifier,
    glyph_limit: usize,
}

impl Default for GlyphMerger {
    fn default() -> Self {
        GlyphMerger::new(Classifier::default())
    }
}

impl GlyphMerger {
    pub fn new(classifier: Classifier) -> Self {
        GlyphMerger {
            classifier,
            glyph_limit: MAX_GLYPHS,
        }
    }

    /// Use a glyph ceiling below [`MAX_GLYPHS`].
    pub fn with_glyph_limit(mut self, limit: usize) -> Self {
        self.glyph_limit = limit.min(MAX_GLYPHS);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn glyph_limit(&self) -> usize {
        self.glyph_limit
    }

    /// Merge every eligible glyph of `source` into `target`.
    ///
    /// When `is_base_font` is set, glyph names are taken over from the source
    /// and codepoint validity is not checked.
    pub fn merge<S, T>(
        &self,
        source: &S,
        target: &mut T,
        policy: CodepointPolicy,
        is_base_font: bool,
    ) -> MergeResult
    where
        S: FontHandle + ?Sized,
        T: FontHandle + ?Sized,
    {
        if source.outline_format() != target.outline_format() {
            return MergeResult::with_status(MergeStatus::FormatMismatch);
        }
        let candidates = collect_candidates(source, &self.classifier, policy, is_base_font);
        self.merge_candidates(source, &candidates, target, is_base_font)
    }

    /// Merge previously collected candidates of `source` into `target`.
    pub fn merge_candidates<S, T>(
        &self,
        source: &S,
        candidates: &[Candidate],
        target: &mut T,
        is_base_font: bool,
    ) -> MergeResult
    where
        S: FontHandle + ?Sized,
        T: FontHandle + ?Sized,
    {
        if source.outline_format() != target.outline_format() {
            return MergeResult::with_status(MergeStatus::FormatMismatch);
        }
        let ratio = scale::merge_scale_factor(source.units_per_em(), target.units_per_em());
        let mut copier = GlyphCopier::new(target, self.glyph_limit);
        if copier.is_full() {
            return copier.finish(MergeStatus::CapacityReached);
        }

        for candidate in candidates {
            let new_codepoints = candidate
                .codepoints
                .iter()
                .copied()
                .filter(|cp| !copier.target().covers(*cp))
                .collect::<Vec<_>>();
            let Some(&primary) = new_codepoints.first() else {
                continue;
            };
            let request = if is_base_font {
                CopyRequest::keeping_names(&candidate.glyph, &candidate.components)
            } else {
                CopyRequest::renamed(
                    &candidate.glyph,
                    &candidate.components,
                    synthesize_glyph_name(primary),
                )
            };
            match copier.copy(0, source, request, ratio) {
                Ok(Some(name)) => {
                    for cp in new_codepoints {
                        copier.map_codepoint(cp, &name);
                    }
                }
                Ok(None) => debug!("glyph '{}' vanished from its source", candidate.glyph),
                Err(CapacityReached) => {
                    warn!(
                        "glyph limit of {} reached, stopping after {} glyphs",
                        self.glyph_limit, copier.glyphs_added
                    );
                    return copier.finish(MergeStatus::CapacityReached);
                }
            }
        }
        copier.finish(MergeStatus::Complete)
    }
}

/// Copying one more glyph would take the target over its limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CapacityReached;

/// One glyph to copy, plus its component closure.
pub(crate) struct CopyRequest<'r> {
    glyph: &'r str,
    components: &'r [String],
    /// The name to give the glyph, probed for collisions.
    name: String,
    /// Keep source names for components, reusing same-named target glyphs.
    keep_names: bool,
}

impl<'r> CopyRequest<'r> {
    pub(crate) fn renamed(glyph: &'r str, components: &'r [String], name: String) -> Self {
        CopyRequest {
            glyph,
            components,
            name,
            keep_names: false,
        }
    }

    pub(crate) fn keeping_names(glyph: &'r str, components: &'r [String]) -> Self {
        CopyRequest {
            glyph,
            components,
            name: glyph.to_string(),
            keep_names: true,
        }
    }
}

/// Copies glyphs into a target while tracking what has been copied.
///
/// Source glyphs are keyed by a caller-chosen source id together with their
/// name, so one copier can pull from several sources.
pub(crate) struct GlyphCopier<'a, T: FontHandle + ?Sized> {
    target: &'a mut T,
    limit: usize,
    copied: HashMap<(usize, String), String>,
    glyphs_added: usize,
    codepoints_added: usize,
}

impl<'a, T: FontHandle + ?Sized> GlyphCopier<'a, T> {
    pub(crate) fn new(target: &'a mut T, limit: usize) -> Self {
        GlyphCopier {
            target,
            limit,
            copied: HashMap::new(),
            glyphs_added: 0,
            codepoints_added: 0,
        }
    }

    pub(crate) fn target(&self) -> &T {
        self.target
    }

    pub(crate) fn is_full(&self) -> bool {
        self.target.glyph_count() >= self.limit
    }

    /// Copy a glyph and whatever part of its closure the target lacks.
    ///
    /// Nothing is copied if the whole set does not fit. Returns the target
    /// name of the glyph, or `None` if the source does not have it.
    pub(crate) fn copy<S: FontHandle + ?Sized>(
        &mut self,
        source_id: usize,
        source: &S,
        request: CopyRequest,
        ratio: Option<f64>,
    ) -> Result<Option<String>, CapacityReached> {
        if request.keep_names {
            if let Some(existing) = self.copied.get(&(source_id, request.glyph.to_string())) {
                return Ok(Some(existing.clone()));
            }
        }
        if !source.contains_glyph(request.glyph) {
            return Ok(None);
        }

        let mut pending = Vec::new();
        for component in request.components {
            let key = (source_id, component.clone());
            if self.copied.contains_key(&key) {
                continue;
            }
            if request.keep_names && self.target.contains_glyph(component) {
                debug!("component '{component}' already in target, reusing it");
                self.copied.insert(key, component.clone());
                continue;
            }
            pending.push(component);
        }
        if self.target.glyph_count() + pending.len() + 1 > self.limit {
            return Err(CapacityReached);
        }

        for component in pending {
            let Some(record) = self.prepare(source_id, source, component, ratio) else {
                debug!("component '{component}' missing from source");
                continue;
            };
            let name = if request.keep_names && !self.target.contains_glyph(component) {
                component.clone()
            } else {
                first_free_name(&*self.target, &format!("comp_{component}"))
            };
            self.push(name.clone(), record);
            self.copied.insert((source_id, component.clone()), name);
        }

        let Some(record) = self.prepare(source_id, source, request.glyph, ratio) else {
            return Ok(None);
        };
        let name = first_free_name(&*self.target, &request.name);
        self.push(name.clone(), record);
        self.copied
            .insert((source_id, request.glyph.to_string()), name.clone());
        Ok(Some(name))
    }

    pub(crate) fn map_codepoint(&mut self, codepoint: u32, glyph: &str) -> bool {
        let mapped = self.target.map_codepoint(codepoint, glyph);
        if mapped {
            self.codepoints_added += 1;
        }
        mapped
    }

    pub(crate) fn finish(self, status: MergeStatus) -> MergeResult {
        MergeResult {
            glyphs_added: self.glyphs_added,
            codepoints_added: self.codepoints_added,
            status,
        }
    }

    fn prepare<S: FontHandle + ?Sized>(
        &self,
        source_id: usize,
        source: &S,
        glyph: &str,
        ratio: Option<f64>,
    ) -> Option<GlyphRecord> {
        let record = source.glyph(glyph)?;
        let mut record = match ratio {
            Some(ratio) => record.scaled(ratio),
            None => record.clone(),
        };
        record.rename_components(|old| self.copied.get(&(source_id, old.to_string())).cloned());
        Some(record)
    }

    fn push(&mut self, name: String, record: GlyphRecord) {
        if self.target.push_glyph(name, record) {
            self.glyphs_added += 1;
        }
    }
}
