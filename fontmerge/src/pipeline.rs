//! Building every family for every variant.
//!
//! A build is made of units, one per (family, variant). The base family's
//! unit for a variant starts from the base font and merges each stage in
//! priority order, then fills the remaining glyph budget with Han characters
//! by frequency. Derived regional families start from that unit's saved
//! output, so they all share the base family's glyphs exactly.
//!
//! Units are idempotent: a unit whose output exists is skipped. Variants are
//! independent and, when the config allows it, built on the rayon pool; a
//! failing or panicking unit is recorded and its siblings carry on.

use std::{
    collections::BTreeSet,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    classify::CodepointPolicy,
    config::{BuildConfig, BuildVariant, FamilySpec, StageRole},
    engine::FontEngine,
    error::{BuildError, EngineError},
    events::{BuildEvent, EventSink, LogSink},
    extract::{
        extract_sources, load_guarded, panic_message, run_guarded, source_label, ExtractRequest,
        Extracted,
    },
    finalize::{finalize, update_family_names},
    font::{Font, FontHandle, OutlineFormat},
    hani::{fill_by_frequency, load_frequency_list, CollectiveMap},
    merge::{GlyphMerger, MergeResult},
    sources::{
        first_otf, source_fonts, static_font_name, ttf_files, variant_statics, STATIC_DIR,
    },
    summary::{BuildSummary, UnitOutcome},
};

/// Runs builds described by a [`BuildConfig`].
pub struct Pipeline<E> {
    config: BuildConfig,
    engine: E,
    merger: GlyphMerger,
    sink: Arc<dyn EventSink>,
}

impl<E: FontEngine> Pipeline<E> {
    /// A pipeline reporting to the log.
    pub fn new(config: BuildConfig, engine: E) -> Self {
        Pipeline {
            config,
            engine,
            merger: GlyphMerger::default(),
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_merger(mut self, merger: GlyphMerger) -> Self {
        self.merger = merger;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn emit(&self, event: BuildEvent) {
        self.sink.record(event);
    }

    /// Where the base family's font for `variant` is written.
    pub fn base_output(&self, variant: &BuildVariant) -> PathBuf {
        self.config
            .base_build_dir()
            .join(format!("{}-{}.ttf", self.config.base_family.slug, variant.name))
    }

    /// Where `family`'s font for `variant` is written.
    pub fn family_output(&self, family: &FamilySpec, variant: &BuildVariant) -> PathBuf {
        self.config
            .family_build_dir(family)
            .join(format!("{}-{}.ttf", family.slug, variant.name))
    }

    /// Build every configured unit.
    pub fn build(&self) -> BuildSummary {
        let variants = &self.config.variants;
        info!(
            "building {} variants from {}",
            variants.len(),
            self.config.sources_root.display()
        );
        let summaries = if self.config.parallel && variants.len() > 1 {
            variants
                .par_iter()
                .map(|variant| self.variant_summary(variant))
                .collect::<Vec<_>>()
        } else {
            variants
                .iter()
                .map(|variant| self.variant_summary(variant))
                .collect()
        };

        let mut summary = BuildSummary::new();
        for variant_summary in summaries {
            summary.merge(variant_summary);
        }
        summary
    }

    fn variant_summary(&self, variant: &BuildVariant) -> BuildSummary {
        let mut summary = BuildSummary::new();
        for (family, result) in self.build_variant(variant) {
            summary.record(&family, &variant.name, &result);
        }
        summary
    }

    /// Prepare sources for `variant`, then build its base unit and, if
    /// configured, every derived family.
    ///
    /// Returns each unit's family name and result.
    pub fn build_variant(
        &self,
        variant: &BuildVariant,
    ) -> Vec<(String, Result<UnitOutcome, BuildError>)> {
        let mut results = Vec::new();
        let base_name = self.config.base_family.name.clone();
        let base = self.run_unit(&base_name, variant, || {
            self.prepare_stages(variant);
            self.build_base(variant)
        });
        results.push((base_name, base));

        if self.config.build_derived {
            for family in &self.config.families {
                let result = self.run_unit(&family.name, variant, || {
                    self.prepare_family(family, variant);
                    self.build_family(family, variant)
                });
                results.push((family.name.clone(), result));
            }
        }
        results
    }

    fn run_unit(
        &self,
        family: &str,
        variant: &BuildVariant,
        unit: impl FnOnce() -> Result<UnitOutcome, BuildError>,
    ) -> Result<UnitOutcome, BuildError> {
        let result = panic::catch_unwind(AssertUnwindSafe(unit))
            .unwrap_or_else(|payload| Err(BuildError::Panicked(panic_message(payload))));
        if let Err(e) = &result {
            self.emit(BuildEvent::UnitFailed {
                family: family.to_string(),
                variant: variant.name.clone(),
                reason: e.to_string(),
            });
        }
        result
    }

    /// Instance the sources of the base folder and of every stage.
    pub fn prepare_stages(&self, variant: &BuildVariant) {
        let base_dir = self.config.resolve(&self.config.base_stage);
        self.prepare_folder(&base_dir, variant);
        for stage in self.config.ordered_stages() {
            self.prepare_folder(&self.config.resolve(&stage.source_dir), variant);
        }
    }

    /// Instance every source in `dir` into its `static/` folder.
    ///
    /// Statics that already exist are kept. Returns the statics available
    /// afterwards, in source order.
    pub fn prepare_folder(&self, dir: &Path, variant: &BuildVariant) -> Vec<PathBuf> {
        let sources = match source_fonts(dir) {
            Ok(sources) => sources,
            Err(e) => {
                warn!("cannot list {}: {e}", dir.display());
                return Vec::new();
            }
        };
        if sources.is_empty() {
            debug!("no sources in {}", dir.display());
            return Vec::new();
        }
        self.prepare_statics(&dir.join(STATIC_DIR), &sources, variant, None)
    }

    /// Instance a derived family's regional and extra fonts into its
    /// `static/` folder.
    ///
    /// Regional fonts are cut down to the family's reference repertoire,
    /// when there is one. Extra fonts are instanced as they are.
    pub fn prepare_family(&self, family: &FamilySpec, variant: &BuildVariant) {
        let family_dir = self.config.resolve(&family.source_dir);
        if !family_dir.is_dir() {
            warn!("family folder {} not found", family_dir.display());
            return;
        }
        let regional = match &family.regional_font {
            Some(font) => vec![family_dir.join(font)],
            None => match ttf_files(&family_dir) {
                Ok(fonts) => fonts,
                Err(e) => {
                    warn!("cannot list {}: {e}", family_dir.display());
                    Vec::new()
                }
            },
        };
        let static_dir = family_dir.join(STATIC_DIR);
        let repertoire = self.reference_repertoire(family, &family_dir);
        self.prepare_statics(&static_dir, &regional, variant, repertoire.as_ref());

        let extras = family
            .extra_fonts
            .iter()
            .map(|font| family_dir.join(font))
            .collect::<Vec<_>>();
        self.prepare_statics(&static_dir, &extras, variant, None);
    }

    fn reference_repertoire(&self, family: &FamilySpec, family_dir: &Path) -> Option<BTreeSet<u32>> {
        let path = match &family.reference_path {
            Some(path) => family_dir.join(path),
            None => match first_otf(family_dir) {
                Ok(Some(path)) => path,
                Ok(None) => {
                    debug!("{} has no reference repertoire", family.name);
                    return None;
                }
                Err(e) => {
                    warn!("cannot list {}: {e}", family_dir.display());
                    return None;
                }
            },
        };
        match load_guarded(&self.engine, &path) {
            Ok(font) => Some(font.charmap().keys().copied().collect()),
            Err(skip) => {
                warn!(
                    "reference {} unusable, merging unfiltered: {}",
                    path.display(),
                    skip.reason
                );
                None
            }
        }
    }

    fn prepare_statics(
        &self,
        static_dir: &Path,
        sources: &[PathBuf],
        variant: &BuildVariant,
        repertoire: Option<&BTreeSet<u32>>,
    ) -> Vec<PathBuf> {
        if sources.is_empty() {
            return Vec::new();
        }
        if let Err(e) = std::fs::create_dir_all(static_dir) {
            warn!("cannot create {}: {e}", static_dir.display());
            return Vec::new();
        }
        let mut statics = Vec::with_capacity(sources.len());
        for source in sources {
            let output = static_dir.join(static_font_name(source, &variant.name));
            if !output.exists() {
                let instanced = run_guarded(source, "instancing", || {
                    self.instance_to(source, variant, &output, repertoire)
                });
                if let Err(skip) = instanced {
                    self.emit(BuildEvent::SourceSkipped {
                        source: skip.source,
                        reason: skip.reason,
                    });
                    continue;
                }
                debug!("instanced {} to {}", source.display(), output.display());
            }
            statics.push(output);
        }
        statics
    }

    fn instance_to(
        &self,
        source: &Path,
        variant: &BuildVariant,
        output: &Path,
        repertoire: Option<&BTreeSet<u32>>,
    ) -> Result<(), EngineError> {
        let mut font = self
            .engine
            .instantiate(source, variant.weight, variant.width)?;
        if let Some(repertoire) = repertoire {
            font.retain_codepoints(|cp| repertoire.contains(&cp));
        }
        self.engine.save(&font, output)
    }

    /// The base font for `variant`: the first static in the base folder, or
    /// failing that, a fresh instance of the first base source.
    fn base_source(&self, variant: &BuildVariant) -> Result<PathBuf, BuildError> {
        let base_dir = self.config.resolve(&self.config.base_stage);
        let static_dir = base_dir.join(STATIC_DIR);
        let statics =
            variant_statics(&static_dir, &variant.name).map_err(|e| BuildError::io(&static_dir, e))?;
        if let Some(path) = statics.into_iter().next() {
            return Ok(path);
        }

        let sources = source_fonts(&base_dir).map_err(|e| BuildError::io(&base_dir, e))?;
        let Some(source) = sources.into_iter().next() else {
            return Err(BuildError::MissingBase {
                variant: variant.name.clone(),
                dir: base_dir,
            });
        };
        std::fs::create_dir_all(&static_dir).map_err(|e| BuildError::io(&static_dir, e))?;
        let output = static_dir.join(static_font_name(&source, &variant.name));
        self.instance_to(&source, variant, &output, None)
            .map_err(|e| BuildError::engine(&source, e))?;
        Ok(output)
    }

    /// Build the base family's font for `variant`.
    pub fn build_base(&self, variant: &BuildVariant) -> Result<UnitOutcome, BuildError> {
        let family = self.config.base_family.name.as_str();
        let output = self.base_output(variant);
        if output.exists() {
            return Ok(self.skip_existing(family, variant, output));
        }
        self.emit(BuildEvent::UnitStarted {
            family: family.to_string(),
            variant: variant.name.clone(),
        });

        let base_path = self.base_source(variant)?;
        let mut target = self
            .engine
            .load(&base_path)
            .map_err(|e| BuildError::engine(&base_path, e))?;
        if target.outline_format() != OutlineFormat::TrueType {
            return Err(BuildError::NotTrueType { path: base_path });
        }
        info!(
            "base font {}: {} glyphs, {} codepoints, {} units per em",
            source_label(&base_path),
            target.glyph_count(),
            target.charmap().len(),
            target.units_per_em()
        );

        let mut cjk_statics = Vec::new();
        for stage in self.config.ordered_stages() {
            let static_dir = self.config.resolve(&stage.source_dir).join(STATIC_DIR);
            let mut paths = variant_statics(&static_dir, &variant.name)
                .map_err(|e| BuildError::io(&static_dir, e))?;
            if stage.role == StageRole::CjkBase {
                paths = self.config.cjk_regions.merge_ordered(&paths);
                cjk_statics.extend(paths.iter().cloned());
            }
            debug!("stage {}: {} sources", stage.name, paths.len());
            let result = self.merge_sources(&mut target, &paths, stage.policy);
            info!(
                "stage {}: added {} glyphs, {} codepoints",
                stage.name, result.glyphs_added, result.codepoints_added
            );
        }

        self.fill_han(&mut target, &cjk_statics);
        self.finish(target, family, variant, output)
    }

    /// Build `family`'s font for `variant` from the base family's output.
    pub fn build_family(
        &self,
        family: &FamilySpec,
        variant: &BuildVariant,
    ) -> Result<UnitOutcome, BuildError> {
        let output = self.family_output(family, variant);
        if output.exists() {
            return Ok(self.skip_existing(&family.name, variant, output));
        }
        self.emit(BuildEvent::UnitStarted {
            family: family.name.clone(),
            variant: variant.name.clone(),
        });

        let base_output = self.base_output(variant);
        if !base_output.is_file() {
            return Err(BuildError::MissingBase {
                variant: variant.name.clone(),
                dir: self.config.base_build_dir(),
            });
        }
        let mut target = self
            .engine
            .load(&base_output)
            .map_err(|e| BuildError::engine(&base_output, e))?;

        let static_dir = self.config.resolve(&family.source_dir).join(STATIC_DIR);
        let extras = family
            .extra_fonts
            .iter()
            .map(|font| static_font_name(font, &variant.name))
            .collect::<Vec<_>>();
        let mut paths = variant_statics(&static_dir, &variant.name)
            .map_err(|e| BuildError::io(&static_dir, e))?
            .into_iter()
            .filter(|path| !extras.contains(&source_label(path)))
            .collect::<Vec<_>>();
        if paths.is_empty() {
            warn!("no regional font for {} {}", family.name, variant.name);
        }
        // extras follow the regional font, in the order listed
        paths.extend(extras.iter().map(|name| static_dir.join(name)));

        let result = self.merge_sources(&mut target, &paths, CodepointPolicy::ALLOW_ALL);
        info!(
            "{} {}: added {} glyphs, {} codepoints",
            family.name, variant.name, result.glyphs_added, result.codepoints_added
        );
        self.finish(target, &family.name, variant, output)
    }

    fn skip_existing(&self, family: &str, variant: &BuildVariant, path: PathBuf) -> UnitOutcome {
        self.emit(BuildEvent::UnitSkippedExisting {
            family: family.to_string(),
            variant: variant.name.clone(),
            path: path.clone(),
        });
        UnitOutcome::SkippedExisting(path)
    }

    /// Merge `paths` into `target` in order. Sources are extracted up front,
    /// possibly in parallel; merging stops once the target is full.
    fn merge_sources(
        &self,
        target: &mut Font,
        paths: &[PathBuf],
        policy: CodepointPolicy,
    ) -> MergeResult {
        let request = ExtractRequest {
            classifier: self.merger.classifier(),
            policy,
            format: target.outline_format(),
            is_base_font: false,
            parallel: self.config.parallel,
        };
        let mut total = MergeResult::default();
        for extracted in extract_sources(&self.engine, paths, &request) {
            let snapshot = match extracted {
                Extracted::Ready(snapshot) => snapshot,
                Extracted::Skipped(skip) => {
                    self.emit(BuildEvent::SourceSkipped {
                        source: skip.source,
                        reason: skip.reason,
                    });
                    continue;
                }
            };
            let result =
                self.merger
                    .merge_candidates(&snapshot.font, &snapshot.candidates, target, false);
            total += result;
            self.emit(BuildEvent::SourceMerged {
                source: snapshot.label.clone(),
                result,
            });
            if result.reached_capacity() {
                self.emit(BuildEvent::CapacityReached {
                    source: snapshot.label,
                    glyph_count: target.glyph_count(),
                });
                break;
            }
        }
        total
    }

    /// Spend what is left of the glyph budget on Han characters, most
    /// frequent first, drawn from the CJK base statics in fill order.
    fn fill_han(&self, target: &mut Font, cjk_statics: &[PathBuf]) {
        let fill_paths = self.config.cjk_regions.fill_ordered(cjk_statics);
        if fill_paths.is_empty() {
            debug!("no regional CJK sources, skipping frequency fill");
            return;
        }
        let list_path = self.config.resolve(&self.config.frequency.path);
        let characters = match load_frequency_list(&list_path, &self.config.frequency.field) {
            Ok(characters) => characters,
            Err(e) => {
                warn!("skipping frequency fill: {e}");
                return;
            }
        };
        let mut sources = Vec::with_capacity(fill_paths.len());
        for path in &fill_paths {
            match load_guarded(&self.engine, path) {
                Ok(font) => sources.push(font),
                Err(skip) => self.emit(BuildEvent::SourceSkipped {
                    source: skip.source,
                    reason: skip.reason,
                }),
            }
        }
        let collective = CollectiveMap::build(&sources);
        let result = fill_by_frequency(
            target,
            characters.chars(),
            &collective,
            self.merger.glyph_limit(),
        );
        self.emit(BuildEvent::FrequencyFill {
            candidates: collective.len(),
            result,
        });
    }

    fn finish(
        &self,
        mut font: Font,
        family: &str,
        variant: &BuildVariant,
        output: PathBuf,
    ) -> Result<UnitOutcome, BuildError> {
        update_family_names(&mut font, family, &variant.name);
        let removed = finalize(&mut font, self.config.layout);
        if !removed.is_empty() {
            self.emit(BuildEvent::TablesRemoved {
                tags: removed.iter().map(|tag| tag.to_string()).collect(),
            });
        }

        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
        }
        // the output's existence marks the unit as built
        let partial = output.with_extension("ttf.partial");
        self.engine
            .save(&font, &partial)
            .map_err(|e| BuildError::engine(&partial, e))?;
        std::fs::rename(&partial, &output).map_err(|e| BuildError::io(&output, e))?;

        self.emit(BuildEvent::UnitFinished {
            family: family.to_string(),
            variant: variant.name.clone(),
            path: output.clone(),
            glyph_count: font.glyph_count(),
            codepoint_count: font.charmap().len(),
        });
        Ok(UnitOutcome::Built(output))
    }
}
