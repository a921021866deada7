//! Build configuration.
//!
//! A [`BuildConfig`] spells out everything the pipeline does: which folders
//! hold sources, in what priority order they are merged and under what
//! codepoint policy, which weight/width instances are built, and which
//! regional families are derived from the result. It can be written by hand
//! as TOML or constructed with defaults via [`BuildConfig::new`].

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{classify::CodepointPolicy, error::ConfigError};

/// One weight/width instance to build.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildVariant {
    pub name: String,
    pub weight: u16,
    pub width: u16,
}

impl BuildVariant {
    pub fn new(name: impl Into<String>, weight: u16, width: u16) -> Self {
        BuildVariant {
            name: name.into(),
            weight,
            width,
        }
    }

    /// Regular, Bold, Condensed and BoldCondensed.
    pub fn standard() -> Vec<BuildVariant> {
        vec![
            BuildVariant::new("Regular", 400, 100),
            BuildVariant::new("Bold", 700, 100),
            BuildVariant::new("Condensed", 400, 75),
            BuildVariant::new("BoldCondensed", 700, 75),
        ]
    }
}

/// Whether OpenType and AAT layout tables survive finalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LayoutMode {
    /// Keep the base font's layout tables.
    Preserve,
    /// Remove all layout tables.
    Strip,
}

/// How a stage's fonts are ordered and used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageRole {
    /// Fonts are merged in file name order.
    #[default]
    Merge,
    /// Fonts are merged in regional order, and also feed the Han fill.
    CjkBase,
}

/// A folder of sources merged together, at one priority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDescriptor {
    pub name: String,
    /// Relative to the sources root.
    pub source_dir: PathBuf,
    pub policy: CodepointPolicy,
    /// Lower merges first. Stages with equal priority keep their list order.
    pub priority: u32,
    #[serde(default)]
    pub role: StageRole,
}

impl StageDescriptor {
    pub fn new(
        name: &str,
        source_dir: impl Into<PathBuf>,
        policy: CodepointPolicy,
        priority: u32,
    ) -> Self {
        StageDescriptor {
            name: name.to_string(),
            source_dir: source_dir.into(),
            policy,
            priority,
            role: StageRole::Merge,
        }
    }

    pub fn with_role(mut self, role: StageRole) -> Self {
        self.role = role;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionRule {
    pub region: String,
    /// A font belongs to the region when its file name contains this.
    pub pattern: String,
}

impl RegionRule {
    pub fn new(region: &str, pattern: &str) -> Self {
        RegionRule {
            region: region.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

/// Regional ordering of the CJK base sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CjkRegions {
    pub rules: Vec<RegionRule>,
    /// Merge order; fonts of no listed region follow in file name order.
    pub merge_order: Vec<String>,
    /// Han fill order; fonts of no listed region are not used.
    pub fill_order: Vec<String>,
}

impl Default for CjkRegions {
    fn default() -> Self {
        CjkRegions {
            rules: vec![
                RegionRule::new("KR", "NotoSansKR"),
                RegionRule::new("SC", "NotoSansSC"),
                RegionRule::new("TC", "NotoSansTC"),
                RegionRule::new("HK", "NotoSansHK"),
                RegionRule::new("JP", "NotoSansJP"),
            ],
            // Hangul comes from the Korean font
            merge_order: ["KR", "SC", "TC", "HK", "JP"].map(String::from).to_vec(),
            fill_order: ["SC", "TC", "HK", "JP", "KR"].map(String::from).to_vec(),
        }
    }
}

impl CjkRegions {
    /// The region a font file belongs to, if any.
    pub fn region_of(&self, path: &Path) -> Option<&str> {
        let file_name = path.file_name()?.to_str()?;
        self.rules
            .iter()
            .find(|rule| file_name.contains(&rule.pattern))
            .map(|rule| rule.region.as_str())
    }

    fn ordered(&self, paths: &[PathBuf], order: &[String], keep_rest: bool) -> Vec<PathBuf> {
        let mut sorted = paths.to_vec();
        sorted.sort();
        let mut result = Vec::with_capacity(sorted.len());
        for region in order {
            result.extend(
                sorted
                    .iter()
                    .filter(|p| self.region_of(p) == Some(region.as_str()))
                    .cloned(),
            );
        }
        if keep_rest {
            result.extend(sorted.into_iter().filter(|p| {
                self.region_of(p)
                    .is_none_or(|region| !order.iter().any(|r| r == region))
            }));
        }
        result
    }

    /// `paths` in merge order.
    pub fn merge_ordered(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.ordered(paths, &self.merge_order, true)
    }

    /// The subset of `paths` used for the Han fill, in fill order.
    pub fn fill_ordered(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        self.ordered(paths, &self.fill_order, false)
    }
}

/// Where the frequency-ordered Han character list lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrequencySource {
    /// Relative to the sources root.
    pub path: PathBuf,
    /// The JSON member holding the characters.
    pub field: String,
}

impl Default for FrequencySource {
    fn default() -> Self {
        FrequencySource {
            path: PathBuf::from("hani/Hani.jsonl"),
            field: "Hani".to_string(),
        }
    }
}

/// The family built from the source stages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BaseFamily {
    pub name: String,
    pub slug: String,
    /// Relative to the sources root; output goes to its `build/` folder.
    pub output_dir: PathBuf,
}

impl Default for BaseFamily {
    fn default() -> Self {
        BaseFamily {
            name: "Unito".to_string(),
            slug: "Unito".to_string(),
            output_dir: PathBuf::from("60unito"),
        }
    }
}

/// A regional family derived from the finished base family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilySpec {
    pub name: String,
    pub slug: String,
    /// Relative to the sources root. Holds `static/` and `build/`.
    pub source_dir: PathBuf,
    /// The regional font, instanced into `static/` before building.
    ///
    /// Relative to `source_dir`, like the other paths here. Without one,
    /// every `.ttf` file in `source_dir` is a regional font.
    #[serde(default)]
    pub regional_font: Option<PathBuf>,
    /// A font whose codepoints limit what the regional font contributes.
    ///
    /// Defaults to the first `.otf` file in `source_dir`.
    #[serde(default)]
    pub reference_path: Option<PathBuf>,
    /// Fonts merged after the regional font, with nothing excluded.
    #[serde(default)]
    pub extra_fonts: Vec<PathBuf>,
}

impl FamilySpec {
    pub fn new(name: &str, slug: &str, source_dir: impl Into<PathBuf>) -> Self {
        FamilySpec {
            name: name.to_string(),
            slug: slug.to_string(),
            source_dir: source_dir.into(),
            regional_font: None,
            reference_path: None,
            extra_fonts: Vec::new(),
        }
    }

    pub fn matches(&self, filter: &str) -> bool {
        self.name == filter || self.slug == filter
    }
}

/// Everything a build needs to know.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    pub sources_root: PathBuf,
    /// Instantiation cache. Defaults to `cache` under the sources root.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub base_family: BaseFamily,
    #[serde(default = "BuildVariant::standard")]
    pub variants: Vec<BuildVariant>,
    /// The folder holding the base font, relative to the sources root.
    #[serde(default = "default_base_stage")]
    pub base_stage: PathBuf,
    #[serde(default = "default_stages")]
    pub stages: Vec<StageDescriptor>,
    #[serde(default)]
    pub cjk_regions: CjkRegions,
    #[serde(default)]
    pub frequency: FrequencySource,
    #[serde(default = "default_families")]
    pub families: Vec<FamilySpec>,
    /// No default: a build has to say whether layout tables are kept.
    pub layout: LayoutMode,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default = "default_true")]
    pub build_derived: bool,
}

fn default_true() -> bool {
    true
}

fn default_base_stage() -> PathBuf {
    PathBuf::from("10base")
}

fn default_stages() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new("symbols", "20symb", CodepointPolicy::EXCLUDE_HAN, 20),
        StageDescriptor::new("world", "30mult", CodepointPolicy::EXCLUDE_HAN, 30),
        StageDescriptor::new("cjk-base", "40cjkb", CodepointPolicy::EXCLUDE_CJK, 40)
            .with_role(StageRole::CjkBase),
        StageDescriptor::new("fallback-ex", "50unif", CodepointPolicy::EXCLUDE_CJK, 50),
        StageDescriptor::new("fallback", "51unif", CodepointPolicy::EXCLUDE_CJK, 51),
    ]
}

fn default_families() -> Vec<FamilySpec> {
    vec![
        FamilySpec::new("Unito HK", "UnitoHK", "71hk"),
        FamilySpec::new("Unito JP", "UnitoJP", "72jp"),
        FamilySpec::new("Unito KR", "UnitoKR", "73kr"),
        FamilySpec::new("Unito CN", "UnitoCN", "74cn"),
        FamilySpec::new("Unito TW", "UnitoTW", "75tw"),
    ]
}

impl BuildConfig {
    /// The default layout under `sources_root`.
    pub fn new(sources_root: impl Into<PathBuf>, layout: LayoutMode) -> Self {
        BuildConfig {
            sources_root: sources_root.into(),
            cache_dir: None,
            base_family: BaseFamily::default(),
            variants: BuildVariant::standard(),
            base_stage: default_base_stage(),
            stages: default_stages(),
            cjk_regions: CjkRegions::default(),
            frequency: FrequencySource::default(),
            families: default_families(),
            layout,
            parallel: true,
            build_derived: true,
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: BuildConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config. A relative `sources_root` is taken relative to
    /// the config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        if config.sources_root.is_relative() {
            if let Some(parent) = path.parent() {
                config.sources_root = parent.join(&config.sources_root);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if !seen.insert(variant.name.as_str()) {
                return Err(ConfigError::DuplicateVariant(variant.name.clone()));
            }
        }
        Ok(())
    }

    /// A path from the config, resolved against the sources root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.sources_root.join(path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => self.resolve(dir),
            None => self.sources_root.join("cache"),
        }
    }

    /// Stages in merge order.
    pub fn ordered_stages(&self) -> Vec<&StageDescriptor> {
        let mut stages = self.stages.iter().collect::<Vec<_>>();
        stages.sort_by_key(|stage| stage.priority);
        stages
    }

    pub fn base_build_dir(&self) -> PathBuf {
        self.resolve(&self.base_family.output_dir).join("build")
    }

    pub fn family_build_dir(&self, family: &FamilySpec) -> PathBuf {
        self.resolve(&family.source_dir).join("build")
    }

    /// Keep only the variants named in `names`; an empty filter keeps all.
    pub fn retain_variants(&mut self, names: &[String]) {
        if !names.is_empty() {
            self.variants.retain(|v| names.contains(&v.name));
        }
    }

    /// Keep only the families matching `filters`; an empty filter keeps all.
    pub fn retain_families(&mut self, filters: &[String]) {
        if !filters.is_empty() {
            self.families
                .retain(|family| filters.iter().any(|f| family.matches(f)));
        }
    }
}
