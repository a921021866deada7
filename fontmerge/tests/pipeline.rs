//! Whole builds over a temporary sources tree.
//!
//! Fonts are kept in memory by [`MemoryEngine`]; the files on disk only hold
//! an index into it, so the pipeline's file handling runs for real.

use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use fontmerge::{
    config::{BuildVariant, FamilySpec},
    font::{GlyphRecord, NameEntry, Outline, OutlineFormat, Point},
    BuildConfig, BuildEvent, EngineError, Font, FontEngine, FontHandle, GlyphMerger, LayoutMode,
    MemorySink, MergeResult, MergeStatus, Pipeline,
};
use pretty_assertions::assert_eq;
use write_fonts::types::Tag;

#[derive(Default)]
struct MemoryEngine {
    fonts: Mutex<Vec<Font>>,
}

impl MemoryEngine {
    fn install(&self, path: &Path, font: Font) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        self.save(&font, path).unwrap();
    }
}

fn io_error(path: &Path, source: io::Error) -> EngineError {
    EngineError::Io {
        path: path.to_owned(),
        source,
    }
}

impl FontEngine for MemoryEngine {
    fn load(&self, path: &Path) -> Result<Font, EngineError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
        if contents == "panic" {
            panic!("corrupt font {}", path.display());
        }
        let index = contents.trim().parse::<usize>().map_err(|_| {
            io_error(path, io::Error::new(io::ErrorKind::InvalidData, "not a font"))
        })?;
        Ok(self.fonts.lock().unwrap()[index].clone())
    }

    fn instantiate(&self, path: &Path, _: u16, _: u16) -> Result<Font, EngineError> {
        self.load(path)
    }

    fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError> {
        let mut fonts = self.fonts.lock().unwrap();
        fonts.push(font.clone());
        std::fs::write(path, (fonts.len() - 1).to_string()).map_err(|e| io_error(path, e))
    }
}

fn glyph(advance: u16) -> GlyphRecord {
    let contour = vec![
        Point::on_curve(0, 0),
        Point::on_curve(advance as i16, 0),
        Point::on_curve(0, 500),
    ];
    GlyphRecord::new(advance, 0, Outline::simple(vec![contour]))
}

/// A font whose every glyph has `advance`, so the source a glyph came from
/// can be told after a merge.
fn font(advance: u16, codepoints: impl IntoIterator<Item = u32>) -> Font {
    let mut font = Font::new(1000);
    font.push_glyph(".notdef".into(), GlyphRecord::default());
    for cp in codepoints {
        let name = format!("cp{cp:04X}");
        font.push_glyph(name.clone(), glyph(advance));
        font.map_codepoint(cp, &name);
    }
    font
}

fn base_font(codepoints: impl IntoIterator<Item = u32>) -> Font {
    let mut font = font(600, codepoints);
    for id in [1, 2, 4, 6] {
        font.push_name_record(NameEntry::windows(id, "Base Sans"));
    }
    font
}

fn advance_of(font: &Font, codepoint: u32) -> Option<u16> {
    let name = font.charmap().get(&codepoint)?;
    font.glyph(name).map(|g| g.advance)
}

fn name_of(font: &Font, name_id: u16) -> Option<String> {
    font.name_records()
        .iter()
        .find(|entry| entry.name_id == name_id)
        .and_then(|entry| entry.text())
        .map(str::to_string)
}

struct Fixture {
    root: tempfile::TempDir,
    engine: MemoryEngine,
    sink: Arc<MemorySink>,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            root: tempfile::tempdir().unwrap(),
            engine: MemoryEngine::default(),
            sink: Arc::new(MemorySink::new()),
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn install(&self, relative: &str, font: Font) {
        self.engine.install(&self.path(relative), font);
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    fn config(&self) -> BuildConfig {
        let mut config = BuildConfig::new(self.root.path(), LayoutMode::Preserve);
        config.variants = vec![BuildVariant::new("Regular", 400, 100)];
        config.families = Vec::new();
        config
    }

    fn pipeline(&self, config: BuildConfig) -> Pipeline<&MemoryEngine> {
        Pipeline::new(config, &self.engine).with_sink(self.sink.clone())
    }

    fn load(&self, relative: &str) -> Font {
        self.engine.load(&self.path(relative)).unwrap()
    }

    fn skipped_sources(&self) -> BTreeSet<String> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                BuildEvent::SourceSkipped { source, .. } => Some(source),
                _ => None,
            })
            .collect()
    }
}

/// A base font, two CJK base fonts, a frequency list and one derived
/// family with a reference repertoire and an extra font.
fn regional_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.install("10base/BaseSans[wght].ttf", base_font(0x41..=0x5A));
    fixture.install("20symb/Arrows.ttf", font(700, 0x2190..=0x2193));
    // 、 is not Han, so the stage merge takes it from the first region
    fixture.install(
        "40cjkb/NotoSansKR[wght].ttf",
        font(1100, [0x3001, 0x4E00, 0xAC00]),
    );
    fixture.install(
        "40cjkb/NotoSansSC[wght].ttf",
        font(1200, [0x3001, 0x4E00, 0x4E01]),
    );
    fixture.write("hani/Hani.jsonl", r#"{"Hani": "一丁七"}"#);

    fixture.install("73kr/NotoSansKR[wght].ttf", font(1300, [0x4E00, 0xAC00, 0xAC01]));
    fixture.install("73kr/SourceHanSansK.otf", font(1000, [0xAC00]));
    fixture.install("73kr/Tangut.ttf", font(1400, [0x17000]));
    fixture
}

fn kr_family() -> FamilySpec {
    let mut family = FamilySpec::new("Unito KR", "UnitoKR", "73kr");
    family.regional_font = Some("NotoSansKR[wght].ttf".into());
    family.extra_fonts = vec!["Tangut.ttf".into()];
    family
}

#[test]
fn builds_base_and_derived_family() {
    let fixture = regional_fixture();
    let mut config = fixture.config();
    config.families = vec![kr_family()];
    let summary = fixture.pipeline(config).build();

    assert!(!summary.has_failures(), "{summary}");
    assert_eq!(summary.built_count("Unito"), 1);
    assert_eq!(summary.built_count("Unito KR"), 1);

    let base = fixture.load("60unito/build/Unito-Regular.ttf");
    assert_eq!(advance_of(&base, 0x41), Some(600));
    assert_eq!(advance_of(&base, 0x2190), Some(700));
    assert_eq!(advance_of(&base, 0x3001), Some(1100));
    // Han comes from the frequency fill, which prefers SC
    assert_eq!(advance_of(&base, 0x4E00), Some(1200));
    assert_eq!(advance_of(&base, 0x4E01), Some(1200));
    assert!(!base.covers(0x4E03));
    assert!(!base.covers(0xAC00));
    assert!(!base.embedded_glyph_names());
    assert_eq!(name_of(&base, 1).as_deref(), Some("Unito"));
    assert_eq!(name_of(&base, 6).as_deref(), Some("Unito-Regular"));

    let kr = fixture.load("73kr/build/UnitoKR-Regular.ttf");
    assert_eq!(kr.glyph_order()[..base.glyph_count()], *base.glyph_order());
    assert_eq!(advance_of(&kr, 0x4E00), Some(1200));
    assert_eq!(advance_of(&kr, 0xAC00), Some(1300));
    // outside the reference repertoire
    assert!(!kr.covers(0xAC01));
    assert_eq!(advance_of(&kr, 0x17000), Some(1400));
    assert_eq!(name_of(&kr, 1).as_deref(), Some("Unito KR"));
    assert_eq!(name_of(&kr, 4).as_deref(), Some("Unito KR"));
    assert_eq!(name_of(&kr, 6).as_deref(), Some("UnitoKR-Regular"));
}

#[test]
fn existing_outputs_are_not_rebuilt() {
    let fixture = regional_fixture();
    let mut config = fixture.config();
    config.families = vec![kr_family()];

    let first = fixture.pipeline(config.clone()).build();
    assert_eq!(first.built_count("Unito"), 1);
    let second = fixture.pipeline(config).build();
    assert_eq!(second.built_count("Unito"), 0);
    assert_eq!(second.built_count("Unito KR"), 0);
    assert_eq!(
        second.family("Unito").unwrap().skipped_existing,
        [fixture.path("60unito/build/Unito-Regular.ttf")]
    );
    let skips = fixture
        .sink
        .events()
        .into_iter()
        .filter(|event| matches!(event, BuildEvent::UnitSkippedExisting { .. }))
        .count();
    assert_eq!(skips, 2);
}

#[test]
fn earlier_stages_own_shared_codepoints() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.install("20symb/Symbols.ttf", font(500, [0x2192, 0x2193]));
    fixture.install("30mult/A.ttf", font(700, [0x2192, 0x391]));
    fixture.install("30mult/B.ttf", font(800, [0x391, 0x392]));

    let mut config = fixture.config();
    config.parallel = false;
    let summary = fixture.pipeline(config).build();
    assert_eq!(summary.built_count("Unito"), 1);

    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert_eq!(advance_of(&built, 0x2192), Some(500));
    assert_eq!(advance_of(&built, 0x391), Some(700));
    assert_eq!(advance_of(&built, 0x392), Some(800));

    let merged = fixture
        .sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            BuildEvent::SourceMerged { source, result } => Some((source, result)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        merged,
        [
            ("Symbols-Regular.ttf".to_string(), MergeResult::new(2, 2)),
            ("A-Regular.ttf".to_string(), MergeResult::new(1, 1)),
            ("B-Regular.ttf".to_string(), MergeResult::new(1, 1)),
        ]
    );
}

#[test]
fn fifty_symbols_join_a_five_hundred_glyph_base() {
    let fixture = Fixture::new();
    let mut base = base_font(0x100..0x100 + 400);
    for i in 0..99 {
        base.push_glyph(format!("unmapped{i}"), glyph(600));
    }
    assert_eq!(base.glyph_count(), 500);
    fixture.install("10base/Base.ttf", base);
    fixture.install("20symb/Arrows.ttf", font(700, 0x2190..0x2190 + 50));

    let summary = fixture.pipeline(fixture.config()).build();
    assert_eq!(summary.built_count("Unito"), 1);
    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert_eq!(built.glyph_count(), 550);
    assert_eq!(built.charmap().len(), 450);
    assert!(fixture.sink.events().contains(&BuildEvent::SourceMerged {
        source: "Arrows-Regular.ttf".into(),
        result: MergeResult::new(50, 50),
    }));
}

#[test]
fn frequency_fill_stops_at_the_glyph_limit() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41, 0x42]));
    fixture.install(
        "40cjkb/NotoSansSC-Regular.ttf",
        font(1000, [0x4E00, 0x4E01, 0x4E03]),
    );
    fixture.write("hani/Hani.jsonl", r#"{"Hani": "丁一七"}"#);

    let pipeline = fixture
        .pipeline(fixture.config())
        .with_merger(GlyphMerger::default().with_glyph_limit(5));
    pipeline.build();

    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert_eq!(built.glyph_count(), 5);
    assert!(built.covers(0x4E01));
    assert!(built.covers(0x4E00));
    assert!(!built.covers(0x4E03));
    let fill = fixture
        .sink
        .events()
        .into_iter()
        .find_map(|event| match event {
            BuildEvent::FrequencyFill { candidates, result } => Some((candidates, result)),
            _ => None,
        })
        .unwrap();
    assert_eq!(fill.0, 3);
    assert_eq!(
        fill.1,
        MergeResult {
            glyphs_added: 2,
            codepoints_added: 2,
            status: MergeStatus::CapacityReached,
        }
    );
}

#[test]
fn missing_frequency_list_skips_the_fill() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.install("40cjkb/NotoSansSC-Regular.ttf", font(1000, [0x4E00]));

    let summary = fixture.pipeline(fixture.config()).build();
    assert_eq!(summary.built_count("Unito"), 1);
    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert!(!built.covers(0x4E00));
}

#[test]
fn unusable_sources_are_skipped() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.write("30mult/Broken.ttf", "garbage");
    fixture.install(
        "30mult/Outlines.otf",
        font(700, [0x391]).with_format(OutlineFormat::Cff),
    );
    fixture.install("30mult/Greek.ttf", font(800, [0x392]));

    let summary = fixture.pipeline(fixture.config()).build();
    assert!(!summary.has_failures());
    assert_eq!(
        fixture.skipped_sources(),
        BTreeSet::from(["Broken.ttf".to_string(), "Outlines-Regular.ttf".to_string()])
    );
    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert!(!built.covers(0x391));
    assert!(built.covers(0x392));
}

#[test]
fn a_source_that_panics_while_instancing_is_skipped() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.write("20symb/Bad.ttf", "panic");
    fixture.install("30mult/Greek.ttf", font(800, [0x392]));

    let mut config = fixture.config();
    config.variants = vec![
        BuildVariant::new("Regular", 400, 100),
        BuildVariant::new("Bold", 700, 100),
    ];
    let summary = fixture.pipeline(config).build();

    assert!(!summary.has_failures(), "{summary}");
    assert_eq!(summary.built_count("Unito"), 2);
    assert_eq!(fixture.skipped_sources(), BTreeSet::from(["Bad.ttf".to_string()]));
    for variant in ["Regular", "Bold"] {
        let built = fixture.load(&format!("60unito/build/Unito-{variant}.ttf"));
        assert!(built.covers(0x392));
    }
    assert!(!fixture.path("20symb/static/Bad-Regular.ttf").exists());
}

#[test]
fn a_static_that_panics_while_merging_is_skipped() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.write("30mult/static/Bad-Regular.ttf", "panic");
    fixture.install("30mult/static/Greek-Regular.ttf", font(800, [0x392]));

    let summary = fixture.pipeline(fixture.config()).build();
    assert!(!summary.has_failures(), "{summary}");
    assert_eq!(
        fixture.skipped_sources(),
        BTreeSet::from(["Bad-Regular.ttf".to_string()])
    );
    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert!(built.covers(0x392));
}

#[test]
fn frequency_fill_skips_a_panicking_source() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.write("40cjkb/static/NotoSansSC-Regular.ttf", "panic");
    fixture.install(
        "40cjkb/static/NotoSansKR-Regular.ttf",
        font(1100, [0x3001, 0x4E00, 0x4E01]),
    );
    fixture.write("hani/Hani.jsonl", r#"{"Hani": "一丁"}"#);

    let summary = fixture.pipeline(fixture.config()).build();
    assert!(!summary.has_failures(), "{summary}");
    let skips = fixture
        .sink
        .events()
        .into_iter()
        .filter(|event| matches!(
            event,
            BuildEvent::SourceSkipped { source, .. } if source == "NotoSansSC-Regular.ttf"
        ))
        .count();
    // once by the stage merge, once by the fill
    assert_eq!(skips, 2);

    let built = fixture.load("60unito/build/Unito-Regular.ttf");
    assert_eq!(advance_of(&built, 0x3001), Some(1100));
    assert_eq!(advance_of(&built, 0x4E00), Some(1100));
    assert_eq!(advance_of(&built, 0x4E01), Some(1100));
}

#[test]
fn a_failing_variant_leaves_the_others_alone() {
    let fixture = Fixture::new();
    fixture.install("10base/Base.ttf", base_font([0x41]));
    fixture.write("10base/static/Base-Bold.ttf", "panic");

    let mut config = fixture.config();
    config.variants = vec![
        BuildVariant::new("Regular", 400, 100),
        BuildVariant::new("Bold", 700, 100),
    ];
    config.families = vec![FamilySpec::new("Unito TW", "UnitoTW", "75tw")];
    let summary = fixture.pipeline(config).build();

    assert!(summary.has_failures());
    assert_eq!(summary.built_count("Unito"), 1);
    assert_eq!(summary.built_count("Unito TW"), 1);
    let failures = |family| {
        summary
            .family(family)
            .unwrap()
            .failures
            .iter()
            .map(|(variant, _)| variant.as_str())
            .collect::<Vec<_>>()
    };
    assert_eq!(failures("Unito"), ["Bold"]);
    assert_eq!(failures("Unito TW"), ["Bold"]);
    assert!(fixture.path("60unito/build/Unito-Regular.ttf").is_file());
    assert!(!fixture.path("60unito/build/Unito-Bold.ttf").exists());
}

#[test]
fn missing_base_is_fatal_for_the_unit() {
    let fixture = Fixture::new();
    fixture.install("20symb/Arrows.ttf", font(700, [0x2190]));

    let summary = fixture.pipeline(fixture.config()).build();
    let failures = &summary.family("Unito").unwrap().failures;
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.contains("no base font"), "{}", failures[0].1);
    assert!(fixture.sink.events().iter().any(|event| matches!(
        event,
        BuildEvent::UnitFailed { family, .. } if family == "Unito"
    )));
}

#[test]
fn layout_tables_follow_the_layout_mode() {
    let fixture = Fixture::new();
    let mut base = base_font([0x41]);
    base.insert_raw_table(Tag::new(b"GSUB"), vec![0, 1]);
    base.insert_raw_table(Tag::new(b"OS/2"), vec![0, 4]);
    fixture.install("10base/Base.ttf", base);

    let mut config = fixture.config();
    config.layout = LayoutMode::Strip;
    fixture.pipeline(config.clone()).build();
    let stripped = fixture.load("60unito/build/Unito-Regular.ttf");
    assert!(!stripped.has_table(Tag::new(b"GSUB")));
    assert!(stripped.has_table(Tag::new(b"OS/2")));
    assert!(fixture.sink.events().contains(&BuildEvent::TablesRemoved {
        tags: vec!["GSUB".to_string()],
    }));

    std::fs::remove_file(fixture.path("60unito/build/Unito-Regular.ttf")).unwrap();
    config.layout = LayoutMode::Preserve;
    fixture.pipeline(config).build();
    let preserved = fixture.load("60unito/build/Unito-Regular.ttf");
    assert!(preserved.has_table(Tag::new(b"GSUB")));
}

#[test]
fn built_fonts_are_delivered() {
    let fixture = regional_fixture();
    let mut config = fixture.config();
    config.families = vec![kr_family()];
    fixture.pipeline(config.clone()).build();

    let dest = fixture.path("dist");
    let delivered = fontmerge::deliver(&config, &dest, fixture.sink.as_ref()).unwrap();
    assert_eq!(
        delivered,
        [dest.join("Unito-Regular.ttf"), dest.join("UnitoKR-Regular.ttf")]
    );
    let built = fixture.load("73kr/build/UnitoKR-Regular.ttf");
    let copy = fixture.load("dist/UnitoKR-Regular.ttf");
    assert_eq!(copy.glyph_order(), built.glyph_order());
}
