//! A build that reads and writes real font files.

use fontmerge::{
    config::BuildVariant,
    font::{GlyphRecord, NameEntry, Outline, Point},
    BinaryEngine, BuildConfig, CachedEngine, Font, FontEngine, FontHandle, LayoutMode, Pipeline,
};

fn square(size: i16) -> Outline {
    Outline::simple(vec![vec![
        Point::on_curve(0, 0),
        Point::on_curve(0, size),
        Point::on_curve(size, size),
        Point::on_curve(size, 0),
    ]])
}

fn font(upm: u16, size: i16, codepoints: impl IntoIterator<Item = u32>) -> Font {
    let mut font = Font::new(upm);
    font.push_glyph(".notdef".into(), GlyphRecord::new(500, 0, square(400)));
    for cp in codepoints {
        let name = format!("uni{cp:04X}");
        font.push_glyph(name.clone(), GlyphRecord::new(size as u16, 0, square(size)));
        font.map_codepoint(cp, &name);
    }
    for (id, value) in [(1, "Base Sans"), (2, "Regular"), (4, "Base Sans"), (6, "BaseSans-Regular")] {
        font.push_name_record(NameEntry::windows(id, value));
    }
    font
}

#[test]
fn builds_from_font_files() {
    let root = tempfile::tempdir().unwrap();
    let engine = BinaryEngine::new();
    for (dir, font) in [
        ("10base/BaseSans.ttf", font(1000, 600, 0x41..=0x43)),
        // a power-of-two UPM is scaled to the power of two nearest the base
        ("20symb/Arrows.ttf", font(2048, 1200, 0x2190..=0x2191)),
    ] {
        let path = root.path().join(dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        engine.save(&font, &path).unwrap();
    }

    let mut config = BuildConfig::new(root.path(), LayoutMode::Strip);
    config.variants = vec![BuildVariant::new("Regular", 400, 100)];
    config.families = Vec::new();
    let cached = CachedEngine::new(BinaryEngine::new(), config.cache_dir());
    let summary = Pipeline::new(config, cached).build();
    assert!(!summary.has_failures(), "{summary}");

    let output = root.path().join("60unito/build/Unito-Regular.ttf");
    let built = engine.load(&output).unwrap();
    assert_eq!(built.units_per_em(), 1000);
    assert_eq!(built.glyph_count(), 6);
    assert_eq!(
        built.charmap().keys().copied().collect::<Vec<_>>(),
        [0x41, 0x42, 0x43, 0x2190, 0x2191]
    );
    let arrow = built.glyph(&built.charmap()[&0x2190]).unwrap();
    assert_eq!(arrow.advance, 600);

    let family = built
        .name_records()
        .iter()
        .find(|entry| entry.name_id == 1)
        .and_then(|entry| entry.text());
    assert_eq!(family, Some("Unito"));
    // no names are embedded, so glyphs read back with placeholder names
    assert_eq!(built.glyph_order()[1], "glyph00001");
}
