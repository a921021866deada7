//! A [`FontEngine`] over binary OpenType files, built on fontations.
//!
//! Fonts are decoded with `read-fonts` (through `write_fonts::read`) into the
//! [`Font`] model, variable fonts are instanced with skrifa's outline and
//! metrics APIs, and the model is compiled back with `write-fonts`.
//!
//! Only the tables the model owns are rebuilt on save: `glyf`, `loca`,
//! `hmtx`, `hhea`, `maxp`, `head`, `cmap`, `post` and `name`. Everything else
//! is written back byte for byte, except for tables an instance or a change
//! in glyph count makes stale.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use log::debug;
use skrifa::{
    instance::{LocationRef, Size},
    outline::{DrawSettings, OutlinePen},
    MetadataProvider,
};
use write_fonts::{
    from_obj::ToOwnedTable,
    read::{
        tables::glyf::{CurvePoint, Glyph as ReadGlyph},
        types::GlyphId,
        FontData, FontRead, FontRef, TableProvider,
    },
    tables::{
        cmap::{Cmap, CmapSubtable, EncodingRecord, PlatformId, SequentialMapGroup},
        glyf::{
            Bbox as GlyfBbox, Component as GlyfComponent, ComponentFlags as GlyfComponentFlags,
            CompositeGlyph, Contour, GlyfLocaBuilder, Glyph, SimpleGlyph, Transform,
        },
        head::Head,
        hhea::Hhea,
        hmtx::{Hmtx, LongMetric},
        loca::LocaFormat,
        maxp::Maxp,
        name::{Name, NameRecord},
        post::Post,
    },
    types::{F2Dot14, FWord, GlyphId16, NameId, Tag, UfWord, Version16Dot16},
    FontBuilder,
};

use crate::{
    engine::{resolve_location, AxisInfo, FontEngine},
    error::EngineError,
    font::{
        Bbox, Component, ComponentAnchor, ComponentFlags, ComponentTransform, Font, FontHandle,
        GlyphRecord, NameEntry, NameValue, Outline, OutlineFormat, Point,
    },
    merge::MAX_GLYPHS,
};

const GLYF: Tag = Tag::new(b"glyf");

/// Tables describing a design space, meaningless in an instance.
const VARIATION_TABLES: [Tag; 8] = [
    Tag::new(b"fvar"),
    Tag::new(b"gvar"),
    Tag::new(b"avar"),
    Tag::new(b"HVAR"),
    Tag::new(b"VVAR"),
    Tag::new(b"MVAR"),
    Tag::new(b"STAT"),
    Tag::new(b"cvar"),
];

/// Tables with one entry per glyph that we do not rebuild.
const PER_GLYPH_TABLES: [Tag; 6] = [
    Tag::new(b"hdmx"),
    Tag::new(b"LTSH"),
    Tag::new(b"VDMX"),
    Tag::new(b"DSIG"),
    Tag::new(b"vmtx"),
    Tag::new(b"vhea"),
];

/// Reads and writes font files.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryEngine;

impl BinaryEngine {
    pub fn new() -> Self {
        BinaryEngine
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, EngineError> {
    std::fs::read(path).map_err(|source| EngineError::Io {
        path: path.to_owned(),
        source,
    })
}

impl FontEngine for BinaryEngine {
    fn load(&self, path: &Path) -> Result<Font, EngineError> {
        let data = read_file(path)?;
        read_font(&data)
    }

    fn instantiate(&self, path: &Path, weight: u16, width: u16) -> Result<Font, EngineError> {
        let data = read_file(path)?;
        instantiate_font(&data, weight, width)
    }

    fn save(&self, font: &Font, path: &Path) -> Result<(), EngineError> {
        let bytes = compile_font(font)?;
        std::fs::write(path, bytes).map_err(|source| EngineError::Io {
            path: path.to_owned(),
            source,
        })
    }
}

/// Decode a font file.
pub fn read_font(data: &[u8]) -> Result<Font, EngineError> {
    let font_ref = FontRef::new(data)?;
    let (mut font, names) = read_common(&font_ref)?;
    let glyphs = read_static_glyphs(&font_ref, font.outline_format(), &names)?;
    push_glyphs(&mut font, names, glyphs);
    Ok(font)
}

fn read_static_glyphs(
    font_ref: &FontRef,
    format: OutlineFormat,
    names: &[String],
) -> Result<Vec<GlyphRecord>, EngineError> {
    match format {
        OutlineFormat::TrueType => read_glyf_glyphs(font_ref, names),
        // outlines are not decoded, the font only serves its charmap
        OutlineFormat::Cff => Ok(vec![GlyphRecord::default(); names.len()]),
    }
}

fn push_glyphs(font: &mut Font, names: Vec<String>, glyphs: Vec<GlyphRecord>) {
    for (name, glyph) in names.into_iter().zip(glyphs) {
        font.push_glyph(name, glyph);
    }
}

/// Decode a font file, pinning its `wght` and `wdth` axes.
///
/// Static fonts and fonts without TrueType outlines are returned as read.
pub fn instantiate_font(data: &[u8], weight: u16, width: u16) -> Result<Font, EngineError> {
    let font_ref = FontRef::new(data)?;
    let axes = font_ref
        .axes()
        .iter()
        .map(|axis| {
            AxisInfo::new(
                &axis.tag().to_string(),
                axis.min_value(),
                axis.default_value(),
                axis.max_value(),
            )
        })
        .collect::<Vec<_>>();
    let (mut font, names) = read_common(&font_ref)?;
    if axes.is_empty() || font.outline_format() != OutlineFormat::TrueType {
        let glyphs = read_static_glyphs(&font_ref, font.outline_format(), &names)?;
        push_glyphs(&mut font, names, glyphs);
        return Ok(font);
    }

    let settings = resolve_location(&axes, weight, width);
    debug!("instancing at {settings:?}");
    let location = font_ref
        .axes()
        .location(settings.iter().map(|(tag, value)| (tag.as_str(), *value)));
    let glyphs = draw_instance_glyphs(&font_ref, location.coords(), names.len())?;
    push_glyphs(&mut font, names, glyphs);
    font.set_instanced(true);
    Ok(font)
}

/// Everything but the glyphs: names, charmap and raw tables, plus the glyph
/// names in glyph id order.
fn read_common(font_ref: &FontRef) -> Result<(Font, Vec<String>), EngineError> {
    let upm = font_ref.head()?.units_per_em();
    let num_glyphs = font_ref.maxp()?.num_glyphs() as usize;
    let format = if font_ref.table_data(GLYF).is_some() {
        OutlineFormat::TrueType
    } else {
        OutlineFormat::Cff
    };
    let mut font = Font::new(upm).with_format(format);
    for record in font_ref.table_directory().table_records() {
        let tag = record.tag();
        if let Some(data) = font_ref.table_data(tag) {
            font.insert_raw_table(tag, data.as_bytes().to_vec());
        }
    }

    let names = glyph_names(font_ref, num_glyphs);
    font.set_loaded_glyph_count(num_glyphs);

    let charmap = font_ref
        .charmap()
        .mappings()
        .filter_map(|(codepoint, gid)| {
            let name = names.get(gid.to_u32() as usize)?;
            Some((codepoint, name.clone()))
        })
        .collect();
    font.replace_charmap(charmap);

    if let Ok(name) = font_ref.name() {
        let string_data = name.string_data();
        for record in name.name_record() {
            let decodable = record.is_unicode()
                || (record.platform_id() == 1 && record.encoding_id() == 0);
            let value = match record.string(string_data) {
                Ok(string) if decodable => NameValue::Text(string.chars().collect()),
                _ => NameValue::Undecodable,
            };
            font.push_name_record(NameEntry {
                platform_id: record.platform_id(),
                encoding_id: record.encoding_id(),
                language_id: record.language_id(),
                name_id: record.name_id().to_u16(),
                value,
            });
        }
    }

    let has_names = font_ref
        .post()
        .map(|post| post.version() == Version16Dot16::VERSION_2_0)
        .unwrap_or(false);
    font.set_embedded_glyph_names(has_names);
    Ok((font, names))
}

/// Glyph names from `post`, made unique, with `glyphNNNNN` for the gaps.
fn glyph_names(font_ref: &FontRef, num_glyphs: usize) -> Vec<String> {
    let post = font_ref.post().ok();
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(num_glyphs);
    for gid in 0..num_glyphs {
        let from_post = post
            .as_ref()
            .and_then(|post| post.glyph_name(GlyphId16::new(gid as u16)))
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let fallback = if gid == 0 {
            ".notdef".to_string()
        } else {
            format!("glyph{gid:05}")
        };
        let mut name = from_post.unwrap_or(fallback);
        if seen.contains(&name) {
            name = (1..)
                .map(|n| format!("{name}.{n}"))
                .find(|candidate| !seen.contains(candidate))
                .unwrap_or_default();
        }
        seen.insert(name.clone());
        names.push(name);
    }
    names
}

fn read_glyf_glyphs(font_ref: &FontRef, names: &[String]) -> Result<Vec<GlyphRecord>, EngineError> {
    let glyf = font_ref.glyf()?;
    let loca = font_ref.loca(None)?;
    let hmtx = font_ref.hmtx().ok();
    let mut records = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let gid = GlyphId::new(i as u32);
        let (advance, lsb) = hmtx
            .as_ref()
            .map(|hmtx| {
                (
                    hmtx.advance(gid).unwrap_or(0),
                    hmtx.side_bearing(gid).unwrap_or(0),
                )
            })
            .unwrap_or_default();
        let outline = match loca.get_glyf(gid, &glyf)? {
            None => Outline::Empty,
            Some(ReadGlyph::Simple(simple)) => {
                let points = simple.points().collect::<Vec<_>>();
                let mut contours = Vec::new();
                let mut start = 0;
                for end in simple.end_pts_of_contours() {
                    let end = end.get() as usize;
                    let contour = points
                        .get(start..=end)
                        .ok_or(EngineError::Outline(i as u32, "bad contour end".into()))?;
                    contours.push(contour.iter().map(point_from_curve).collect());
                    start = end + 1;
                }
                Outline::Simple {
                    bbox: Bbox {
                        x_min: simple.x_min(),
                        y_min: simple.y_min(),
                        x_max: simple.x_max(),
                        y_max: simple.y_max(),
                    },
                    contours,
                    instructions: simple.instructions().to_vec(),
                }
            }
            Some(ReadGlyph::Composite(composite)) => {
                let mut components = Vec::new();
                for component in composite.components() {
                    let target = names
                        .get(component.glyph.to_u32() as usize)
                        .ok_or_else(|| {
                            EngineError::UnknownComponent(
                                name.clone(),
                                format!("gid {}", component.glyph.to_u32()),
                            )
                        })?;
                    let flags = GlyfComponentFlags::from(component.flags);
                    let t = component.transform;
                    components.push(Component {
                        glyph: target.clone(),
                        anchor: match component.anchor {
                            write_fonts::read::tables::glyf::Anchor::Offset { x, y } => {
                                ComponentAnchor::Offset { x, y }
                            }
                            write_fonts::read::tables::glyf::Anchor::Point { base, component } => {
                                ComponentAnchor::Point { base, component }
                            }
                        },
                        transform: ComponentTransform {
                            xx: t.xx.to_f32(),
                            yx: t.yx.to_f32(),
                            xy: t.xy.to_f32(),
                            yy: t.yy.to_f32(),
                        },
                        flags: ComponentFlags {
                            round_xy_to_grid: flags.round_xy_to_grid,
                            use_my_metrics: flags.use_my_metrics,
                            scaled_component_offset: flags.scaled_component_offset,
                            unscaled_component_offset: flags.unscaled_component_offset,
                            overlap_compound: flags.overlap_compound,
                        },
                    });
                }
                Outline::Composite {
                    bbox: Bbox {
                        x_min: composite.x_min(),
                        y_min: composite.y_min(),
                        x_max: composite.x_max(),
                        y_max: composite.y_max(),
                    },
                    components,
                }
            }
        };
        records.push(GlyphRecord::new(advance, lsb, outline));
    }
    Ok(records)
}

fn point_from_curve(point: &CurvePoint) -> Point {
    Point {
        x: point.x,
        y: point.y,
        on_curve: point.on_curve,
    }
}

/// Draw every glyph at `coords`, flattening composites into simple glyphs.
fn draw_instance_glyphs(
    font_ref: &FontRef,
    coords: &[F2Dot14],
    num_glyphs: usize,
) -> Result<Vec<GlyphRecord>, EngineError> {
    let outlines = font_ref.outline_glyphs();
    let metrics = font_ref.glyph_metrics(Size::unscaled(), LocationRef::new(coords));
    let mut records = Vec::with_capacity(num_glyphs);
    for i in 0..num_glyphs {
        let gid = GlyphId::new(i as u32);
        let mut pen = ContourPen::default();
        if let Some(glyph) = outlines.get(gid) {
            glyph
                .draw(DrawSettings::unhinted(Size::unscaled(), coords), &mut pen)
                .map_err(|e| EngineError::Outline(i as u32, e.to_string()))?;
        }
        let outline = Outline::simple(pen.into_contours());
        let advance = metrics
            .advance_width(gid)
            .unwrap_or_default()
            .round()
            .clamp(0.0, u16::MAX as f32) as u16;
        let lsb = outline.bbox().map(|bbox| bbox.x_min).unwrap_or_default();
        records.push(GlyphRecord::new(advance, lsb, outline));
    }
    Ok(records)
}

/// Collects quadratic contours from a skrifa outline.
///
/// Cubic segments are approximated by a single quadratic.
#[derive(Debug, Default)]
pub(crate) struct ContourPen {
    contours: Vec<Vec<Point>>,
    current: Vec<(f32, f32, bool)>,
}

impl ContourPen {
    fn finish_contour(&mut self) {
        let mut contour = std::mem::take(&mut self.current);
        if contour.len() > 1 && contour.first() == contour.last() {
            contour.pop();
        }
        if !contour.is_empty() {
            self.contours.push(
                contour
                    .into_iter()
                    .map(|(x, y, on_curve)| Point {
                        x: round_coord(x),
                        y: round_coord(y),
                        on_curve,
                    })
                    .collect(),
            );
        }
    }

    pub(crate) fn into_contours(mut self) -> Vec<Vec<Point>> {
        self.finish_contour();
        self.contours
    }

    fn last_point(&self) -> (f32, f32) {
        self.current
            .last()
            .map(|(x, y, _)| (*x, *y))
            .unwrap_or_default()
    }
}

fn round_coord(value: f32) -> i16 {
    value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

impl OutlinePen for ContourPen {
    fn move_to(&mut self, x: f32, y: f32) {
        self.finish_contour();
        self.current.push((x, y, true));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.current.push((x, y, true));
    }

    fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
        self.current.push((cx0, cy0, false));
        self.current.push((x, y, true));
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        let (x0, y0) = self.last_point();
        let qx = (3.0 * (cx0 + cx1) - x0 - x) / 4.0;
        let qy = (3.0 * (cy0 + cy1) - y0 - y) / 4.0;
        self.current.push((qx, qy, false));
        self.current.push((x, y, true));
    }

    fn close(&mut self) {
        self.finish_contour();
    }
}

/// Compile `font` into a font file.
pub fn compile_font(font: &Font) -> Result<Vec<u8>, EngineError> {
    if font.glyph_count() > MAX_GLYPHS {
        return Err(EngineError::TooManyGlyphs(font.glyph_count()));
    }
    let ids = font
        .glyph_order()
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as u16))
        .collect::<HashMap<_, _>>();

    let mut builder = FontBuilder::new();
    if font.outline_format() == OutlineFormat::TrueType {
        let (glyf, loca, loca_format) = build_glyf(font, &ids)?;
        builder.add_table(&glyf)?;
        builder.add_table(&loca)?;
        builder.add_table(&build_head(font, loca_format)?)?;
        let (hmtx, long_metrics) = build_hmtx(font);
        builder.add_table(&hmtx)?;
        builder.add_table(&build_hhea(font, long_metrics)?)?;
        builder.add_table(&build_maxp(font)?)?;
    }
    builder.add_table(&build_cmap(font, &ids))?;
    builder.add_table(&build_post(font)?)?;
    builder.add_table(&build_name(font))?;

    let glyph_count_changed = font
        .loaded_glyph_count()
        .is_some_and(|count| count != font.glyph_count());
    for (tag, data) in font.raw_tables() {
        if builder.contains(*tag) {
            continue;
        }
        if font.is_instanced() && VARIATION_TABLES.contains(tag) {
            debug!("dropping '{tag}' from instance");
            continue;
        }
        if glyph_count_changed && PER_GLYPH_TABLES.contains(tag) {
            debug!("dropping stale '{tag}'");
            continue;
        }
        builder.add_raw(*tag, data.as_slice());
    }
    Ok(builder.build())
}

/// Parse a raw table carried by `font`, if it has one.
fn raw_table<'a, T: FontRead<'a>>(font: &'a Font, tag: Tag) -> Result<Option<T>, EngineError> {
    font.raw_tables()
        .get(&tag)
        .map(|data| T::read(FontData::new(data)))
        .transpose()
        .map_err(EngineError::from)
}

fn glyph_id(ids: &HashMap<&str, u16>, owner: &str, component: &str) -> Result<u16, EngineError> {
    ids.get(component)
        .copied()
        .ok_or_else(|| EngineError::UnknownComponent(owner.to_string(), component.to_string()))
}

fn glyf_bbox(bbox: Bbox) -> GlyfBbox {
    GlyfBbox {
        x_min: bbox.x_min,
        y_min: bbox.y_min,
        x_max: bbox.x_max,
        y_max: bbox.y_max,
    }
}

fn build_glyph(
    name: &str,
    record: &GlyphRecord,
    ids: &HashMap<&str, u16>,
) -> Result<Glyph, EngineError> {
    match &record.outline {
        Outline::Empty => Ok(Glyph::Empty),
        Outline::Simple {
            bbox,
            contours,
            instructions,
        } => {
            let contours = contours
                .iter()
                .filter(|contour| !contour.is_empty())
                .map(|contour| {
                    Contour::from(
                        contour
                            .iter()
                            .map(|pt| CurvePoint::new(pt.x, pt.y, pt.on_curve))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect::<Vec<_>>();
            if contours.is_empty() {
                return Ok(Glyph::Empty);
            }
            Ok(Glyph::Simple(SimpleGlyph {
                bbox: glyf_bbox(*bbox),
                contours,
                instructions: instructions.clone(),
            }))
        }
        Outline::Composite { bbox, components } => {
            let mut composite: Option<CompositeGlyph> = None;
            for component in components {
                let gid = glyph_id(ids, name, &component.glyph)?;
                let anchor = match component.anchor {
                    ComponentAnchor::Offset { x, y } => {
                        write_fonts::tables::glyf::Anchor::Offset { x, y }
                    }
                    ComponentAnchor::Point { base, component } => {
                        write_fonts::tables::glyf::Anchor::Point { base, component }
                    }
                };
                let t = component.transform;
                let transform = Transform {
                    xx: F2Dot14::from_f32(t.xx),
                    yx: F2Dot14::from_f32(t.yx),
                    xy: F2Dot14::from_f32(t.xy),
                    yy: F2Dot14::from_f32(t.yy),
                };
                let flags = GlyfComponentFlags {
                    round_xy_to_grid: component.flags.round_xy_to_grid,
                    use_my_metrics: component.flags.use_my_metrics,
                    scaled_component_offset: component.flags.scaled_component_offset,
                    unscaled_component_offset: component.flags.unscaled_component_offset,
                    overlap_compound: component.flags.overlap_compound,
                };
                let component = GlyfComponent::new(GlyphId16::new(gid), anchor, transform, flags);
                match composite.as_mut() {
                    Some(composite) => composite.add_component(component, glyf_bbox(*bbox)),
                    None => composite = Some(CompositeGlyph::new(component, glyf_bbox(*bbox))),
                }
            }
            Ok(composite.map(Glyph::Composite).unwrap_or(Glyph::Empty))
        }
    }
}

fn build_glyf(
    font: &Font,
    ids: &HashMap<&str, u16>,
) -> Result<
    (
        write_fonts::tables::glyf::Glyf,
        write_fonts::tables::loca::Loca,
        LocaFormat,
    ),
    EngineError,
> {
    let mut builder = GlyfLocaBuilder::new();
    for name in font.glyph_order() {
        let record = font
            .glyph(name)
            .ok_or_else(|| EngineError::UnknownComponent(name.clone(), name.clone()))?;
        let glyph = build_glyph(name, record, ids)?;
        builder
            .add_glyph(&glyph)
            .map_err(|e| EngineError::Glyph(name.clone(), e.to_string()))?;
    }
    Ok(builder.build())
}

fn font_bbox(font: &Font) -> Option<Bbox> {
    font.glyph_order()
        .iter()
        .filter_map(|name| font.glyph(name)?.outline.bbox())
        .reduce(|acc, bbox| Bbox {
            x_min: acc.x_min.min(bbox.x_min),
            y_min: acc.y_min.min(bbox.y_min),
            x_max: acc.x_max.max(bbox.x_max),
            y_max: acc.y_max.max(bbox.y_max),
        })
}

fn build_head(font: &Font, loca_format: LocaFormat) -> Result<Head, EngineError> {
    let mut head: Head = match raw_table::<write_fonts::read::tables::head::Head>(
        font,
        Tag::new(b"head"),
    )? {
        Some(head) => head.to_owned_table(),
        None => Head::default(),
    };
    head.units_per_em = font.units_per_em();
    let bbox = font_bbox(font).unwrap_or_default();
    head.x_min = bbox.x_min;
    head.y_min = bbox.y_min;
    head.x_max = bbox.x_max;
    head.y_max = bbox.y_max;
    head.index_to_loc_format = match loca_format {
        LocaFormat::Short => 0,
        LocaFormat::Long => 1,
    };
    Ok(head)
}

/// The hmtx table, plus how many of its entries carry an advance.
fn build_hmtx(font: &Font) -> (Hmtx, usize) {
    let metrics = font
        .glyph_order()
        .iter()
        .map(|name| {
            font.glyph(name)
                .map(|glyph| (glyph.advance, glyph.lsb))
                .unwrap_or_default()
        })
        .collect::<Vec<_>>();
    // trailing glyphs sharing the last advance only need a side bearing
    let mut long_metrics = metrics.len();
    while long_metrics > 1 && metrics[long_metrics - 1].0 == metrics[long_metrics - 2].0 {
        long_metrics -= 1;
    }
    let hmtx = Hmtx::new(
        metrics[..long_metrics]
            .iter()
            .map(|(advance, lsb)| LongMetric::new(*advance, *lsb))
            .collect(),
        metrics[long_metrics..].iter().map(|(_, lsb)| *lsb).collect(),
    );
    (hmtx, long_metrics)
}

fn build_hhea(font: &Font, long_metrics: usize) -> Result<Hhea, EngineError> {
    let mut hhea: Hhea = match raw_table::<write_fonts::read::tables::hhea::Hhea>(
        font,
        Tag::new(b"hhea"),
    )? {
        Some(hhea) => hhea.to_owned_table(),
        None => Hhea::default(),
    };
    hhea.number_of_h_metrics = long_metrics as u16;

    let mut advance_max = 0u16;
    let mut min_lsb = i16::MAX;
    let mut min_rsb = i16::MAX;
    let mut max_extent = i16::MIN;
    for glyph in font.glyph_order().iter().filter_map(|name| font.glyph(name)) {
        advance_max = advance_max.max(glyph.advance);
        let Some(bbox) = glyph.outline.bbox() else {
            continue;
        };
        let width = bbox.x_max as i32 - bbox.x_min as i32;
        let extent = glyph.lsb as i32 + width;
        min_lsb = min_lsb.min(glyph.lsb);
        min_rsb = min_rsb.min(clamp_i16(glyph.advance as i32 - extent));
        max_extent = max_extent.max(clamp_i16(extent));
    }
    hhea.advance_width_max = UfWord::new(advance_max);
    if max_extent != i16::MIN {
        hhea.min_left_side_bearing = FWord::new(min_lsb);
        hhea.min_right_side_bearing = FWord::new(min_rsb);
        hhea.x_max_extent = FWord::new(max_extent);
    }
    Ok(hhea)
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Outline statistics for maxp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct GlyphStats {
    points: u16,
    contours: u16,
    /// Nesting depth of a composite; zero for simple glyphs.
    depth: u16,
}

fn glyph_stats<'a>(
    font: &'a Font,
    name: &'a str,
    memo: &mut HashMap<&'a str, GlyphStats>,
    level: u16,
) -> GlyphStats {
    if let Some(stats) = memo.get(name) {
        return *stats;
    }
    let stats = match font.glyph(name).map(|glyph| &glyph.outline) {
        Some(Outline::Simple { contours, .. }) => GlyphStats {
            points: contours.iter().map(Vec::len).sum::<usize>().min(u16::MAX as usize) as u16,
            contours: contours.len().min(u16::MAX as usize) as u16,
            depth: 0,
        },
        // guards against reference cycles in malformed input
        Some(Outline::Composite { components, .. }) if level < 64 => {
            components
                .iter()
                .fold(GlyphStats::default(), |acc, component| {
                    let child = glyph_stats(font, &component.glyph, memo, level + 1);
                    GlyphStats {
                        points: acc.points.saturating_add(child.points),
                        contours: acc.contours.saturating_add(child.contours),
                        depth: acc.depth.max(child.depth + 1),
                    }
                })
        }
        _ => GlyphStats::default(),
    };
    memo.insert(name, stats);
    stats
}

fn build_maxp(font: &Font) -> Result<Maxp, EngineError> {
    let mut maxp: Maxp = match raw_table::<write_fonts::read::tables::maxp::Maxp>(
        font,
        Tag::new(b"maxp"),
    )? {
        Some(maxp) => maxp.to_owned_table(),
        None => Maxp::default(),
    };
    maxp.num_glyphs = font.glyph_count() as u16;

    let mut memo = HashMap::new();
    let mut simple = GlyphStats::default();
    let mut composite = GlyphStats::default();
    let mut components = 0u16;
    let mut instructions = 0u16;
    for name in font.glyph_order() {
        let stats = glyph_stats(font, name, &mut memo, 0);
        match font.glyph(name).map(|glyph| &glyph.outline) {
            Some(Outline::Simple {
                instructions: code, ..
            }) => {
                simple.points = simple.points.max(stats.points);
                simple.contours = simple.contours.max(stats.contours);
                instructions = instructions.max(code.len().min(u16::MAX as usize) as u16);
            }
            Some(Outline::Composite { components: c, .. }) => {
                composite.points = composite.points.max(stats.points);
                composite.contours = composite.contours.max(stats.contours);
                composite.depth = composite.depth.max(stats.depth);
                components = components.max(c.len().min(u16::MAX as usize) as u16);
            }
            _ => (),
        }
    }
    maxp.max_points = Some(simple.points);
    maxp.max_contours = Some(simple.contours);
    maxp.max_composite_points = Some(composite.points);
    maxp.max_composite_contours = Some(composite.contours);
    maxp.max_component_elements = Some(components);
    maxp.max_component_depth = Some(composite.depth);
    maxp.max_size_of_instructions = Some(maxp.max_size_of_instructions.unwrap_or(0).max(instructions));
    maxp.max_zones = Some(maxp.max_zones.unwrap_or(2));
    maxp.max_twilight_points = Some(maxp.max_twilight_points.unwrap_or(0));
    maxp.max_storage = Some(maxp.max_storage.unwrap_or(0));
    maxp.max_function_defs = Some(maxp.max_function_defs.unwrap_or(0));
    maxp.max_instruction_defs = Some(maxp.max_instruction_defs.unwrap_or(0));
    maxp.max_stack_elements = Some(maxp.max_stack_elements.unwrap_or(0));
    Ok(maxp)
}

/// Contiguous runs of codepoints mapped to consecutive glyph ids, as
/// `(first codepoint, last codepoint, first glyph id)`.
///
/// `mappings` must be sorted by codepoint.
pub(crate) fn sequential_groups(
    mappings: impl IntoIterator<Item = (u32, u16)>,
) -> Vec<(u32, u32, u32)> {
    let mut groups: Vec<(u32, u32, u32)> = Vec::new();
    for (codepoint, gid) in mappings {
        match groups.last_mut() {
            Some((start, end, start_gid))
                if codepoint == *end + 1 && gid as u32 == *start_gid + (codepoint - *start) =>
            {
                *end = codepoint;
            }
            _ => groups.push((codepoint, codepoint, gid as u32)),
        }
    }
    groups
}

fn build_cmap(font: &Font, ids: &HashMap<&str, u16>) -> Cmap {
    let mappings = font.charmap().iter().filter_map(|(codepoint, glyph)| {
        let gid = ids.get(glyph.as_str()).copied();
        if gid.is_none() {
            debug!("U+{codepoint:04X} maps to missing glyph '{glyph}', dropped");
        }
        Some((*codepoint, gid?))
    });
    let groups = sequential_groups(mappings)
        .into_iter()
        .map(|(start, end, gid)| SequentialMapGroup::new(start, end, gid))
        .collect::<Vec<_>>();
    let subtable = CmapSubtable::format_12(0, groups);
    Cmap::new(vec![EncodingRecord::new(PlatformId::Windows, 10, subtable)])
}

fn build_post(font: &Font) -> Result<Post, EngineError> {
    let mut post: Post = match raw_table::<write_fonts::read::tables::post::Post>(
        font,
        Tag::new(b"post"),
    )? {
        Some(post) => post.to_owned_table(),
        None => Post::default(),
    };
    post.version = Version16Dot16::VERSION_3_0;
    post.num_glyphs = None;
    post.glyph_name_index = None;
    post.string_data = None;
    if font.embedded_glyph_names() && font.outline_format() == OutlineFormat::TrueType {
        let names = Post::new_v2(font.glyph_order().iter().map(String::as_str));
        post.version = names.version;
        post.num_glyphs = names.num_glyphs;
        post.glyph_name_index = names.glyph_name_index;
        post.string_data = names.string_data;
    }
    Ok(post)
}

fn build_name(font: &Font) -> Name {
    let mut name = Name::default();
    for entry in font.name_records() {
        match &entry.value {
            NameValue::Text(text) => name.name_record.push(NameRecord::new(
                entry.platform_id,
                entry.encoding_id,
                entry.language_id,
                NameId::new(entry.name_id),
                text.clone().into(),
            )),
            NameValue::Undecodable => debug!(
                "dropping undecodable name {} ({}, {}, {})",
                entry.name_id, entry.platform_id, entry.encoding_id, entry.language_id
            ),
        }
    }
    name.name_record.sort();
    name.name_record.dedup();
    name
}
