//! The in-memory font model that merges operate on.
//!
//! A [`Font`] owns everything a merge needs to read or mutate: the glyph
//! namespace in order, per-glyph outlines and metrics, the codepoint map and
//! the naming records. Tables the merge never touches are carried through as
//! raw bytes so that a save can reproduce them untouched.
//!
//! Merge and pipeline code is written against the [`FontHandle`] trait rather
//! than [`Font`] directly, so that any backing font library can stand in.

use std::collections::{BTreeMap, HashMap};

use write_fonts::types::Tag;

/// The outline flavour of a font.
///
/// Glyphs can only be copied between fonts that share a flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutlineFormat {
    /// Quadratic outlines in `glyf`/`loca`.
    TrueType,
    /// Cubic outlines in `CFF ` or `CFF2`.
    Cff,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bbox {
    pub x_min: i16,
    pub y_min: i16,
    pub x_max: i16,
    pub y_max: i16,
}

impl Bbox {
    /// Compute the bounds of a set of points, or `None` if there are none.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Bbox> {
        points.into_iter().fold(None, |acc, pt| {
            Some(match acc {
                None => Bbox {
                    x_min: pt.x,
                    y_min: pt.y,
                    x_max: pt.x,
                    y_max: pt.y,
                },
                Some(bbox) => Bbox {
                    x_min: bbox.x_min.min(pt.x),
                    y_min: bbox.y_min.min(pt.y),
                    x_max: bbox.x_max.max(pt.x),
                    y_max: bbox.y_max.max(pt.y),
                },
            })
        })
    }

    fn scaled(self, ratio: f64) -> Bbox {
        Bbox {
            x_min: scale_i16(self.x_min, ratio),
            y_min: scale_i16(self.y_min, ratio),
            x_max: scale_i16(self.x_max, ratio),
            y_max: scale_i16(self.y_max, ratio),
        }
    }
}

/// A point in a simple glyph's outline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Point {
    pub x: i16,
    pub y: i16,
    pub on_curve: bool,
}

impl Point {
    pub fn on_curve(x: i16, y: i16) -> Self {
        Point {
            x,
            y,
            on_curve: true,
        }
    }

    pub fn off_curve(x: i16, y: i16) -> Self {
        Point {
            x,
            y,
            on_curve: false,
        }
    }
}

/// How a component is positioned relative to its composite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentAnchor {
    /// A translation in font units.
    Offset { x: i16, y: i16 },
    /// Align point `component` of the component with point `base` of the
    /// glyph built so far.
    Point { base: u16, component: u16 },
}

/// A 2x2 transform, in `xx, yx, xy, yy` order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComponentTransform {
    pub xx: f32,
    pub yx: f32,
    pub xy: f32,
    pub yy: f32,
}

impl Default for ComponentTransform {
    fn default() -> Self {
        ComponentTransform {
            xx: 1.0,
            yx: 0.0,
            xy: 0.0,
            yy: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComponentFlags {
    pub round_xy_to_grid: bool,
    pub use_my_metrics: bool,
    pub scaled_component_offset: bool,
    pub unscaled_component_offset: bool,
    pub overlap_compound: bool,
}

/// A reference from a composite glyph to another glyph, by name.
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    pub glyph: String,
    pub anchor: ComponentAnchor,
    pub transform: ComponentTransform,
    pub flags: ComponentFlags,
}

impl Component {
    /// A plain component translated by `(x, y)`.
    pub fn offset(glyph: impl Into<String>, x: i16, y: i16) -> Self {
        Component {
            glyph: glyph.into(),
            anchor: ComponentAnchor::Offset { x, y },
            transform: Default::default(),
            flags: ComponentFlags {
                round_xy_to_grid: true,
                ..Default::default()
            },
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Outline {
    #[default]
    Empty,
    Simple {
        bbox: Bbox,
        contours: Vec<Vec<Point>>,
        instructions: Vec<u8>,
    },
    Composite {
        bbox: Bbox,
        components: Vec<Component>,
    },
}

impl Outline {
    /// A simple outline with its bounding box computed from the points.
    pub fn simple(contours: Vec<Vec<Point>>) -> Outline {
        let bbox = Bbox::from_points(contours.iter().flatten()).unwrap_or_default();
        if contours.iter().all(Vec::is_empty) {
            return Outline::Empty;
        }
        Outline::Simple {
            bbox,
            contours,
            instructions: Vec::new(),
        }
    }

    pub fn bbox(&self) -> Option<Bbox> {
        match self {
            Outline::Empty => None,
            Outline::Simple { bbox, .. } | Outline::Composite { bbox, .. } => Some(*bbox),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Outline::Composite { .. })
    }
}

/// One glyph: horizontal metrics plus outline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlyphRecord {
    pub advance: u16,
    pub lsb: i16,
    pub outline: Outline,
}

impl GlyphRecord {
    pub fn new(advance: u16, lsb: i16, outline: Outline) -> Self {
        GlyphRecord {
            advance,
            lsb,
            outline,
        }
    }

    /// Names of the glyphs this glyph directly references.
    pub fn component_names(&self) -> impl Iterator<Item = &str> + '_ {
        let components = match &self.outline {
            Outline::Composite { components, .. } => components.as_slice(),
            _ => &[],
        };
        components.iter().map(|c| c.glyph.as_str())
    }

    /// Return a copy with every coordinate and metric multiplied by `ratio`.
    ///
    /// Values are rounded to the nearest integer. Point anchors and the 2x2
    /// component transforms are unitless and are left alone.
    pub fn scaled(&self, ratio: f64) -> GlyphRecord {
        let outline = match &self.outline {
            Outline::Empty => Outline::Empty,
            Outline::Simple {
                bbox,
                contours,
                instructions,
            } => Outline::Simple {
                bbox: bbox.scaled(ratio),
                contours: contours
                    .iter()
                    .map(|contour| {
                        contour
                            .iter()
                            .map(|pt| Point {
                                x: scale_i16(pt.x, ratio),
                                y: scale_i16(pt.y, ratio),
                                on_curve: pt.on_curve,
                            })
                            .collect()
                    })
                    .collect(),
                instructions: instructions.clone(),
            },
            Outline::Composite { bbox, components } => Outline::Composite {
                bbox: bbox.scaled(ratio),
                components: components
                    .iter()
                    .map(|component| {
                        let mut component = component.clone();
                        if let ComponentAnchor::Offset { x, y } = component.anchor {
                            component.anchor = ComponentAnchor::Offset {
                                x: scale_i16(x, ratio),
                                y: scale_i16(y, ratio),
                            };
                        }
                        component
                    })
                    .collect(),
            },
        };
        GlyphRecord {
            advance: (self.advance as f64 * ratio)
                .round()
                .clamp(0.0, u16::MAX as f64) as u16,
            lsb: scale_i16(self.lsb, ratio),
            outline,
        }
    }

    /// Point component references at new names.
    ///
    /// References without an entry in `renames` are left as they are.
    pub fn rename_components(&mut self, renames: impl Fn(&str) -> Option<String>) {
        if let Outline::Composite { components, .. } = &mut self.outline {
            for component in components.iter_mut() {
                if let Some(new_name) = renames(&component.glyph) {
                    component.glyph = new_name;
                }
            }
        }
    }
}

fn scale_i16(value: i16, ratio: f64) -> i16 {
    (value as f64 * ratio)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// The decoded value of a naming record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NameValue {
    Text(String),
    /// The record uses an encoding we cannot decode.
    Undecodable,
}

/// One record of the naming table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameEntry {
    pub platform_id: u16,
    pub encoding_id: u16,
    pub language_id: u16,
    pub name_id: u16,
    pub value: NameValue,
}

impl NameEntry {
    /// A Windows Unicode BMP, US English record.
    pub fn windows(name_id: u16, value: impl Into<String>) -> Self {
        NameEntry {
            platform_id: 3,
            encoding_id: 1,
            language_id: 0x409,
            name_id,
            value: NameValue::Text(value.into()),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.value {
            NameValue::Text(text) => Some(text),
            NameValue::Undecodable => None,
        }
    }
}

/// The capabilities the merge engine and the pipeline need from a font.
///
/// Glyphs are addressed by name. Names are unique, and the glyph order is the
/// order in which glyphs were added.
pub trait FontHandle {
    fn units_per_em(&self) -> u16;

    fn outline_format(&self) -> OutlineFormat;

    fn glyph_order(&self) -> &[String];

    fn glyph_count(&self) -> usize {
        self.glyph_order().len()
    }

    fn glyph(&self, name: &str) -> Option<&GlyphRecord>;

    fn contains_glyph(&self, name: &str) -> bool {
        self.glyph(name).is_some()
    }

    /// The best available codepoint to glyph name mapping.
    fn charmap(&self) -> &BTreeMap<u32, String>;

    fn covers(&self, codepoint: u32) -> bool {
        self.charmap().contains_key(&codepoint)
    }

    /// Append a glyph to the end of the glyph order.
    ///
    /// Returns `false`, leaving the font untouched, if the name is taken.
    fn push_glyph(&mut self, name: String, record: GlyphRecord) -> bool;

    /// Map a codepoint to a glyph.
    ///
    /// Returns `false`, leaving the font untouched, if the codepoint is
    /// already mapped or the glyph does not exist.
    fn map_codepoint(&mut self, codepoint: u32, glyph: &str) -> bool;

    /// Replace the codepoint map wholesale.
    fn replace_charmap(&mut self, charmap: BTreeMap<u32, String>);

    fn name_records(&self) -> &[NameEntry];

    /// Set the string of every decodable record with `name_id`.
    ///
    /// Returns the number of records updated.
    fn set_name(&mut self, name_id: u16, value: &str) -> usize;

    /// Whether glyph names are written into the output.
    fn set_embedded_glyph_names(&mut self, embedded: bool);

    /// Drop a table that is otherwise carried through unchanged.
    fn remove_table(&mut self, tag: Tag) -> bool;
}

/// An owned, fully decoded font.
#[derive(Clone, Debug)]
pub struct Font {
    upm: u16,
    format: OutlineFormat,
    glyph_order: Vec<String>,
    glyphs: HashMap<String, GlyphRecord>,
    charmap: BTreeMap<u32, String>,
    names: Vec<NameEntry>,
    tables: BTreeMap<Tag, Vec<u8>>,
    embedded_glyph_names: bool,
    loaded_glyph_count: Option<usize>,
    instanced: bool,
}

impl Font {
    /// An empty TrueType-flavoured font.
    pub fn new(upm: u16) -> Self {
        Font {
            upm,
            format: OutlineFormat::TrueType,
            glyph_order: Vec::new(),
            glyphs: HashMap::new(),
            charmap: BTreeMap::new(),
            names: Vec::new(),
            tables: BTreeMap::new(),
            embedded_glyph_names: true,
            loaded_glyph_count: None,
            instanced: false,
        }
    }

    pub fn with_format(mut self, format: OutlineFormat) -> Self {
        self.format = format;
        self
    }

    pub fn set_units_per_em(&mut self, upm: u16) {
        self.upm = upm;
    }

    pub fn embedded_glyph_names(&self) -> bool {
        self.embedded_glyph_names
    }

    pub fn push_name_record(&mut self, entry: NameEntry) {
        self.names.push(entry);
    }

    /// Raw tables that are carried through a save untouched.
    pub fn raw_tables(&self) -> &BTreeMap<Tag, Vec<u8>> {
        &self.tables
    }

    pub fn insert_raw_table(&mut self, tag: Tag, data: Vec<u8>) {
        self.tables.insert(tag, data);
    }

    pub fn has_table(&self, tag: Tag) -> bool {
        self.tables.contains_key(&tag)
    }

    /// The number of glyphs when this font was read from disk, if it was.
    pub fn loaded_glyph_count(&self) -> Option<usize> {
        self.loaded_glyph_count
    }

    pub(crate) fn set_loaded_glyph_count(&mut self, count: usize) {
        self.loaded_glyph_count = Some(count);
    }

    /// Whether this font was produced by resolving a variable font.
    pub fn is_instanced(&self) -> bool {
        self.instanced
    }

    pub(crate) fn set_instanced(&mut self, instanced: bool) {
        self.instanced = instanced;
    }

    /// Keep only the codepoints for which `keep` returns true.
    ///
    /// Glyphs stay in place; a glyph that loses all of its codepoints is simply
    /// no longer reachable through the codepoint map.
    pub fn retain_codepoints(&mut self, mut keep: impl FnMut(u32) -> bool) {
        self.charmap.retain(|cp, _| keep(*cp));
    }
}

impl FontHandle for Font {
    fn units_per_em(&self) -> u16 {
        self.upm
    }

    fn outline_format(&self) -> OutlineFormat {
        self.format
    }

    fn glyph_order(&self) -> &[String] {
        &self.glyph_order
    }

    fn glyph(&self, name: &str) -> Option<&GlyphRecord> {
        self.glyphs.get(name)
    }

    fn charmap(&self) -> &BTreeMap<u32, String> {
        &self.charmap
    }

    fn push_glyph(&mut self, name: String, record: GlyphRecord) -> bool {
        if self.glyphs.contains_key(&name) {
            return false;
        }
        self.glyph_order.push(name.clone());
        self.glyphs.insert(name, record);
        true
    }

    fn map_codepoint(&mut self, codepoint: u32, glyph: &str) -> bool {
        if self.charmap.contains_key(&codepoint) || !self.glyphs.contains_key(glyph) {
            return false;
        }
        self.charmap.insert(codepoint, glyph.to_string());
        true
    }

    fn replace_charmap(&mut self, charmap: BTreeMap<u32, String>) {
        self.charmap = charmap;
    }

    fn name_records(&self) -> &[NameEntry] {
        &self.names
    }

    fn set_name(&mut self, name_id: u16, value: &str) -> usize {
        let mut updated = 0;
        for entry in self.names.iter_mut().filter(|e| e.name_id == name_id) {
            if let NameValue::Text(text) = &mut entry.value {
                *text = value.to_string();
                updated += 1;
            }
        }
        updated
    }

    fn set_embedded_glyph_names(&mut self, embedded: bool) {
        self.embedded_glyph_names = embedded;
    }

    fn remove_table(&mut self, tag: Tag) -> bool {
        self.tables.remove(&tag).is_some()
    }
}
