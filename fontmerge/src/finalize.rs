//! The last steps before a built font is saved.

use write_fonts::types::Tag;

use crate::{config::LayoutMode, font::FontHandle};

/// OpenType and AAT tables that drive shaping.
pub const LAYOUT_TABLES: [Tag; 11] = [
    Tag::new(b"GSUB"),
    Tag::new(b"GPOS"),
    Tag::new(b"GDEF"),
    Tag::new(b"BASE"),
    Tag::new(b"JSTF"),
    Tag::new(b"morx"),
    Tag::new(b"mort"),
    Tag::new(b"kerx"),
    Tag::new(b"kern"),
    Tag::new(b"feat"),
    Tag::new(b"prop"),
];

pub mod name_id {
    pub const FAMILY: u16 = 1;
    pub const SUBFAMILY: u16 = 2;
    pub const FULL_NAME: u16 = 4;
    pub const POSTSCRIPT_NAME: u16 = 6;
    pub const TYPOGRAPHIC_FAMILY: u16 = 16;
    pub const TYPOGRAPHIC_SUBFAMILY: u16 = 17;
}

/// The identifying names of one family member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FamilyNames {
    pub family: String,
    pub subfamily: String,
    pub full: String,
    pub postscript: String,
}

impl FamilyNames {
    pub fn new(family: &str, variant: &str) -> Self {
        let full = if variant == "Regular" {
            family.to_string()
        } else {
            format!("{family} {variant}")
        };
        let postscript = format!("{}-{variant}", family.replace(' ', ""));
        FamilyNames {
            family: family.to_string(),
            subfamily: variant.to_string(),
            full,
            postscript,
        }
    }
}

/// Point the family-identifying names at `family` and `variant`.
///
/// Existing records are rewritten in place; records that cannot be decoded
/// keep their value. Returns the number of records changed.
pub fn update_family_names<F: FontHandle + ?Sized>(font: &mut F, family: &str, variant: &str) -> usize {
    let names = FamilyNames::new(family, variant);
    [
        (name_id::FAMILY, &names.family),
        (name_id::SUBFAMILY, &names.subfamily),
        (name_id::FULL_NAME, &names.full),
        (name_id::POSTSCRIPT_NAME, &names.postscript),
        (name_id::TYPOGRAPHIC_FAMILY, &names.family),
        (name_id::TYPOGRAPHIC_SUBFAMILY, &names.subfamily),
    ]
    .into_iter()
    .map(|(id, value)| font.set_name(id, value))
    .sum()
}

/// Remove layout tables per `mode`, returning the tags actually removed.
pub fn apply_layout_mode<F: FontHandle + ?Sized>(font: &mut F, mode: LayoutMode) -> Vec<Tag> {
    match mode {
        LayoutMode::Preserve => Vec::new(),
        LayoutMode::Strip => LAYOUT_TABLES
            .into_iter()
            .filter(|tag| font.remove_table(*tag))
            .collect(),
    }
}

/// Normalize a built font for saving.
///
/// The codepoint map is consolidated into one sorted mapping, embedded glyph
/// names are dropped, and layout tables go or stay per `mode`. Returns the
/// removed table tags.
pub fn finalize<F: FontHandle + ?Sized>(font: &mut F, mode: LayoutMode) -> Vec<Tag> {
    let consolidated = font
        .charmap()
        .iter()
        .filter(|(_, glyph)| font.contains_glyph(glyph))
        .map(|(cp, glyph)| (*cp, glyph.clone()))
        .collect();
    font.replace_charmap(consolidated);
    font.set_embedded_glyph_names(false);
    apply_layout_mode(font, mode)
}
