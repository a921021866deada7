//! Deciding which codepoints a merge may take.

use std::{fmt::Debug, ops::RangeInclusive, sync::Arc};

use serde::{Deserialize, Serialize};
use unicode_properties::{GeneralCategory, UnicodeGeneralCategory};
use unicode_script::{Script, UnicodeScript};

/// CJK Unified Ideographs, including every extension block and the
/// compatibility ideographs.
///
/// These are excluded outright when Han is excluded, whatever the script
/// property says.
pub const CJK_IDEOGRAPH_RANGES: [RangeInclusive<u32>; 12] = [
    0x4E00..=0x9FFF,   // unified
    0x3400..=0x4DBF,   // extension A
    0x20000..=0x2A6DF, // extension B
    0x2A700..=0x2B73F, // extension C
    0x2B740..=0x2B81F, // extension D
    0x2B820..=0x2CEAF, // extension E
    0x2CEB0..=0x2EBEF, // extension F
    0x30000..=0x3134F, // extension G
    0x31350..=0x323AF, // extension H
    0x2EBF0..=0x2EE5F, // extension I
    0xF900..=0xFAFF,   // compatibility
    0x2F800..=0x2FA1F, // compatibility supplement
];

/// The BMP private use area.
pub const PRIVATE_USE_AREA: RangeInclusive<u32> = 0xE000..=0xF8FF;

/// Which scripts a merge call keeps out of the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodepointPolicy {
    pub exclude_hani: bool,
    pub exclude_hang: bool,
    pub exclude_tang: bool,
}

impl CodepointPolicy {
    /// Let everything through.
    pub const ALLOW_ALL: CodepointPolicy = CodepointPolicy {
        exclude_hani: false,
        exclude_hang: false,
        exclude_tang: false,
    };

    /// Keep Han, Hangul and Tangut out.
    pub const EXCLUDE_CJK: CodepointPolicy = CodepointPolicy {
        exclude_hani: true,
        exclude_hang: true,
        exclude_tang: true,
    };

    /// Keep only Han out.
    pub const EXCLUDE_HAN: CodepointPolicy = CodepointPolicy {
        exclude_hani: true,
        exclude_hang: false,
        exclude_tang: false,
    };
}

/// The scripts the classifier cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptClass {
    Han,
    Hangul,
    Tangut,
    Other,
}

/// A source of Unicode character properties.
///
/// Either lookup may be unavailable, in which case it returns `None` and the
/// classifier falls back to a permissive answer.
pub trait UnicodeProperties: Debug + Send + Sync {
    fn script(&self, codepoint: u32) -> Option<ScriptClass>;

    /// Whether the codepoint is unassigned, private use or a surrogate.
    fn is_unassigned(&self, codepoint: u32) -> Option<bool>;
}

/// Properties from the Unicode Character Database tables compiled into the
/// `unicode-script` and `unicode-properties` crates.
#[derive(Clone, Copy, Debug, Default)]
pub struct UcdProperties;

impl UnicodeProperties for UcdProperties {
    fn script(&self, codepoint: u32) -> Option<ScriptClass> {
        let ch = char::from_u32(codepoint)?;
        Some(match ch.script() {
            Script::Han => ScriptClass::Han,
            Script::Hangul => ScriptClass::Hangul,
            Script::Tangut => ScriptClass::Tangut,
            _ => ScriptClass::Other,
        })
    }

    fn is_unassigned(&self, codepoint: u32) -> Option<bool> {
        // surrogates are not chars
        let Some(ch) = char::from_u32(codepoint) else {
            return Some(true);
        };
        Some(matches!(
            ch.general_category(),
            GeneralCategory::Unassigned | GeneralCategory::PrivateUse | GeneralCategory::Surrogate
        ))
    }
}

/// Properties that are never available.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProperties;

impl UnicodeProperties for NoProperties {
    fn script(&self, _: u32) -> Option<ScriptClass> {
        None
    }

    fn is_unassigned(&self, _: u32) -> Option<bool> {
        None
    }
}

/// Answers exclusion and validity questions about codepoints.
#[derive(Clone, Debug)]
pub struct Classifier {
    properties: Arc<dyn UnicodeProperties>,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(UcdProperties)
    }
}

impl Classifier {
    pub fn new(properties: impl UnicodeProperties + 'static) -> Self {
        Classifier {
            properties: Arc::new(properties),
        }
    }

    /// Whether `policy` keeps `codepoint` out of the target.
    pub fn is_excluded(&self, codepoint: u32, policy: CodepointPolicy) -> bool {
        if policy.exclude_hani && is_cjk_ideograph(codepoint) {
            return true;
        }
        if PRIVATE_USE_AREA.contains(&codepoint) {
            return false;
        }
        match self.properties.script(codepoint) {
            Some(ScriptClass::Han) => policy.exclude_hani,
            Some(ScriptClass::Hangul) => policy.exclude_hang,
            Some(ScriptClass::Tangut) => policy.exclude_tang,
            Some(ScriptClass::Other) | None => false,
        }
    }

    /// Whether `codepoint` is an assigned, non-private, non-surrogate
    /// character.
    ///
    /// Returns true when the property source cannot tell.
    pub fn is_valid_assigned(&self, codepoint: u32) -> bool {
        !self.properties.is_unassigned(codepoint).unwrap_or(false)
    }
}

/// Whether `codepoint` falls in one of the [`CJK_IDEOGRAPH_RANGES`].
pub fn is_cjk_ideograph(codepoint: u32) -> bool {
    CJK_IDEOGRAPH_RANGES
        .iter()
        .any(|range| range.contains(&codepoint))
}
