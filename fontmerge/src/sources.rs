//! Finding source fonts and naming their static instances.

use std::{
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

/// The folder, inside a stage or family folder, holding instanced fonts.
pub const STATIC_DIR: &str = "static";
/// The folder, inside a family folder, holding built fonts.
pub const BUILD_DIR: &str = "build";

static AXES_REGEX: OnceLock<Regex> = OnceLock::new();
static STYLE_REGEX: OnceLock<Regex> = OnceLock::new();

fn axes_regex() -> &'static Regex {
    AXES_REGEX.get_or_init(|| Regex::new(r"\[[^\]]+\]").expect("valid axes pattern"))
}

fn style_regex() -> &'static Regex {
    STYLE_REGEX.get_or_init(|| {
        Regex::new(r"-(Regular|Bold|Italic|Light|Medium|Thin|Black|SemiBold|ExtraBold)$")
            .expect("valid style pattern")
    })
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && keep(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// The `.ttf` and `.otf` files directly in `dir`, sorted by file name.
///
/// A missing folder has no sources.
pub fn source_fonts(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    list_files(dir, |path| has_extension(path, &["ttf", "otf"]))
}

/// The `.ttf` files directly in `dir`, sorted by file name.
pub fn ttf_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    list_files(dir, |path| has_extension(path, &["ttf"]))
}

/// The first `.otf` file in `dir`, by file name.
pub fn first_otf(dir: &Path) -> io::Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    Ok(list_files(dir, |path| has_extension(path, &["otf"]))?
        .into_iter()
        .next())
}

/// The file name of the static instance of `source` for `variant`.
///
/// Axis lists like `[wdth,wght]` and a trailing style suffix are removed from
/// the stem, so `NotoSans[wdth,wght].ttf` and `NotoSans-Regular.ttf` both
/// become `NotoSans-{variant}.ttf`.
pub fn static_font_name(source: &Path, variant: &str) -> String {
    let stem = source
        .file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default();
    let stem = axes_regex().replace_all(&stem, "");
    let stem = style_regex().replace(&stem, "");
    format!("{stem}-{variant}.ttf")
}

/// The static instances for `variant` in `static_dir`, sorted by file name.
pub fn variant_statics(static_dir: &Path, variant: &str) -> io::Result<Vec<PathBuf>> {
    if !static_dir.is_dir() {
        return Ok(Vec::new());
    }
    let suffix = format!("-{variant}.ttf");
    list_files(static_dir, |path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(&suffix))
    })
}
