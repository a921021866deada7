//! Collecting built fonts into one folder.

use std::path::{Path, PathBuf};

use log::info;

use crate::{
    config::BuildConfig,
    error::BuildError,
    events::{BuildEvent, EventSink},
    extract::source_label,
    sources::ttf_files,
};

/// Copy every built `.ttf` of the base family and of each derived family
/// into `dest`.
///
/// File names are kept and existing files in `dest` are overwritten. Build
/// folders that do not exist are passed over. Returns the delivered paths.
pub fn deliver(
    config: &BuildConfig,
    dest: &Path,
    sink: &dyn EventSink,
) -> Result<Vec<PathBuf>, BuildError> {
    std::fs::create_dir_all(dest).map_err(|e| BuildError::io(dest, e))?;

    let build_dirs = std::iter::once(config.base_build_dir())
        .chain(config.families.iter().map(|f| config.family_build_dir(f)));
    let mut delivered = Vec::new();
    for dir in build_dirs {
        for font in ttf_files(&dir).map_err(|e| BuildError::io(&dir, e))? {
            let target = dest.join(source_label(&font));
            std::fs::copy(&font, &target).map_err(|e| BuildError::io(&target, e))?;
            sink.record(BuildEvent::Delivered {
                path: target.clone(),
            });
            delivered.push(target);
        }
    }
    info!("delivered {} fonts to {}", delivered.len(), dest.display());
    Ok(delivered)
}
