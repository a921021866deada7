//! Reconciling units-per-em between a source and a target.

/// The power of two closest to `upm`, on a log scale.
pub fn nearest_power_of_two(upm: u16) -> u32 {
    if upm == 0 {
        return 1;
    }
    1 << (upm as f64).log2().round() as u32
}

pub fn is_power_of_two(upm: u16) -> bool {
    upm.is_power_of_two()
}

/// The UPM a source is brought to before its glyphs are copied into a
/// target, or `None` if no scaling is needed.
///
/// A source already at the target's UPM, or at the power of two nearest to
/// it, is left alone. Other power-of-two sources go to that nearest power of
/// two; everything else goes straight to the target's UPM.
pub fn reconciled_upm(source_upm: u16, target_upm: u16) -> Option<u32> {
    let binary_upm = nearest_power_of_two(target_upm);
    if source_upm == target_upm || source_upm as u32 == binary_upm {
        None
    } else if is_power_of_two(source_upm) {
        Some(binary_upm)
    } else {
        Some(target_upm as u32)
    }
}

/// The factor applied to source coordinates during a merge.
pub fn merge_scale_factor(source_upm: u16, target_upm: u16) -> Option<f64> {
    if source_upm == 0 {
        return None;
    }
    reconciled_upm(source_upm, target_upm).map(|upm| upm as f64 / source_upm as f64)
}

/// The factor applied to a single glyph pulled from `source_upm` into a
/// target at `target_upm`, without power-of-two snapping.
pub fn direct_scale_factor(source_upm: u16, target_upm: u16) -> Option<f64> {
    (source_upm != target_upm && source_upm != 0)
        .then(|| target_upm as f64 / source_upm as f64)
}
