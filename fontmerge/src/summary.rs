//! What a build produced, per family.

use std::{collections::BTreeMap, fmt, path::PathBuf};

use crate::error::BuildError;

/// How a build unit that did not fail ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
    Built(PathBuf),
    /// The output was already there and was left alone.
    SkippedExisting(PathBuf),
}

impl UnitOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            UnitOutcome::Built(path) | UnitOutcome::SkippedExisting(path) => path,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FamilySummary {
    pub built: Vec<PathBuf>,
    pub skipped_existing: Vec<PathBuf>,
    /// `(variant, reason)` for every unit that failed.
    pub failures: Vec<(String, String)>,
}

/// The fan-in of every build unit's result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildSummary {
    families: BTreeMap<String, FamilySummary>,
}

impl BuildSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, family: &str, variant: &str, result: &Result<UnitOutcome, BuildError>) {
        let entry = self.families.entry(family.to_string()).or_default();
        match result {
            Ok(UnitOutcome::Built(path)) => entry.built.push(path.clone()),
            Ok(UnitOutcome::SkippedExisting(path)) => entry.skipped_existing.push(path.clone()),
            Err(e) => entry.failures.push((variant.to_string(), e.to_string())),
        }
    }

    pub fn family(&self, family: &str) -> Option<&FamilySummary> {
        self.families.get(family)
    }

    pub fn families(&self) -> impl Iterator<Item = (&str, &FamilySummary)> + '_ {
        self.families.iter().map(|(name, summary)| (name.as_str(), summary))
    }

    /// The number of fonts built for `family` in this run.
    pub fn built_count(&self, family: &str) -> usize {
        self.family(family).map(|f| f.built.len()).unwrap_or(0)
    }

    pub fn has_failures(&self) -> bool {
        self.families.values().any(|f| !f.failures.is_empty())
    }

    /// Fold the results of another run, or another worker, into this one.
    pub fn merge(&mut self, other: BuildSummary) {
        for (name, summary) in other.families {
            let entry = self.families.entry(name).or_default();
            entry.built.extend(summary.built);
            entry.skipped_existing.extend(summary.skipped_existing);
            entry.failures.extend(summary.failures);
        }
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, summary) in &self.families {
            write!(f, "{name}: {} built", summary.built.len())?;
            if !summary.skipped_existing.is_empty() {
                write!(f, ", {} already present", summary.skipped_existing.len())?;
            }
            if !summary.failures.is_empty() {
                write!(f, ", {} failed", summary.failures.len())?;
            }
            writeln!(f)?;
            for (variant, reason) in &summary.failures {
                writeln!(f, "  {variant}: {reason}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_failures() {
        let mut summary = BuildSummary::new();
        summary.record("Unito", "Regular", &Ok(UnitOutcome::Built("a.ttf".into())));
        summary.record(
            "Unito",
            "Bold",
            &Ok(UnitOutcome::SkippedExisting("b.ttf".into())),
        );
        assert_eq!(summary.built_count("Unito"), 1);
        assert!(!summary.has_failures());

        let mut other = BuildSummary::new();
        other.record(
            "Unito KR",
            "Bold",
            &Err(BuildError::Panicked("boom".into())),
        );
        summary.merge(other);
        assert!(summary.has_failures());
        assert_eq!(summary.built_count("Unito KR"), 0);
        assert_eq!(summary.built_count("Unito TW"), 0);
        assert_eq!(
            summary.to_string(),
            "Unito: 1 built, 1 already present\nUnito KR: 0 built, 1 failed\n  Bold: worker panicked: boom\n"
        );
    }
}
