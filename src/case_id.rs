use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const BIDS_PREFIX: &str = "sub-";

/// Subject identifier in either the underscore form (`MELD_H16_P_0101`) or the
/// compact BIDS form (`sub-MELDH16P0101`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_compact(&self) -> bool {
        self.0.starts_with(BIDS_PREFIX)
    }

    /// Compact BIDS folder name; already-compact ids are returned unchanged.
    pub fn compact(&self) -> String {
        compact_id(&self.0)
    }

    /// Trailing number of an underscore id, e.g. `0101` for `MELD_H16_P_0101`.
    pub fn case_number(&self) -> Option<&str> {
        if self.is_compact() {
            return None;
        }
        self.0
            .rsplit_once('_')
            .map(|(_, number)| number)
            .filter(|number| !number.is_empty())
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn compact_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with(BIDS_PREFIX) {
        return trimmed.to_string();
    }
    format!("{BIDS_PREFIX}{}", trimmed.replace('_', ""))
}

/// Case folders under `root` whose name contains `needle`, sorted.
pub fn cases_from_directory(root: &Path, needle: &str) -> Result<Vec<CaseId>> {
    let entries =
        fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?;

    let mut cases = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
        let path = entry.path();
        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_dir()
        {
            continue;
        }

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.contains(needle) {
            cases.push(CaseId::new(name));
        }
    }

    cases.sort();
    Ok(cases)
}

/// One id per line; blank lines and `#` comments are skipped, duplicates dropped.
pub fn cases_from_subject_list(path: &Path) -> Result<Vec<CaseId>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read subject list {}", path.display()))?;

    let mut seen = HashSet::new();
    let mut cases = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let case = CaseId::new(line);
        if seen.insert(case.clone()) {
            cases.push(case);
        }
    }

    if cases.is_empty() {
        bail!("subject list {} does not name any case", path.display());
    }
    Ok(cases)
}

/// Explicit ids win over a subject list, which wins over a directory listing.
pub fn enumerate_cases(
    root: &Path,
    subject_list: Option<&Path>,
    explicit: &[String],
    needle: &str,
) -> Result<Vec<CaseId>> {
    if !explicit.is_empty() {
        return Ok(explicit.iter().map(CaseId::new).collect());
    }
    if let Some(list) = subject_list {
        return cases_from_subject_list(list);
    }
    cases_from_directory(root, needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_removes_underscores_and_prefixes() {
        let case = CaseId::new("MELD_H16_P_0101");
        assert_eq!(case.compact(), "sub-MELDH16P0101");
        assert_eq!(case.case_number(), Some("0101"));
    }

    #[test]
    fn compact_is_idempotent_for_both_conventions() {
        for raw in ["MELD_H4_C_0028", "sub-MELDH4C0028", " MELD_H101_P_00073 "] {
            let once = compact_id(raw);
            let twice = compact_id(&once);
            assert_eq!(once, twice);
            assert_eq!(CaseId::new(once.clone()).compact(), once);
        }
    }

    #[test]
    fn subject_list_skips_comments_and_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let list = dir.path().join("subjects.txt");
        fs::write(&list, "# cohort\nMELD_H16_P_0101\n\nsub-MELDH16P0102\nMELD_H16_P_0101\n")
            .expect("write list");

        let cases = cases_from_subject_list(&list).expect("list should parse");
        assert_eq!(
            cases,
            vec![CaseId::new("MELD_H16_P_0101"), CaseId::new("sub-MELDH16P0102")]
        );
    }

    #[test]
    fn directory_listing_keeps_matching_folders_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub-B")).expect("mkdir");
        fs::create_dir(dir.path().join("sub-A")).expect("mkdir");
        fs::create_dir(dir.path().join("derivatives")).expect("mkdir");
        fs::write(dir.path().join("sub-file.txt"), "x").expect("write");

        let cases = cases_from_directory(dir.path(), "sub").expect("listing");
        assert_eq!(cases, vec![CaseId::new("sub-A"), CaseId::new("sub-B")]);
    }
}
