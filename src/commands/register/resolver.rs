use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::SuffixTable;
use crate::model::{Modality, ModalityPaths};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{} matched both {} and {}", slot.matrix_label(), first.display(), second.display())]
    Duplicate {
        slot: Modality,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("failed to list {}: {source}", dir.display())]
    Io {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Maps the files under `<case>/anat` and `<case>/dwi` onto modality slots by
/// case-insensitive suffix. The first slot in slot order claims a file.
pub fn resolve(case_dir: &Path, suffixes: &SuffixTable) -> Result<ModalityPaths, ResolveError> {
    let mut paths = ModalityPaths::default();
    for (slot, file) in matched_files(case_dir, suffixes)? {
        if let Some(first) = paths.get(slot) {
            return Err(ResolveError::Duplicate {
                slot,
                first: first.to_path_buf(),
                second: file,
            });
        }
        paths.insert(slot, file);
    }
    Ok(paths)
}

/// Slots with at least one matching file, duplicates included.
pub fn present_modalities(
    case_dir: &Path,
    suffixes: &SuffixTable,
) -> Result<BTreeSet<Modality>, ResolveError> {
    Ok(matched_files(case_dir, suffixes)?
        .into_iter()
        .map(|(slot, _)| slot)
        .collect())
}

fn matched_files(
    case_dir: &Path,
    suffixes: &SuffixTable,
) -> Result<Vec<(Modality, PathBuf)>, ResolveError> {
    let mut matched = Vec::new();

    for folder in ["anat", "dwi"] {
        let slots: Vec<(Modality, String)> = Modality::ALL
            .iter()
            .filter(|modality| modality.subfolder() == folder)
            .map(|modality| (*modality, suffixes.suffix_for(*modality).to_lowercase()))
            .collect();

        for file in sorted_files(&case_dir.join(folder))? {
            let Some(name) = file.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let lower = name.to_lowercase();
            if let Some((slot, _)) = slots.iter().find(|(_, suffix)| lower.ends_with(suffix)) {
                matched.push((*slot, file));
            }
        }
    }

    Ok(matched)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, ResolveError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let io_error = |source| ResolveError::Io {
        dir: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if entry.file_type().map_err(io_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
