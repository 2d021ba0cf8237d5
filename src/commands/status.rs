use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config::PipelineConfig;
use crate::matrix::{MATRIX_MODALITIES, QcMatrix};
use crate::model::{Modality, RegisterRunManifest};

use super::register::CASE_COMPLETE_FILE;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MatrixCounts {
    pub subjects: usize,
    pub reviewed: usize,
    pub with_mask: usize,
    /// (matrix label, present, registered) per modality.
    pub modalities: Vec<(&'static str, usize, usize)>,
}

pub fn run(args: StatusArgs) -> Result<()> {
    let config = PipelineConfig::load(args.config.as_deref())?;
    info!(save_dir = %args.save_dir.display(), "status requested");

    match latest_run_manifest(&args.save_dir.join("manifests"))? {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let manifest: RegisterRunManifest = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                status = %manifest.status,
                method = %manifest.method,
                started_at = %manifest.started_at,
                updated_at = %manifest.updated_at,
                cases = manifest.counts.case_count,
                processed = manifest.counts.processed_case_count,
                skipped = manifest.counts.skipped_case_count,
                failed = manifest.counts.failed_case_count,
                warnings = manifest.warnings.len(),
                "loaded latest register run manifest"
            );
            for failure in &manifest.failures {
                warn!(case = %failure.case, reason = %failure.reason, "case failed in last run");
            }
        }
        None => warn!(save_dir = %args.save_dir.display(), "no register run manifest found"),
    }

    let matrix_path = args.save_dir.join(&config.matrix_file_name);
    if matrix_path.exists() {
        let counts = matrix_counts(&QcMatrix::read(&matrix_path)?);
        info!(
            path = %matrix_path.display(),
            subjects = counts.subjects,
            reviewed = counts.reviewed,
            with_mask = counts.with_mask,
            "qc matrix status"
        );
        for (label, present, registered) in &counts.modalities {
            info!(modality = %label, present, registered, "modality status");
        }
    } else {
        warn!(path = %matrix_path.display(), "qc matrix missing");
    }

    info!(
        completed_cases = completed_case_count(&args.save_dir)?,
        "completion markers"
    );
    Ok(())
}

/// `register_run_<stamp>.json` with the latest stamp; stamps sort lexically.
pub fn latest_run_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.is_dir() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?
            .path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("register_run_") && name.ends_with(".json"));
        if is_run_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

pub fn matrix_counts(matrix: &QcMatrix) -> MatrixCounts {
    let rows = matrix.rows();
    let modalities = MATRIX_MODALITIES
        .iter()
        .map(|modality| {
            let present = rows
                .iter()
                .filter(|row| row.modality(*modality).is_some_and(|qc| qc.present))
                .count();
            let registered = rows
                .iter()
                .filter(|row| row.modality(*modality).is_some_and(|qc| qc.registered))
                .count();
            (modality.matrix_label(), present, registered)
        })
        .collect();

    MatrixCounts {
        subjects: rows.len(),
        reviewed: rows
            .iter()
            .filter(|row| {
                row.modality(Modality::T1Preop)
                    .is_some_and(|qc| !qc.correct_modality.is_empty())
            })
            .count(),
        with_mask: rows.iter().filter(|row| row.mask_present).count(),
        modalities,
    }
}

fn completed_case_count(save_dir: &Path) -> Result<usize> {
    if !save_dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in
        fs::read_dir(save_dir).with_context(|| format!("failed to read {}", save_dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", save_dir.display()))?;
        if entry.path().join(CASE_COMPLETE_FILE).is_file() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixRow;

    #[test]
    fn latest_manifest_is_picked_by_stamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "register_run_20240101T000000Z.json",
            "register_run_20240301T000000Z.json",
            "case_inventory.json",
        ] {
            fs::write(dir.path().join(name), "{}").expect("manifest");
        }

        let latest = latest_run_manifest(dir.path()).expect("scan");
        assert_eq!(
            latest,
            Some(dir.path().join("register_run_20240301T000000Z.json"))
        );
        assert_eq!(
            latest_run_manifest(&dir.path().join("absent")).expect("scan"),
            None
        );
    }

    #[test]
    fn matrix_counts_follow_presence_and_review() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut matrix = QcMatrix::load_or_new(&dir.path().join("matrix.csv")).expect("matrix");

        let mut reviewed = MatrixRow::new("sub-MELDH4P0001");
        let t1 = reviewed.modalities.entry(Modality::T1Preop).or_default();
        t1.present = true;
        t1.correct_modality = "1".to_string();
        let flair = reviewed.modalities.entry(Modality::FlairPreop).or_default();
        flair.present = true;
        flair.registered = true;
        reviewed.mask_present = true;
        matrix.upsert(reviewed);

        let mut pending = MatrixRow::new("sub-MELDH4P0002");
        pending.modalities.entry(Modality::T1Preop).or_default().present = true;
        matrix.upsert(pending);

        let counts = matrix_counts(&matrix);
        assert_eq!(counts.subjects, 2);
        assert_eq!(counts.reviewed, 1);
        assert_eq!(counts.with_mask, 1);
        assert_eq!(counts.modalities[0], ("T1-Preop", 2, 0));
        assert_eq!(counts.modalities[1], ("FLAIR", 1, 1));
    }
}
