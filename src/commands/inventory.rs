use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::case_id::{CaseId, enumerate_cases};
use crate::cli::InventoryArgs;
use crate::commands::register::resolve;
use crate::config::{PipelineConfig, SuffixTable};
use crate::model::{CaseInventoryManifest, InventoryEntry, InventoryFile, Modality};
use crate::util::{file_name_string, now_utc_string, sha256_file, write_json_pretty};

pub fn run(args: InventoryArgs) -> Result<()> {
    if !args.bids_root.is_dir() {
        bail!("input directory does not exist: {}", args.bids_root.display());
    }
    let config = PipelineConfig::load(args.config.as_deref())?;
    let cases: Vec<CaseId> = enumerate_cases(
        &args.bids_root,
        args.subject_list.as_deref(),
        &args.cases,
        "sub",
    )?
    .iter()
    .map(|case| CaseId::new(case.compact()))
    .collect();

    let manifest = build_manifest(&args.bids_root, &cases, &config.suffixes)?;
    let with_t1 = manifest
        .cases
        .iter()
        .filter(|entry| !entry.missing.contains(&Modality::T1Preop) && entry.error.is_none())
        .count();

    if args.dry_run {
        info!(
            case_count = manifest.case_count,
            with_t1,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.bids_root.join("manifests").join("case_inventory.json"));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(case_count = manifest.case_count, with_t1, "inventory completed");

    Ok(())
}

/// Resolves every case and hashes the files found. A case whose folder cannot
/// be resolved is listed with its error rather than aborting the inventory.
pub fn build_manifest(
    bids_root: &Path,
    cases: &[CaseId],
    suffixes: &SuffixTable,
) -> Result<CaseInventoryManifest> {
    let mut entries = Vec::with_capacity(cases.len());
    for case in cases {
        let mut entry = InventoryEntry {
            case: case.to_string(),
            files: Vec::new(),
            missing: Vec::new(),
            error: None,
        };

        match resolve(&bids_root.join(case.as_str()), suffixes) {
            Ok(paths) => {
                for modality in Modality::ALL {
                    match paths.get(modality) {
                        Some(path) => entry.files.push(InventoryFile {
                            modality,
                            filename: file_name_string(path)?,
                            sha256: sha256_file(path)?,
                        }),
                        None => entry.missing.push(modality),
                    }
                }
            }
            Err(err) => {
                warn!(case = %case, error = %err, "case could not be resolved");
                entry.error = Some(err.to_string());
            }
        }
        entries.push(entry);
    }

    Ok(CaseInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: bids_root.display().to_string(),
        case_count: entries.len(),
        cases: entries,
    })
}
