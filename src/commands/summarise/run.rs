use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, warn};

use crate::cli::SummariseArgs;
use crate::commands::demographics::qc_demographics;
use crate::matrix::QcMatrix;

use super::colour::row_colour;
use super::discovery::{SiteFolder, mri_qc_files, participants_files, site_folders};
use super::mri::{MriAssessment, assess_subject};
use super::workbook::{SummaryRow, write_summary_csv, write_summary_xlsx};

/// Row stand-in when a site's demographics cannot be checked.
const ALL_SUBJECTS: &str = "all";

struct DemographicEntry {
    study_id: String,
    original_id: String,
    notes: String,
    need_mask: Option<u8>,
}

pub fn run(args: SummariseArgs) -> Result<()> {
    if !args.dir.is_dir() {
        bail!("input directory does not exist: {}", args.dir.display());
    }

    let rows = summarise_sites(&args.dir, args.site.as_deref())?;
    write_summary_csv(&args.output_file, &rows)?;
    let workbook_path = args.output_file.with_extension("xlsx");
    write_summary_xlsx(&workbook_path, &rows)?;

    info!(
        rows = rows.len(),
        csv = %args.output_file.display(),
        workbook = %workbook_path.display(),
        "site summary written"
    );
    Ok(())
}

pub fn summarise_sites(root: &Path, site: Option<&str>) -> Result<Vec<SummaryRow>> {
    let mut rows = Vec::new();
    for folder in site_folders(root, site)? {
        info!(site = %folder.site, path = %folder.path.display(), "summarising site");
        rows.extend(summarise_site(&folder)?);
    }
    Ok(rows)
}

pub fn summarise_site(folder: &SiteFolder) -> Result<Vec<SummaryRow>> {
    let site = folder.site.as_str();
    let demographics = site_demographics(folder)?;

    let mri_files = mri_qc_files(&folder.path)?;
    let matrix = match mri_files.as_slice() {
        [single] => Ok(QcMatrix::read(single)?),
        [] => {
            warn!(site, "MRI QC csv cannot be found");
            Err("MRI QC csv cannot be found")
        }
        _ => {
            warn!(site, files = mri_files.len(), "found multiple MRI QC csv");
            Err("Found multiple MRI QC csv")
        }
    };

    let rows = demographics
        .into_iter()
        .map(|entry| {
            let demographic_qc = u8::from(entry.notes.is_empty());
            let mri = match &matrix {
                Ok(matrix) => assess_subject(matrix, &entry.study_id, entry.need_mask),
                Err(note) => MriAssessment::incomplete(*note),
            };
            let row = SummaryRow {
                study_id: entry.study_id,
                original_id: entry.original_id,
                site: site.to_string(),
                demographic_qc,
                demographic_notes: entry.notes,
                mri,
            };
            info!(
                site,
                subject = %row.study_id,
                colour = row_colour(&row).name(),
                "subject summarised"
            );
            row
        })
        .collect();
    Ok(rows)
}

fn site_demographics(folder: &SiteFolder) -> Result<Vec<DemographicEntry>> {
    let site = folder.site.as_str();
    let files = participants_files(&folder.path, site)?;
    let note = match files.as_slice() {
        [single] => {
            let output = qc_sheet_path(single);
            let subjects = qc_demographics(single, site, &output)?;
            return Ok(subjects
                .into_iter()
                .map(|subject| DemographicEntry {
                    notes: subject.error_notes(),
                    need_mask: subject.need_mask,
                    study_id: subject.study_id,
                    original_id: subject.original_id,
                })
                .collect());
        }
        [] => "Participants infos csv cannot be found",
        _ => "Found multiple participants infos csv",
    };

    warn!(site, files = files.len(), note, "demographics not checked");
    Ok(vec![DemographicEntry {
        study_id: ALL_SUBJECTS.to_string(),
        original_id: String::new(),
        notes: note.to_string(),
        need_mask: None,
    }])
}

/// `<stem>_QC.csv` next to the participants sheet.
fn qc_sheet_path(participants: &Path) -> PathBuf {
    let name = participants
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".csv").unwrap_or(&name);
    participants.with_file_name(format!("{stem}_QC.csv"))
}
