use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

pub const SITE_MARKER: &str = "MELD_H";
pub const MRI_QC_DIR: &str = "MELD_BIDS_QC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteFolder {
    pub site: String,
    pub path: PathBuf,
}

/// Site folders under `root`. With an explicit site only `MELD_<site>` is
/// considered; otherwise every directory whose name contains `MELD_H`.
pub fn site_folders(root: &Path, site: Option<&str>) -> Result<Vec<SiteFolder>> {
    if let Some(site) = site {
        return Ok(vec![SiteFolder {
            site: site.to_string(),
            path: root.join(format!("MELD_{site}")),
        }]);
    }

    let entries =
        fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?;
    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", root.display()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.contains(SITE_MARKER) {
            continue;
        }
        let site = name.rsplit("MELD_").next().unwrap_or(name).to_string();
        folders.push(SiteFolder { site, path });
    }

    folders.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(folders)
}

/// `MELD_participants_infos_<site>_*.csv`, excluding previously written QC sheets.
pub fn participants_files(folder: &Path, site: &str) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(&format!(
        r"^MELD_participants_infos_{}_.*\.csv$",
        regex::escape(site)
    ))
    .context("failed to compile participants filename regex")?;
    matching_files(folder, &pattern, |name| !name.contains("QC"))
}

/// `MELD_BIDS_QC/df_qc_all_*.csv`.
pub fn mri_qc_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let pattern =
        Regex::new(r"^df_qc_all_.*\.csv$").context("failed to compile qc matrix filename regex")?;
    matching_files(&folder.join(MRI_QC_DIR), &pattern, |_| true)
}

fn matching_files(
    dir: &Path,
    pattern: &Regex,
    keep: impl Fn(&str) -> bool,
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if pattern.is_match(name) && keep(name) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
