use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("failed to open file for hashing: {}", path.display()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];

    loop {
        let count = file
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;
    data.push(b'\n');

    write_atomic(path, &data)
}

/// Writes through a sibling temp file and renames it over `path`, so readers
/// never observe a half-written file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid output path: {}", path.display()))?;
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = File::create(&temp_path)
        .with_context(|| format!("failed to create file: {}", temp_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("failed to write file: {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to flush file: {}", temp_path.display()))?;
    drop(file);

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            temp_path.display(),
            path.display()
        )
    })
}

pub fn copy_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        ensure_directory(parent)?;
    }
    fs::copy(source, destination).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    Ok(())
}

pub fn file_name_string(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))
}

/// File name without its `.nii.gz` / `.nii` extension (case-insensitive).
pub fn nifti_stem(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    for extension in [".nii.gz", ".nii"] {
        if lower.ends_with(extension) {
            return &file_name[..file_name.len() - extension.len()];
        }
    }
    file_name
}

pub fn is_nifti_name(file_name: &str) -> bool {
    nifti_stem(file_name).len() != file_name.len()
}

/// Name of a volume after it has been resampled into the T1 space.
pub fn space_t1_name(file_name: &str) -> String {
    format!("{}_space-T1.nii.gz", nifti_stem(file_name))
}

/// `<dir>/<stem><suffix>` for a NIfTI input, e.g. the `_synthseg.nii.gz` derivative.
pub fn derived_path(dir: &Path, source: &Path, suffix: &str) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!("{}{}", nifti_stem(&file_name), suffix))
}

/// Path relative to `base` when it lives below it, otherwise the path as given.
pub fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nifti_stem_strips_both_extensions_case_insensitively() {
        assert_eq!(nifti_stem("sub-A_preop_T1w.nii.gz"), "sub-A_preop_T1w");
        assert_eq!(nifti_stem("sub-A_preop_T1w.NII"), "sub-A_preop_T1w");
        assert_eq!(nifti_stem("notes.json"), "notes.json");
        assert!(!is_nifti_name("notes.json"));
    }

    #[test]
    fn write_atomic_replaces_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.txt");

        write_atomic(&path, b"first").expect("first write");
        write_atomic(&path, b"second").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!dir.path().join("nested").join(".out.txt.tmp").exists());
    }

    #[test]
    fn display_relative_strips_base() {
        let base = Path::new("/data/out");
        assert_eq!(
            display_relative(Path::new("/data/out/qc_images/a.png"), base),
            "qc_images/a.png"
        );
        assert_eq!(display_relative(Path::new("/elsewhere/a.png"), base), "/elsewhere/a.png");
    }
}
