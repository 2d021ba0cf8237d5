use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::{Map, Value};

use crate::util::{copy_file, nifti_stem, write_json_pretty};

pub const SPATIAL_REFERENCE: &str = "SpatialReference";

/// `<stem>.json` next to a NIfTI file.
pub fn sidecar_for(volume: &Path) -> PathBuf {
    let file_name = volume
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    volume.with_file_name(format!("{}.json", nifti_stem(&file_name)))
}

/// Copies the source sidecar to the destination, recording the fixed image
/// the volume now lives in. A missing or unreadable source starts a new object.
pub fn write_spatial_reference(source: &Path, destination: &Path, fixed: &Path) -> Result<()> {
    let mut fields = fs::read(source)
        .ok()
        .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_else(Map::new);

    fields.insert(
        SPATIAL_REFERENCE.to_string(),
        Value::String(fixed.display().to_string()),
    );
    write_json_pretty(destination, &Value::Object(fields))
}

/// Returns whether a sidecar existed to copy.
pub fn copy_sidecar(source_volume: &Path, destination_volume: &Path) -> Result<bool> {
    let source = sidecar_for(source_volume);
    if !source.is_file() {
        return Ok(false);
    }
    copy_file(&source, &sidecar_for(destination_volume))?;
    Ok(true)
}
