use std::path::Path;

use anyhow::{Context, Result, bail};
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

/// Spatial extent from a header, trailing singleton axes dropped.
pub fn header_dims(header: &NiftiHeader) -> Vec<usize> {
    let rank = usize::from(header.dim[0]).min(7);
    let mut dims: Vec<usize> = header.dim[1..=rank]
        .iter()
        .map(|&extent| usize::from(extent))
        .collect();
    while dims.len() > 1 && dims.last() == Some(&1) {
        dims.pop();
    }
    dims
}

pub fn read_header(path: &Path) -> Result<NiftiHeader> {
    NiftiHeader::from_file(path)
        .with_context(|| format!("failed to read NIfTI header: {}", path.display()))
}

pub fn spatial_rank(path: &Path) -> Result<usize> {
    Ok(header_dims(&read_header(path)?).len())
}

pub fn is_three_dimensional(path: &Path) -> Result<bool> {
    Ok(spatial_rank(path)? == 3)
}

/// Output check used before a step is marked complete.
pub fn validate_nifti(path: &Path) -> Result<()> {
    let metadata = path
        .metadata()
        .with_context(|| format!("expected output is missing: {}", path.display()))?;
    if metadata.len() == 0 {
        bail!("output is empty: {}", path.display());
    }

    let dims = header_dims(&read_header(path)?);
    if dims.iter().any(|&extent| extent == 0) {
        bail!("output has an empty axis {:?}: {}", dims, path.display());
    }
    Ok(())
}

/// Loads a volume as `[x, y, z]`. 4D series keep their first frame.
pub fn load_volume(path: &Path) -> Result<Array3<f32>> {
    let object = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("failed to read NIfTI volume: {}", path.display()))?;
    let data: ArrayD<f32> = object
        .into_volume()
        .into_ndarray::<f32>()
        .with_context(|| format!("failed to decode voxel data: {}", path.display()))?;

    to_three_dimensions(data).with_context(|| format!("unsupported volume: {}", path.display()))
}

pub fn load_labels(path: &Path) -> Result<Array3<i32>> {
    Ok(load_volume(path)?.mapv(|value| value.round() as i32))
}

fn to_three_dimensions(mut data: ArrayD<f32>) -> Result<Array3<f32>> {
    while data.ndim() > 3 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    if data.ndim() != 3 {
        bail!("expected at least three spatial axes, found {}", data.ndim());
    }

    data.into_dimensionality::<Ix3>()
        .context("failed to reshape voxel data")
}


#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::fixtures::{gradient, write_volume};
    use super::*;

    #[test]
    fn three_dimensional_volume_passes_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t1.nii.gz");
        write_volume(&path, &gradient((6, 5, 4)));

        assert!(is_three_dimensional(&path).expect("header"));
        validate_nifti(&path).expect("valid output");

        let volume = load_volume(&path).expect("volume");
        assert_eq!(volume.dim(), (6, 5, 4));
        assert_eq!(volume[[1, 1, 1]], 6.0);
    }

    #[test]
    fn four_dimensional_series_is_not_three_dimensional() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dwi.nii.gz");
        let series = Array4::<f32>::from_elem((4, 4, 3, 2), 1.0);
        write_volume(&path, &series);

        assert_eq!(spatial_rank(&path).expect("header"), 4);
        assert!(!is_three_dimensional(&path).expect("header"));
        assert_eq!(load_volume(&path).expect("first frame").dim(), (4, 4, 3));
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.nii.gz");
        std::fs::write(&path, b"").expect("write");

        assert!(validate_nifti(&path).is_err());
    }
}
