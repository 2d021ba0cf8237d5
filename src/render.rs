//! PNG slice montages for visual QC.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use ndarray::{Array3, Axis};
use tracing::warn;

use crate::util::ensure_directory;
use crate::volume::{load_labels, load_volume};

pub const MONTAGE_OFFSETS: [isize; 4] = [-20, -10, 10, 20];
pub const OVERLAY_OFFSETS: [isize; 3] = [-3, 0, 3];
const OVERLAY_ALPHA: f32 = 0.3;
const LOWER_PERCENTILE: f32 = 0.5;
const UPPER_PERCENTILE: f32 = 99.5;

const PALETTE: [[u8; 3]; 10] = [
    [255, 0, 0],
    [0, 205, 0],
    [0, 0, 255],
    [0, 255, 255],
    [255, 0, 255],
    [255, 127, 0],
    [0, 100, 0],
    [138, 43, 226],
    [139, 99, 71],
    [0, 0, 128],
];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Plane {
    Sagittal,
    Coronal,
}

impl Plane {
    pub const BOTH: [Plane; 2] = [Plane::Sagittal, Plane::Coronal];

    fn axis(self) -> usize {
        match self {
            Self::Sagittal => 0,
            Self::Coronal => 1,
        }
    }

    pub fn file_tag(self) -> &'static str {
        match self {
            Self::Sagittal => "sagittal",
            Self::Coronal => "coronal",
        }
    }

    pub fn caption(self) -> &'static str {
        match self {
            Self::Sagittal => "Sagittal",
            Self::Coronal => "Coronal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub plane: Plane,
    pub path: PathBuf,
}

/// Intensity window mapping voxel values onto 0..=255.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub low: f32,
    pub high: f32,
}

impl Window {
    pub fn from_volume(volume: &Array3<f32>) -> Self {
        let mut values: Vec<f32> = volume.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return Self { low: 0.0, high: 1.0 };
        }
        values.sort_by(f32::total_cmp);

        let low = percentile(&values, LOWER_PERCENTILE);
        let mut high = percentile(&values, UPPER_PERCENTILE);
        if high <= low {
            high = low + 1.0;
        }
        Self { low, high }
    }

    pub fn grey(&self, value: f32) -> u8 {
        if !value.is_finite() {
            return 0;
        }
        let scaled = ((value - self.low) / (self.high - self.low)).clamp(0.0, 1.0);
        (scaled * 255.0).round() as u8
    }
}

fn percentile(sorted: &[f32], percent: f32) -> f32 {
    let rank = (percent / 100.0) * (sorted.len() - 1) as f32;
    sorted[rank.round() as usize]
}

pub fn clamp_index(centre: usize, offset: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let target = centre as isize + offset;
    target.clamp(0, len as isize - 1) as usize
}

/// Per axis, the slice holding the most labelled voxels; the first maximum wins
/// and an empty segmentation falls back to the mid-slice.
pub fn focal_slices(labels: &Array3<i32>) -> [usize; 3] {
    let mut focal = [0; 3];
    for (axis, slot) in focal.iter_mut().enumerate() {
        let len = labels.len_of(Axis(axis));
        let mut best = None;
        let mut best_count = 0;
        for index in 0..len {
            let count = labels
                .index_axis(Axis(axis), index)
                .iter()
                .filter(|label| **label != 0)
                .count();
            if count > best_count {
                best_count = count;
                best = Some(index);
            }
        }
        *slot = best.unwrap_or(len / 2);
    }
    focal
}

pub fn label_colour(label: i32) -> [u8; 3] {
    let index = (label.unsigned_abs() as usize).saturating_sub(1) % PALETTE.len();
    PALETTE[index]
}

#[derive(Debug, Clone)]
pub struct Renderer {
    scale: u32,
}

impl Renderer {
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
        }
    }

    /// Writes `<case>_<label>_sagittal.png` and `<case>_<label>_coronal.png`.
    pub fn render_modality(
        &self,
        volume_path: &Path,
        out_dir: &Path,
        case: &str,
        label: &str,
    ) -> Result<Vec<RenderedImage>> {
        let volume = load_volume(volume_path)?;
        let window = Window::from_volume(&volume);
        ensure_directory(out_dir)?;

        let mut rendered = Vec::new();
        for plane in Plane::BOTH {
            let len = volume.len_of(Axis(plane.axis()));
            let mid = len / 2;
            let row: Vec<RgbImage> = MONTAGE_OFFSETS
                .iter()
                .map(|offset| {
                    let index = clamp_index(mid, *offset, len);
                    self.panel(&volume, None, plane, index, &window)
                })
                .collect();

            let path = out_dir.join(format!("{case}_{label}_{}.png", plane.file_tag()));
            save_png(&compose(&[row]), &path)?;
            rendered.push(RenderedImage { plane, path });
        }
        Ok(rendered)
    }

    /// Writes `<case>_segment_overlay_<plane>.png` with rows T1, T1 + labels and,
    /// when given, post-op and post-op + labels.
    pub fn render_overlay(
        &self,
        t1_path: &Path,
        postop_path: Option<&Path>,
        labels_path: &Path,
        out_dir: &Path,
        case: &str,
    ) -> Result<Vec<RenderedImage>> {
        let t1 = load_volume(t1_path)?;
        let labels = load_labels(labels_path)?;
        if t1.dim() != labels.dim() {
            warn!(
                t1 = %t1_path.display(),
                labels = %labels_path.display(),
                t1_shape = ?t1.dim(),
                label_shape = ?labels.dim(),
                "label volume shape differs from T1; overlay may be misaligned"
            );
        }
        let postop = postop_path.map(load_volume).transpose()?;

        let mut backgrounds = vec![(&t1, Window::from_volume(&t1))];
        if let Some(postop) = postop.as_ref() {
            backgrounds.push((postop, Window::from_volume(postop)));
        }

        ensure_directory(out_dir)?;
        let focal = focal_slices(&labels);

        let mut rendered = Vec::new();
        for plane in Plane::BOTH {
            let mut grid: Vec<Vec<RgbImage>> = Vec::new();
            for (volume, window) in &backgrounds {
                let len = volume.len_of(Axis(plane.axis()));
                let indices: Vec<usize> = OVERLAY_OFFSETS
                    .iter()
                    .map(|offset| clamp_index(focal[plane.axis()], *offset, len))
                    .collect();

                grid.push(
                    indices
                        .iter()
                        .map(|index| self.panel(volume, None, plane, *index, window))
                        .collect(),
                );
                grid.push(
                    indices
                        .iter()
                        .map(|index| self.panel(volume, Some(&labels), plane, *index, window))
                        .collect(),
                );
            }

            let path = out_dir.join(format!("{case}_segment_overlay_{}.png", plane.file_tag()));
            save_png(&compose(&grid), &path)?;
            rendered.push(RenderedImage { plane, path });
        }
        Ok(rendered)
    }

    fn panel(
        &self,
        volume: &Array3<f32>,
        labels: Option<&Array3<i32>>,
        plane: Plane,
        index: usize,
        window: &Window,
    ) -> RgbImage {
        let (nx, ny, nz) = volume.dim();
        let width = match plane {
            Plane::Sagittal => ny,
            Plane::Coronal => nx,
        } as u32;
        let height = nz as u32;

        let mut panel = RgbImage::new(width.max(1), height.max(1));
        for column in 0..width as usize {
            for z in 0..nz {
                let voxel = match plane {
                    Plane::Sagittal => [index, column, z],
                    Plane::Coronal => [column, index, z],
                };
                let grey = window.grey(volume[voxel]);
                let mut colour = [grey; 3];

                if let Some(labels) = labels {
                    let label = labels.get(voxel).copied().unwrap_or(0);
                    if label != 0 {
                        let overlay = label_colour(label);
                        for (channel, tint) in colour.iter_mut().zip(overlay) {
                            *channel = blend(*channel, tint);
                        }
                    }
                }

                // Superior at the top of the image.
                let row = height as usize - 1 - z;
                panel.put_pixel(column as u32, row as u32, Rgb(colour));
            }
        }

        if self.scale == 1 {
            return panel;
        }
        imageops::resize(
            &panel,
            panel.width() * self.scale,
            panel.height() * self.scale,
            FilterType::Nearest,
        )
    }
}

fn blend(base: u8, tint: u8) -> u8 {
    let mixed = f32::from(base) * (1.0 - OVERLAY_ALPHA) + f32::from(tint) * OVERLAY_ALPHA;
    mixed.round() as u8
}

/// Lays panels out row by row on a black canvas sized to the largest panel.
pub fn compose(rows: &[Vec<RgbImage>]) -> RgbImage {
    let cell_width = rows
        .iter()
        .flatten()
        .map(RgbImage::width)
        .max()
        .unwrap_or(1);
    let cell_height = rows
        .iter()
        .flatten()
        .map(RgbImage::height)
        .max()
        .unwrap_or(1);
    let columns = rows.iter().map(Vec::len).max().unwrap_or(1).max(1) as u32;

    let mut canvas = RgbImage::new(cell_width * columns, cell_height * rows.len().max(1) as u32);
    for (row_index, row) in rows.iter().enumerate() {
        for (column_index, panel) in row.iter().enumerate() {
            imageops::replace(
                &mut canvas,
                panel,
                i64::from(column_index as u32 * cell_width),
                i64::from(row_index as u32 * cell_height),
            );
        }
    }
    canvas
}

fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
