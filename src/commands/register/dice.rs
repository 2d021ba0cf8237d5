use std::collections::BTreeMap;

use anyhow::{Result, bail};
use ndarray::Array3;

use crate::model::DiceSummary;

#[derive(Default)]
struct LabelCounts {
    fixed: u64,
    moving: u64,
    overlap: u64,
}

/// Dice per non-background label of `fixed`, in label order, rounded to 3 dp.
pub fn dice_scores(fixed: &Array3<i32>, moving: &Array3<i32>) -> Result<Vec<(i32, f64)>> {
    if fixed.dim() != moving.dim() {
        bail!(
            "segmentation shapes differ: {:?} vs {:?}",
            fixed.dim(),
            moving.dim()
        );
    }

    let mut counts: BTreeMap<i32, LabelCounts> = BTreeMap::new();
    for (&reference, &warped) in fixed.iter().zip(moving.iter()) {
        if reference != 0 {
            let entry = counts.entry(reference).or_default();
            entry.fixed += 1;
            if warped == reference {
                entry.overlap += 1;
            }
        }
        if warped != 0 {
            counts.entry(warped).or_default().moving += 1;
        }
    }

    let scores: Vec<(i32, f64)> = counts
        .into_iter()
        .filter(|(_, count)| count.fixed > 0)
        .map(|(label, count)| {
            let dice = 2.0 * count.overlap as f64 / (count.fixed + count.moving) as f64;
            (label, round3(dice))
        })
        .collect();

    if scores.is_empty() {
        bail!("reference segmentation has no foreground labels");
    }
    Ok(scores)
}

/// Mean and population standard deviation of the rounded per-label scores.
pub fn dice_summary(fixed: &Array3<i32>, moving: &Array3<i32>) -> Result<DiceSummary> {
    let scores: Vec<f64> = dice_scores(fixed, moving)?
        .into_iter()
        .map(|(_, score)| score)
        .collect();

    let count = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / count;
    let variance = scores.iter().map(|score| (score - mean).powi(2)).sum::<f64>() / count;

    Ok(DiceSummary {
        mean: round3(mean),
        std: round3(variance.sqrt()),
        scores,
    })
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
