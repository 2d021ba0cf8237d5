use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::model::Modality;

/// Pipeline settings. Every field has a default so a JSON profile only needs
/// to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub suffixes: SuffixTable,
    /// Lesion mask was drawn on the FLAIR and must follow its transform.
    pub mask_in_flair: bool,
    pub transform: TransformKind,
    pub affine_only: bool,
    pub matrix_file_name: String,
    pub markdown_title: String,
    pub markdown_file_name: String,
    pub html_file_name: String,
    pub image_dir_name: String,
    pub panel_scale: u32,
    pub tools: ToolConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            suffixes: SuffixTable::default(),
            mask_in_flair: false,
            transform: TransformKind::Rigid,
            affine_only: false,
            matrix_file_name: "matrix.csv".to_string(),
            markdown_title: "MELD_QC".to_string(),
            markdown_file_name: "image_gallery.md".to_string(),
            html_file_name: "image_gallery.html".to_string(),
            image_dir_name: "qc_images".to_string(),
            panel_scale: 2,
            tools: ToolConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuffixTable {
    pub t1_preop: String,
    pub flair_preop: String,
    pub t2_preop: String,
    pub t1_postop: String,
    pub lesion_mask: String,
    pub dwi_preop: String,
    pub dwi_neg_pe_preop: String,
}

impl Default for SuffixTable {
    fn default() -> Self {
        Self {
            t1_preop: "_preop_T1w.nii.gz".to_string(),
            flair_preop: "_preop_FLAIR.nii.gz".to_string(),
            t2_preop: "_preop_T2w.nii.gz".to_string(),
            t1_postop: "_postop_T1w.nii.gz".to_string(),
            lesion_mask: "_lesion_mask.nii.gz".to_string(),
            dwi_preop: "_preop_DWI.nii.gz".to_string(),
            dwi_neg_pe_preop: "_preop_DWInegPE.nii.gz".to_string(),
        }
    }
}

impl SuffixTable {
    pub fn suffix_for(&self, modality: Modality) -> &str {
        match modality {
            Modality::T1Preop => &self.t1_preop,
            Modality::FlairPreop => &self.flair_preop,
            Modality::T2Preop => &self.t2_preop,
            Modality::T1Postop => &self.t1_postop,
            Modality::LesionMask => &self.lesion_mask,
            Modality::DwiPreop => &self.dwi_preop,
            Modality::DwiNegPePreop => &self.dwi_neg_pe_preop,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Rigid,
    Affine,
    Syn,
}

impl TransformKind {
    /// Transform flag understood by `antsRegistrationSyNQuick.sh -t`.
    pub fn ants_flag(self) -> &'static str {
        match self {
            Self::Rigid => "r",
            Self::Affine => "a",
            Self::Syn => "s",
        }
    }

    pub fn has_warp_field(self) -> bool {
        matches!(self, Self::Syn)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub ants_registration: String,
    pub ants_apply_transforms: String,
    pub synthsr: String,
    pub synthseg: String,
    pub easyreg: String,
    pub easywarp: String,
    pub label2vol: String,
    pub n4_bias_correction: String,
    pub bet: String,
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ants_registration: "antsRegistrationSyNQuick.sh".to_string(),
            ants_apply_transforms: "antsApplyTransforms".to_string(),
            synthsr: "mri_synthsr".to_string(),
            synthseg: "mri_synthseg".to_string(),
            easyreg: "mri_easyreg".to_string(),
            easywarp: "mri_easywarp".to_string(),
            label2vol: "mri_label2vol".to_string(),
            n4_bias_correction: "N4BiasFieldCorrection".to_string(),
            bet: "bet".to_string(),
            timeout_secs: 2 * 60 * 60,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_profile_keeps_defaults_for_missing_fields() {
        let raw = r#"{ "mask_in_flair": true, "suffixes": { "t2_preop": "_T2.nii.gz" }, "tools": { "timeout_secs": 30 } }"#;
        let config: PipelineConfig = serde_json::from_str(raw).expect("profile should parse");

        assert!(config.mask_in_flair);
        assert_eq!(config.suffixes.t2_preop, "_T2.nii.gz");
        assert_eq!(config.suffixes.t1_preop, "_preop_T1w.nii.gz");
        assert_eq!(config.tools.timeout(), Duration::from_secs(30));
        assert_eq!(config.tools.synthseg, "mri_synthseg");
        assert_eq!(config.matrix_file_name, "matrix.csv");
    }

    #[test]
    fn transform_kind_maps_to_ants_flags() {
        let kind: TransformKind = serde_json::from_str("\"syn\"").expect("kind");
        assert_eq!(kind.ants_flag(), "s");
        assert!(kind.has_warp_field());
        assert_eq!(TransformKind::Rigid.ants_flag(), "r");
    }
}
