use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::case_id::CaseId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    T1Preop,
    FlairPreop,
    T2Preop,
    T1Postop,
    LesionMask,
    DwiPreop,
    DwiNegPePreop,
}

impl Modality {
    pub const ALL: [Modality; 7] = [
        Modality::T1Preop,
        Modality::FlairPreop,
        Modality::T2Preop,
        Modality::T1Postop,
        Modality::LesionMask,
        Modality::DwiPreop,
        Modality::DwiNegPePreop,
    ];

    /// Modalities registered onto the pre-operative T1.
    pub const MOVING: [Modality; 5] = [
        Modality::FlairPreop,
        Modality::T2Preop,
        Modality::T1Postop,
        Modality::DwiPreop,
        Modality::DwiNegPePreop,
    ];

    pub fn subfolder(self) -> &'static str {
        match self {
            Self::DwiPreop | Self::DwiNegPePreop => "dwi",
            _ => "anat",
        }
    }

    /// Column prefix in the QC matrix.
    pub fn matrix_label(self) -> &'static str {
        match self {
            Self::T1Preop => "T1-Preop",
            Self::FlairPreop => "FLAIR",
            Self::T2Preop => "T2",
            Self::T1Postop => "T1-Postop",
            Self::LesionMask => "Mask",
            Self::DwiPreop => "DWI-Preop",
            Self::DwiNegPePreop => "DWInegPE-Preop",
        }
    }

    /// Tag used in QC image file names and gallery captions.
    pub fn image_label(self) -> &'static str {
        match self {
            Self::T1Preop => "T1",
            Self::FlairPreop => "FLAIR",
            Self::T2Preop => "T2",
            Self::T1Postop => "T1-postop",
            Self::LesionMask => "mask",
            Self::DwiPreop => "preop_dwi",
            Self::DwiNegPePreop => "preop_DWInegPE",
        }
    }
}

/// At most one source file per modality slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModalityPaths {
    paths: BTreeMap<Modality, PathBuf>,
}

impl ModalityPaths {
    pub fn get(&self, modality: Modality) -> Option<&Path> {
        self.paths.get(&modality).map(PathBuf::as_path)
    }

    pub fn is_present(&self, modality: Modality) -> bool {
        self.paths.contains_key(&modality)
    }

    pub fn insert(&mut self, modality: Modality, path: PathBuf) -> Option<PathBuf> {
        self.paths.insert(modality, path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiceSummary {
    pub scores: Vec<f64>,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationStatus {
    NotPresent,
    Unregistered {
        reason: String,
    },
    Registered {
        warped: PathBuf,
        dice: Option<DiceSummary>,
    },
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }

    pub fn warped(&self) -> Option<&Path> {
        match self {
            Self::Registered { warped, .. } => Some(warped),
            _ => None,
        }
    }

    pub fn dice(&self) -> Option<&DiceSummary> {
        match self {
            Self::Registered { dice, .. } => dice.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryImage {
    pub description: String,
    pub path: String,
}

/// Everything one pass over a case produced. Built fresh for every case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case: CaseId,
    pub paths: ModalityPaths,
    /// Slots with a matching file, filled even when resolution fails.
    pub present: BTreeSet<Modality>,
    pub outcomes: BTreeMap<Modality, RegistrationStatus>,
    /// Lesion mask copied or warped into T1 space.
    pub mask_in_t1: Option<PathBuf>,
    pub images: Vec<GalleryImage>,
    pub warnings: Vec<String>,
    pub failure: Option<String>,
}

impl CaseReport {
    pub fn new(case: CaseId) -> Self {
        Self {
            case,
            paths: ModalityPaths::default(),
            present: BTreeSet::new(),
            outcomes: BTreeMap::new(),
            mask_in_t1: None,
            images: Vec::new(),
            warnings: Vec::new(),
            failure: None,
        }
    }

    pub fn is_present(&self, modality: Modality) -> bool {
        self.paths.is_present(modality) || self.present.contains(&modality)
    }

    pub fn outcome(&self, modality: Modality) -> &RegistrationStatus {
        self.outcomes
            .get(&modality)
            .unwrap_or(&RegistrationStatus::NotPresent)
    }

    pub fn registered_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|status| status.is_registered())
            .count()
    }

    pub fn unregistered_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|status| matches!(status, RegistrationStatus::Unregistered { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolVersions {
    pub ants_registration: Option<String>,
    pub ants_apply_transforms: Option<String>,
    pub synthseg: Option<String>,
    pub easyreg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPaths {
    pub bids_root: String,
    pub save_dir: String,
    pub matrix_path: String,
    pub markdown_path: String,
    pub html_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegisterCounts {
    pub case_count: usize,
    pub processed_case_count: usize,
    pub skipped_case_count: usize,
    pub failed_case_count: usize,
    pub registered_modality_count: usize,
    pub unregistered_modality_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseFailure {
    pub case: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub method: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub tool_versions: ToolVersions,
    pub paths: RegisterPaths,
    pub counts: RegisterCounts,
    pub failures: Vec<CaseFailure>,
    pub warnings: Vec<String>,
}

/// Written into the output case folder once a case has been fully processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseCompletion {
    pub case: String,
    pub completed_at: String,
    pub registered: Vec<Modality>,
    pub unregistered: Vec<Modality>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryFile {
    pub modality: Modality,
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub case: String,
    pub files: Vec<InventoryFile>,
    pub missing: Vec<Modality>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub case_count: usize,
    pub cases: Vec<InventoryEntry>,
}
