use std::collections::BTreeMap;

use crate::case_id::compact_id;
use crate::matrix::{ModalityQc, QcMatrix, parse_code};
use crate::model::Modality;

/// Modalities whose usability is reported in the site summary.
pub const SUMMARY_MODALITIES: [Modality; 4] = [
    Modality::T1Preop,
    Modality::FlairPreop,
    Modality::T2Preop,
    Modality::T1Postop,
];

pub const MASK_INCORRECT: u8 = 0;
pub const MASK_CORRECT: u8 = 1;
pub const MASK_NO_POSTOP_CHECK: u8 = 2;
pub const MASK_MISSING: u8 = 3;
pub const MASK_REQUIRED: u8 = 4;
pub const MASK_RESECTION_CAVITY: u8 = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MriAssessment {
    pub complete: bool,
    /// 1 usable, 0 to discard; absent when the modality was not provided.
    pub usability: BTreeMap<Modality, u8>,
    pub mask_qc: Option<u8>,
    pub notes: Vec<String>,
}

impl MriAssessment {
    pub fn incomplete(note: impl Into<String>) -> Self {
        Self {
            notes: vec![note.into()],
            ..Self::default()
        }
    }

    pub fn usable(&self, modality: Modality) -> Option<u8> {
        self.usability.get(&modality).copied()
    }

    pub fn notes_text(&self) -> String {
        self.notes.join(";")
    }
}

/// Reviews the hand-filled matrix row of one subject.
pub fn assess_subject(matrix: &QcMatrix, study_id: &str, need_mask: Option<u8>) -> MriAssessment {
    let Some(row) = matrix.find(&compact_id(study_id)) else {
        return MriAssessment::incomplete("QC not done or have failed");
    };
    let reviewed = row
        .modality(Modality::T1Preop)
        .is_some_and(|qc| !qc.correct_modality.trim().is_empty());
    if !reviewed {
        return MriAssessment::incomplete("QC not done");
    }

    let mut assessment = MriAssessment {
        complete: true,
        ..MriAssessment::default()
    };
    for modality in SUMMARY_MODALITIES {
        let Some(qc) = row.modality(modality).filter(|qc| qc.present) else {
            continue;
        };
        let label = modality.matrix_label();
        match check_modality(qc, label) {
            ModalityVerdict::Usable => {
                assessment.usability.insert(modality, 1);
            }
            ModalityVerdict::Discard(errors) => {
                assessment.usability.insert(modality, 0);
                assessment.notes.push(errors);
            }
            ModalityVerdict::NotReviewed => {
                assessment
                    .notes
                    .push(format!("{label} scan present but not QCed"));
            }
        }
    }

    if row.mask_present {
        let (code, note) = match parse_code(&row.mask_qc) {
            None => (MASK_INCORRECT, Some("mask present but not QCed")),
            Some(1) => (MASK_CORRECT, None),
            Some(2) => (MASK_NO_POSTOP_CHECK, None),
            Some(6) => (MASK_RESECTION_CAVITY, Some("mask is resection cavity")),
            Some(_) => (MASK_INCORRECT, Some("Error with mask")),
        };
        assessment.mask_qc = Some(code);
        assessment.notes.extend(note.map(str::to_string));
    } else if need_mask == Some(1) {
        if assessment.usable(Modality::T1Postop) == Some(1) {
            assessment.mask_qc = Some(MASK_MISSING);
            assessment.notes.push(
                "mask missing. If not provided, postop will be used as ground truth, but for evaluation only"
                    .to_string(),
            );
        } else {
            assessment.mask_qc = Some(MASK_REQUIRED);
            assessment.notes.push(
                "mask needed. Patient cannot be included as no ground truth is provided"
                    .to_string(),
            );
        }
    }

    assessment
}

#[derive(Debug, PartialEq)]
enum ModalityVerdict {
    Usable,
    Discard(String),
    NotReviewed,
}

fn check_modality(qc: &ModalityQc, label: &str) -> ModalityVerdict {
    let Some(correct) = parse_code(&qc.correct_modality) else {
        return ModalityVerdict::NotReviewed;
    };

    let problem = match correct {
        2 => Some("not the right modality"),
        3 => Some("contrast agent"),
        4 => Some("possible previous resection"),
        5 => Some("cannot see resection"),
        6 => Some("problem with opening file"),
        _ => None,
    };
    if let Some(problem) = problem {
        return ModalityVerdict::Discard(format!("Error with {label} scan: {problem};"));
    }
    if correct != 1 {
        return ModalityVerdict::Usable;
    }

    let mut errors = String::new();
    if parse_code(&qc.artefact) == Some(3) {
        errors.push_str(&format!("Strong artefact on {label};"));
    }
    match parse_code(&qc.defacing) {
        Some(2) => errors.push_str(&format!("Defacing error: Face remaining on {label};")),
        Some(code) if code > 2 => {
            errors.push_str(&format!("Defacing error: Part of brain removed on {label};"))
        }
        _ => {}
    }

    if errors.is_empty() {
        ModalityVerdict::Usable
    } else {
        ModalityVerdict::Discard(errors)
    }
}
