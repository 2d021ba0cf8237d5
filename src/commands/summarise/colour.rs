use crate::model::Modality;

use super::mri::{MASK_INCORRECT, MASK_MISSING, MASK_REQUIRED};
use super::workbook::SummaryRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowColour {
    Yellow,
    LightCoral,
    LightGreen,
}

impl RowColour {
    pub fn rgb(self) -> u32 {
        match self {
            Self::Yellow => 0xFFFF00,
            Self::LightCoral => 0xF08080,
            Self::LightGreen => 0x90EE90,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Yellow => "yellow",
            Self::LightCoral => "lightcoral",
            Self::LightGreen => "lightgreen",
        }
    }
}

/// Yellow needs site follow-up, light coral blocks inclusion, green is ready.
/// The first matching rule wins.
pub fn row_colour(row: &SummaryRow) -> RowColour {
    if row.demographic_qc == 0 {
        return RowColour::Yellow;
    }
    if row.mri.usable(Modality::T1Preop) == Some(0) || !row.mri.complete {
        return RowColour::LightCoral;
    }
    match row.mri.mask_qc {
        Some(MASK_INCORRECT) | Some(MASK_REQUIRED) => return RowColour::LightCoral,
        Some(MASK_MISSING) => return RowColour::Yellow,
        _ => {}
    }
    let secondary_discarded = [Modality::FlairPreop, Modality::T2Preop, Modality::T1Postop]
        .into_iter()
        .any(|modality| row.mri.usable(modality) == Some(0));
    if secondary_discarded {
        RowColour::Yellow
    } else {
        RowColour::LightGreen
    }
}
