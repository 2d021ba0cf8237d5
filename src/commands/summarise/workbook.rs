use std::path::Path;

use anyhow::{Context, Result, anyhow};
use rust_xlsxwriter::{Color, Format, Workbook};

use crate::util::{ensure_directory, write_atomic};

use super::colour::row_colour;
use super::mri::{MriAssessment, SUMMARY_MODALITIES};

pub const SUMMARY_HEADERS: [&str; 12] = [
    "study ID",
    "original ID given by site",
    "site",
    "demographic QC (1= complete)",
    "notes demographic QC",
    "MRI QC (1=complete)",
    "T1-Preop QC (0=to discard, 1=usable)",
    "FLAIR QC (0=to discard, 1=usable)",
    "T2 QC (0=to discard, 1=usable)",
    "T1-Postop QC (0=to discard, 1=usable)",
    "mask QC ( 0=not correct, 1=correct , 2= seem correct but no postop to check, 3= mask missing, 4=mask required, 5=mask is resection cavity)",
    "notes MRI QC",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub study_id: String,
    pub original_id: String,
    pub site: String,
    pub demographic_qc: u8,
    pub demographic_notes: String,
    pub mri: MriAssessment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Code(u8),
    Empty,
}

impl Cell {
    fn optional(code: Option<u8>) -> Self {
        code.map(Cell::Code).unwrap_or(Cell::Empty)
    }

    fn to_csv(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Code(code) => code.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

impl SummaryRow {
    pub fn cells(&self) -> Vec<Cell> {
        let mut cells = vec![
            Cell::Text(self.study_id.clone()),
            Cell::Text(self.original_id.clone()),
            Cell::Text(self.site.clone()),
            Cell::Code(self.demographic_qc),
            Cell::Text(self.demographic_notes.clone()),
            Cell::Code(u8::from(self.mri.complete)),
        ];
        cells.extend(
            SUMMARY_MODALITIES
                .iter()
                .map(|modality| Cell::optional(self.mri.usable(*modality))),
        );
        cells.push(Cell::optional(self.mri.mask_qc));
        cells.push(Cell::Text(self.mri.notes_text()));
        cells
    }
}

pub fn write_summary_csv(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(SUMMARY_HEADERS)
        .context("failed to encode summary header")?;
    for row in rows {
        writer
            .write_record(row.cells().iter().map(Cell::to_csv))
            .with_context(|| format!("failed to encode summary row for {}", row.study_id))?;
    }
    let data = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush summary csv: {err}"))?;
    write_atomic(path, &data)
}

/// Same table as the CSV, every data row filled with its decision colour.
pub fn write_summary_xlsx(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let header = Format::new().set_bold();
    for (col, title) in SUMMARY_HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    for (index, row) in rows.iter().enumerate() {
        let line = index as u32 + 1;
        let fill = Format::new().set_background_color(Color::RGB(row_colour(row).rgb()));
        for (col, cell) in row.cells().iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => {
                    worksheet.write_string_with_format(line, col, text, &fill)?;
                }
                Cell::Code(code) => {
                    worksheet.write_number_with_format(line, col, f64::from(*code), &fill)?;
                }
                Cell::Empty => {
                    worksheet.write_blank(line, col, &fill)?;
                }
            }
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("failed to save workbook {}", path.display()))
}
