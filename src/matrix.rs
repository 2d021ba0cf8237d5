use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::model::{CaseReport, Modality};
use crate::util::write_atomic;

/// Modalities that get a column group in the QC matrix, in column order.
pub const MATRIX_MODALITIES: [Modality; 6] = [
    Modality::T1Preop,
    Modality::FlairPreop,
    Modality::T2Preop,
    Modality::T1Postop,
    Modality::DwiPreop,
    Modality::DwiNegPePreop,
];

const SUBJECT: &str = "Subject";
const MASK_PRESENT: &str = "Mask Present";
const MASK_QC: &str = "Mask QC";

/// Per-modality cells. Manual judgments are kept verbatim so a reviewer's
/// entries survive a rewrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModalityQc {
    pub present: bool,
    pub registered: bool,
    pub correct_modality: String,
    pub artefact: String,
    pub fov: String,
    pub defacing: String,
    pub dice_mean: Option<f64>,
    pub dice_std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub subject: String,
    pub modalities: BTreeMap<Modality, ModalityQc>,
    pub mask_present: bool,
    pub mask_qc: String,
}

impl MatrixRow {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            modalities: MATRIX_MODALITIES
                .iter()
                .map(|modality| (*modality, ModalityQc::default()))
                .collect(),
            mask_present: false,
            mask_qc: String::new(),
        }
    }

    /// Presence, registration and Dice columns derived from a processed case.
    pub fn from_report(report: &CaseReport) -> Self {
        let mut row = Self::new(report.case.as_str());
        for modality in MATRIX_MODALITIES {
            let qc = row.modalities.entry(modality).or_default();
            qc.present = report.is_present(modality);
            let outcome = report.outcome(modality);
            qc.registered = modality != Modality::T1Preop && outcome.is_registered();
            if let Some(dice) = outcome.dice() {
                qc.dice_mean = Some(dice.mean);
                qc.dice_std = Some(dice.std);
            }
        }
        row.mask_present = report.is_present(Modality::LesionMask);
        row
    }

    pub fn modality(&self, modality: Modality) -> Option<&ModalityQc> {
        self.modalities.get(&modality)
    }

    fn carry_manual_fields(&mut self, previous: &MatrixRow) {
        for (modality, qc) in &mut self.modalities {
            if let Some(old) = previous.modalities.get(modality) {
                qc.correct_modality = old.correct_modality.clone();
                qc.artefact = old.artefact.clone();
                qc.fov = old.fov.clone();
                qc.defacing = old.defacing.clone();
            }
        }
        self.mask_qc = previous.mask_qc.clone();
    }

    fn to_record(&self) -> Vec<String> {
        let mut record = vec![self.subject.clone()];
        for modality in MATRIX_MODALITIES {
            let qc = self.modalities.get(&modality).cloned().unwrap_or_default();
            record.push(flag(qc.present));
            if modality != Modality::T1Preop {
                record.push(flag(qc.registered));
            }
            record.push(qc.correct_modality);
            record.push(qc.artefact);
            record.push(qc.fov);
            record.push(qc.defacing);
            if modality != Modality::T1Preop {
                record.push(optional_number(qc.dice_mean));
                record.push(optional_number(qc.dice_std));
            }
        }
        record.push(flag(self.mask_present));
        record.push(self.mask_qc.clone());
        record
    }

    fn from_record(columns: &HashMap<String, usize>, record: &csv::StringRecord) -> Self {
        let cell = |name: &str| -> String {
            columns
                .get(name)
                .and_then(|index| record.get(*index))
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };

        let mut row = Self::new(cell(SUBJECT));
        for modality in MATRIX_MODALITIES {
            let label = modality.matrix_label();
            let qc = ModalityQc {
                present: parse_flag(&cell(&format!("{label} Present"))),
                registered: parse_flag(&cell(&format!("{label} Register"))),
                correct_modality: cell(&format!("{label} Correct Mod.")),
                artefact: cell(&format!("{label} Artefact")),
                fov: cell(&format!("{label} FOV")),
                defacing: cell(&format!("{label} Defacing")),
                dice_mean: cell(&format!("{label} Dice Mean")).parse().ok(),
                dice_std: cell(&format!("{label} Dice Std")).parse().ok(),
            };
            row.modalities.insert(modality, qc);
        }
        row.mask_present = parse_flag(&cell(MASK_PRESENT));
        row.mask_qc = cell(MASK_QC);
        row
    }
}

pub fn matrix_headers() -> Vec<String> {
    let mut headers = vec![SUBJECT.to_string()];
    for modality in MATRIX_MODALITIES {
        let label = modality.matrix_label();
        headers.push(format!("{label} Present"));
        if modality != Modality::T1Preop {
            headers.push(format!("{label} Register"));
        }
        for field in ["Correct Mod.", "Artefact", "FOV", "Defacing"] {
            headers.push(format!("{label} {field}"));
        }
        if modality != Modality::T1Preop {
            headers.push(format!("{label} Dice Mean"));
            headers.push(format!("{label} Dice Std"));
        }
    }
    headers.push(MASK_PRESENT.to_string());
    headers.push(MASK_QC.to_string());
    headers
}

/// The QC matrix, keyed by subject in insertion order.
#[derive(Debug, Clone)]
pub struct QcMatrix {
    path: PathBuf,
    rows: Vec<MatrixRow>,
}

impl QcMatrix {
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            let matrix = Self::read(path)?;
            info!(path = %path.display(), rows = matrix.rows.len(), "loaded existing QC matrix");
            return Ok(matrix);
        }
        Ok(Self {
            path: path.to_path_buf(),
            rows: Vec::new(),
        })
    }

    /// Reads a matrix by column name; missing columns read as empty cells.
    pub fn read(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("failed to read header of {}", path.display()))?;
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(index, name)| (name.trim().to_string(), index))
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.with_context(|| format!("failed to parse {}", path.display()))?;
            let row = MatrixRow::from_record(&columns, &record);
            if !row.subject.is_empty() {
                rows.push(row);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
        })
    }

    pub fn rows(&self) -> &[MatrixRow] {
        &self.rows
    }

    pub fn find(&self, subject: &str) -> Option<&MatrixRow> {
        self.rows.iter().find(|row| row.subject == subject)
    }

    /// Replaces the subject's row, keeping any manual judgments already entered.
    pub fn upsert(&mut self, mut row: MatrixRow) {
        match self.rows.iter_mut().find(|existing| existing.subject == row.subject) {
            Some(existing) => {
                row.carry_manual_fields(existing);
                *existing = row;
            }
            None => self.rows.push(row),
        }
    }

    pub fn persist(&self) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(matrix_headers())
            .context("failed to write matrix header")?;
        for row in &self.rows {
            writer
                .write_record(row.to_record())
                .with_context(|| format!("failed to write matrix row for {}", row.subject))?;
        }
        let data = writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("failed to flush matrix: {err}"))?;

        write_atomic(&self.path, &data)
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn optional_number(value: Option<f64>) -> String {
    value.map(|number| number.to_string()).unwrap_or_default()
}

fn parse_flag(raw: &str) -> bool {
    parse_code(raw).is_some_and(|code| code != 0)
}

/// Integer code from a hand-filled cell; accepts `2`, `2.0`, ignores blanks and `nan`.
pub fn parse_code(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    if let Ok(code) = trimmed.parse::<i64>() {
        return Some(code);
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && value.fract() == 0.0)
        .map(|value| value as i64)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::case_id::CaseId;
    use crate::model::{DiceSummary, RegistrationStatus};

    #[test]
    fn headers_skip_register_and_dice_for_reference_t1() {
        let headers = matrix_headers();
        assert_eq!(headers[0], "Subject");
        assert_eq!(headers[1], "T1-Preop Present");
        assert!(!headers.contains(&"T1-Preop Register".to_string()));
        assert!(!headers.contains(&"T1-Preop Dice Mean".to_string()));
        assert!(headers.contains(&"FLAIR Register".to_string()));
        assert!(headers.contains(&"DWInegPE-Preop Dice Std".to_string()));
        assert_eq!(headers.last().map(String::as_str), Some("Mask QC"));
    }

    #[test]
    fn parse_code_accepts_float_formatting() {
        assert_eq!(parse_code("2"), Some(2));
        assert_eq!(parse_code("3.0"), Some(3));
        assert_eq!(parse_code(" nan "), None);
        assert_eq!(parse_code(""), None);
        assert_eq!(parse_code("2.5"), None);
    }

    #[test]
    fn row_from_report_tracks_presence_registration_and_dice() {
        let mut report = CaseReport::new(CaseId::new("sub-MELDH1P0001"));
        report
            .paths
            .insert(Modality::T1Preop, PathBuf::from("t1.nii.gz"));
        report
            .paths
            .insert(Modality::FlairPreop, PathBuf::from("flair.nii.gz"));
        report.outcomes.insert(
            Modality::FlairPreop,
            RegistrationStatus::Registered {
                warped: PathBuf::from("flair_space-T1.nii.gz"),
                dice: Some(DiceSummary {
                    scores: vec![0.8, 0.9],
                    mean: 0.85,
                    std: 0.05,
                }),
            },
        );

        let row = MatrixRow::from_report(&report);
        let flair = row.modality(Modality::FlairPreop).expect("flair");
        assert!(flair.present);
        assert!(flair.registered);
        assert_eq!(flair.dice_mean, Some(0.85));
        let t2 = row.modality(Modality::T2Preop).expect("t2");
        assert!(!t2.present);
        assert!(!t2.registered);
    }

    #[test]
    fn upsert_replaces_row_and_keeps_manual_judgments() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("matrix.csv");
        let mut matrix = QcMatrix::load_or_new(&path).expect("new matrix");

        let mut first = MatrixRow::new("sub-A");
        first.mask_qc = "1".to_string();
        if let Some(t1) = first.modalities.get_mut(&Modality::T1Preop) {
            t1.correct_modality = "1".to_string();
        }
        matrix.upsert(first);
        matrix.upsert(MatrixRow::new("sub-B"));

        let mut rerun = MatrixRow::new("sub-A");
        rerun.mask_present = true;
        matrix.upsert(rerun);
        matrix.persist().expect("persist");

        let reloaded = QcMatrix::read(&path).expect("reload");
        assert_eq!(reloaded.rows().len(), 2);
        let row = reloaded.find("sub-A").expect("row");
        assert!(row.mask_present);
        assert_eq!(row.mask_qc, "1");
        assert_eq!(
            row.modality(Modality::T1Preop).map(|qc| qc.correct_modality.as_str()),
            Some("1")
        );
    }

    #[test]
    fn reads_matrix_with_older_column_set() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("df_qc_all_H1.csv");
        fs::write(
            &path,
            "Subject,T1-Preop Present,T1-Preop Correct Mod.,FLAIR Present,Mask Present,Mask QC\n\
             sub-A,1,1.0,0,1,2\n",
        )
        .expect("write");

        let matrix = QcMatrix::read(&path).expect("read");
        let row = matrix.find("sub-A").expect("row");
        let t1 = row.modality(Modality::T1Preop).expect("t1");
        assert!(t1.present);
        assert_eq!(parse_code(&t1.correct_modality), Some(1));
        assert_eq!(parse_code(&row.mask_qc), Some(2));
        assert!(row.modality(Modality::T2Preop).is_some_and(|qc| qc.fov.is_empty()));
    }
}
