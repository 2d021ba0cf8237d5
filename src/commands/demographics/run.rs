use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::cli::DemographicsArgs;
use crate::util::write_atomic;

use super::checks::{CheckCode, CheckResult, apply_rule, is_missing, parse_number};
use super::rules::{
    HISTOLOGY_NO_MASK, MANDATORY_COLUMNS, PREOP_AGE_COLUMNS, Rule, SENTINEL, checked_columns,
};

pub const STUDY_ID_HEADER: &str = "study ID";
pub const ORIGINAL_ID_HEADER: &str = "original ID given by site";
pub const NEED_MASK_HEADER: &str = "need_mask";

/// One participants sheet row, keyed by header.
#[derive(Clone, Debug, Default)]
pub struct ParticipantRow {
    fields: HashMap<String, String>,
}

impl ParticipantRow {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// Present, non-empty value of a column.
    pub fn value(&self, column: &str) -> Option<&str> {
        let raw = self.fields.get(column).map(String::as_str);
        if is_missing(raw) {
            None
        } else {
            raw.map(str::trim)
        }
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.value(column).and_then(parse_number)
    }
}

#[derive(Clone, Debug)]
pub struct ColumnQc {
    pub column: &'static str,
    pub rule: Rule,
    pub result: CheckResult,
    pub text: String,
}

impl ColumnQc {
    fn detail(&self) -> &str {
        match self.rule {
            Rule::FreeText => &self.text,
            _ => &self.result.message,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SubjectQc {
    pub study_id: String,
    pub original_id: String,
    pub columns: Vec<ColumnQc>,
    pub need_mask: Option<u8>,
}

impl SubjectQc {
    pub fn column(&self, name: &str) -> Option<&ColumnQc> {
        self.columns.iter().find(|column| column.column == name)
    }

    fn fail(&mut self, name: &str, message: &str) {
        if let Some(column) = self.columns.iter_mut().find(|column| column.column == name) {
            column.result.fail_with(message);
        }
    }

    pub fn failing(&self) -> impl Iterator<Item = &ColumnQc> {
        self.columns.iter().filter(|column| column.result.is_fail())
    }

    /// `error in <col>: <message> ;` for every failing column, concatenated.
    pub fn error_notes(&self) -> String {
        self.failing()
            .map(|column| format!("error in {}: {} ;", column.column, column.result.message))
            .collect()
    }
}

pub fn run(args: DemographicsArgs) -> Result<()> {
    let subjects = qc_demographics(&args.file, &args.site, &args.output_file)?;
    let failing = subjects
        .iter()
        .filter(|subject| subject.failing().next().is_some())
        .count();
    info!(
        subjects = subjects.len(),
        failing,
        path = %args.output_file.display(),
        "demographic qc completed"
    );
    Ok(())
}

/// Checks every included participant and writes the QC sheet to `output`.
pub fn qc_demographics(file: &Path, site_code: &str, output: &Path) -> Result<Vec<SubjectQc>> {
    let rows = read_participants(file)?;
    info!(path = %file.display(), site = site_code, rows = rows.len(), "checking participants");

    let subjects: Vec<SubjectQc> = rows.iter().map(|row| check_row(row, site_code)).collect();
    write_qc_csv(output, &subjects)?;
    info!(path = %output.display(), "wrote demographic qc sheet");

    log_failing_columns(&subjects);
    Ok(subjects)
}

/// Reads the participants sheet, keeping only `included == 1` rows when the
/// sheet carries that column.
pub fn read_participants(path: &Path) -> Result<Vec<ParticipantRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open participants csv: {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(|header| header.trim().to_string())
        .collect();
    let filter_included = headers.iter().any(|header| header == "included");

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.with_context(|| format!("failed to read row in {}", path.display()))?;
        let row = ParticipantRow::from_pairs(
            headers
                .iter()
                .map(String::as_str)
                .zip(record.iter()),
        );
        if filter_included && row.number("included") != Some(1.0) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

pub fn check_row(row: &ParticipantRow, site_code: &str) -> SubjectQc {
    let columns = checked_columns()
        .map(|(column, rule)| {
            let (result, text) = match row.value(column) {
                None => (CheckResult::missing(), String::new()),
                Some(value) => {
                    let text = if rule == Rule::FreeText {
                        value.to_string()
                    } else {
                        String::new()
                    };
                    (apply_rule(rule, value, site_code), text)
                }
            };
            ColumnQc {
                column,
                rule,
                result,
                text,
            }
        })
        .collect();

    let mut subject = SubjectQc {
        study_id: row.value("id").unwrap_or_default().to_string(),
        original_id: row.value("old_id").unwrap_or_default().to_string(),
        columns,
        need_mask: None,
    };
    apply_cross_field_rules(row, &mut subject);
    subject
}

fn apply_cross_field_rules(row: &ParticipantRow, subject: &mut SubjectQc) {
    for column in MANDATORY_COLUMNS {
        if row.value(column).is_none() {
            subject.fail(column, "This is a mandatory information;");
        }
    }

    let preop_raw = PREOP_AGE_COLUMNS
        .iter()
        .find_map(|column| row.value(column));
    if preop_raw.is_none() {
        for column in PREOP_AGE_COLUMNS {
            subject.fail(column, "Age at preoperative is a mandatory information;");
        }
    }
    let preop_age = preop_raw.and_then(parse_number);

    if row.number("patient_control") != Some(1.0) {
        subject.need_mask = Some(0);
        return;
    }

    // A non-numeric onset has already failed its own range check.
    match row.value("age_at_onset").map(parse_number) {
        None => subject.fail("age_at_onset", "This is a mandatory information;"),
        Some(Some(onset)) if onset == SENTINEL => {
            subject.fail("age_at_onset", "This is a mandatory information;");
        }
        Some(Some(onset)) => {
            if preop_age.is_some_and(|preop| onset > preop) {
                subject.fail("age_at_onset", "Age of onset older than age at preop;");
            }
        }
        Some(None) => {}
    }

    if row.value("radiology").is_none() && row.value("histology").is_none() {
        for column in ["radiology", "histology"] {
            subject.fail(column, "Radiology or Histology are mandatory information;");
        }
    }

    subject.need_mask = row.value("histology").map(|_| {
        if row.number("histology") == Some(HISTOLOGY_NO_MASK) {
            0
        } else {
            1
        }
    });
}

pub fn qc_headers() -> Vec<String> {
    let mut headers = vec![STUDY_ID_HEADER.to_string(), ORIGINAL_ID_HEADER.to_string()];
    for (column, rule) in checked_columns() {
        headers.push(format!("{column}.passcheck"));
        headers.push(match rule {
            Rule::FreeText => format!("{column}.text"),
            _ => format!("{column}.error"),
        });
    }
    headers.push(NEED_MASK_HEADER.to_string());
    headers
}

pub fn write_qc_csv(path: &Path, subjects: &[SubjectQc]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(qc_headers())
        .context("failed to encode demographic qc header")?;

    for subject in subjects {
        let mut record = vec![subject.study_id.clone(), subject.original_id.clone()];
        for column in &subject.columns {
            record.push(column.result.code.as_u8().to_string());
            let detail = if column.result.code == CheckCode::Pass && column.rule != Rule::FreeText {
                ""
            } else {
                column.detail()
            };
            record.push(detail.to_string());
        }
        record.push(
            subject
                .need_mask
                .map(|value| value.to_string())
                .unwrap_or_default(),
        );
        writer
            .write_record(&record)
            .with_context(|| format!("failed to encode qc row for {}", subject.study_id))?;
    }

    let data = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush demographic qc csv: {err}"))?;
    write_atomic(path, &data)
}

fn log_failing_columns(subjects: &[SubjectQc]) {
    let mut by_column: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for subject in subjects {
        for column in subject.failing() {
            by_column
                .entry(column.column)
                .or_default()
                .push(format!("{} ({})", subject.study_id, column.result.message));
        }
    }
    for (column, subjects) in by_column {
        warn!(column, subjects = %subjects.join(", "), "column failed checks");
    }
}
