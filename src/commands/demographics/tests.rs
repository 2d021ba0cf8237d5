use std::fs;

use super::checks::{CheckCode, check_age_years, check_id, check_in_categories, check_year};
use super::rules::{AGE_RANGE, FOLLOW_UP_RANGE, YEAR_RANGE, checked_columns};
use super::run::{ParticipantRow, check_row, qc_demographics, qc_headers, read_participants};

const SITE: &str = "H4";

fn patient(extra: &[(&str, &str)]) -> ParticipantRow {
    let mut pairs = vec![
        ("id", "MELD_H4_P_0001"),
        ("old_id", "patient-1"),
        ("site", "H4"),
        ("patient_control", "1"),
        ("sex", "0"),
        ("age_at_preop_t1_3t", "40"),
        ("age_at_onset", "12"),
        ("histology", "3"),
    ];
    for &(key, value) in extra {
        pairs.retain(|(existing, _)| *existing != key);
        pairs.push((key, value));
    }
    ParticipantRow::from_pairs(pairs)
}

#[test]
fn id_structure_reports_every_broken_term() {
    assert_eq!(check_id("MELD_H4_P_0001", SITE).code, CheckCode::Pass);

    let short = check_id("MELD_H4_0001", SITE);
    assert_eq!(short.code, CheckCode::Fail);
    assert_eq!(short.message, "Error in MELD id structure;");

    let broken = check_id("MEDL_H5_X_0001", SITE);
    assert_eq!(broken.code, CheckCode::Fail);
    assert_eq!(
        broken.message,
        "Error in first term of the id structure;Wrong site code;Error in group, other than C or P;"
    );
}

#[test]
fn categories_accept_float_spellings_of_codes() {
    assert_eq!(check_in_categories("1.0", &[0, 1]).code, CheckCode::Pass);
    let result = check_in_categories("4", &[0, 1]);
    assert_eq!(result.code, CheckCode::Fail);
    assert_eq!(result.message, "Value 4 not in allowed categories;");
    assert_eq!(check_in_categories("yes", &[0, 1]).code, CheckCode::Fail);
}

#[test]
fn age_sentinel_is_not_applicable_whatever_the_range() {
    for range in [AGE_RANGE, FOLLOW_UP_RANGE] {
        let result = check_age_years("555", range);
        assert_eq!(result.code, CheckCode::Missing);
        assert_eq!(result.message, "Value 555 seems to be months instead of years;");
    }
    assert_eq!(check_age_years("80", AGE_RANGE).code, CheckCode::Fail);
    assert_eq!(check_age_years("0", AGE_RANGE).code, CheckCode::Fail);
    assert_eq!(check_age_years("35.5", AGE_RANGE).code, CheckCode::Pass);
    assert_eq!(check_age_years("25", FOLLOW_UP_RANGE).code, CheckCode::Fail);
}

#[test]
fn year_range_is_exclusive() {
    assert_eq!(check_year("2015", YEAR_RANGE).code, CheckCode::Pass);
    assert_eq!(check_year("555", YEAR_RANGE).code, CheckCode::Missing);
    let result = check_year("2025", YEAR_RANGE);
    assert_eq!(result.code, CheckCode::Fail);
    assert_eq!(result.message, "Value 2025 seems to be a wrong year;");
}

#[test]
fn absent_values_are_always_code_two() {
    let subject = check_row(&patient(&[("engel", ""), ("seeg", "NaN")]), SITE);
    for column in ["engel", "seeg", "ilae", "radiology_report", "surgery_year"] {
        let qc = subject.column(column).expect("column checked");
        assert_eq!(qc.result.code, CheckCode::Missing, "{column}");
    }
}

#[test]
fn onset_older_than_preop_age_fails() {
    let subject = check_row(
        &patient(&[("age_at_onset", "50"), ("age_at_preop_t1_3t", "40")]),
        SITE,
    );
    let onset = subject.column("age_at_onset").expect("onset checked");
    assert_eq!(onset.result.code, CheckCode::Fail);
    assert!(
        onset
            .result
            .message
            .contains("Age of onset older than age at preop")
    );
}

#[test]
fn preop_age_falls_back_across_field_strengths() {
    let subject = check_row(
        &patient(&[("age_at_preop_t1_3t", ""), ("age_at_preop_t1_15t", "30")]),
        SITE,
    );
    for column in ["age_at_preop_t1_3t", "age_at_preop_t1_7t"] {
        let qc = subject.column(column).expect("checked");
        assert_eq!(qc.result.code, CheckCode::Missing);
    }

    let missing = check_row(&patient(&[("age_at_preop_t1_3t", "")]), SITE);
    for column in ["age_at_preop_t1_3t", "age_at_preop_t1_7t", "age_at_preop_t1_15t"] {
        let qc = missing.column(column).expect("checked");
        assert_eq!(qc.result.code, CheckCode::Fail);
        assert_eq!(
            qc.result.message,
            "Age at preoperative is a mandatory information;"
        );
    }
}

#[test]
fn patient_rules_cover_onset_findings_and_mask_need() {
    let subject = check_row(
        &patient(&[("age_at_onset", "555"), ("histology", "")]),
        SITE,
    );
    let onset = subject.column("age_at_onset").expect("checked");
    assert_eq!(onset.result.code, CheckCode::Fail);
    assert!(onset.result.message.ends_with("This is a mandatory information;"));
    for column in ["radiology", "histology"] {
        let qc = subject.column(column).expect("checked");
        assert_eq!(
            qc.result.message,
            "Radiology or Histology are mandatory information;"
        );
    }
    assert_eq!(subject.need_mask, None);

    let sclerosis = check_row(&patient(&[("histology", "10")]), SITE);
    assert_eq!(sclerosis.need_mask, Some(0));
    let lesional = check_row(&patient(&[]), SITE);
    assert_eq!(lesional.need_mask, Some(1));
    assert_eq!(lesional.error_notes(), "");
}

#[test]
fn controls_never_need_a_mask() {
    let control = check_row(
        &patient(&[("patient_control", "2"), ("age_at_onset", ""), ("histology", "")]),
        SITE,
    );
    assert_eq!(control.need_mask, Some(0));
    let onset = control.column("age_at_onset").expect("checked");
    assert_eq!(onset.result.code, CheckCode::Missing);
}

#[test]
fn mandatory_identity_fields_fail_when_missing() {
    let subject = check_row(&patient(&[("sex", "")]), SITE);
    let sex = subject.column("sex").expect("checked");
    assert_eq!(sex.result.code, CheckCode::Fail);
    assert_eq!(subject.error_notes(), "error in sex: This is a mandatory information; ;");
}

#[test]
fn bookkeeping_columns_are_not_checked() {
    assert!(
        checked_columns().all(|(column, _)| column != "participant_information_complete")
    );
    let headers = qc_headers();
    assert_eq!(headers[0], "study ID");
    assert!(headers.contains(&"aeds.text".to_string()));
    assert!(headers.contains(&"engel.error".to_string()));
    assert_eq!(headers.last().map(String::as_str), Some("need_mask"));
}

#[test]
fn only_included_rows_are_checked_and_written() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("MELD_participants_infos_H4_2024.csv");
    fs::write(
        &input,
        "id,old_id,site,included,patient_control,sex,age_at_preop_t1_3t,age_at_onset,histology,aeds\n\
         MELD_H4_P_0001,p1,H4,1,1,0,40,50,3,levetiracetam\n\
         MELD_H4_P_0002,p2,H4,0,1,0,40,12,3,\n\
         MELD_H4_C_0003,c3,H4,1.0,2,1,35,,,\n",
    )
    .expect("write participants");

    assert_eq!(read_participants(&input).expect("read").len(), 2);

    let output = dir.path().join("qc.csv");
    let subjects = qc_demographics(&input, SITE, &output).expect("qc runs");
    assert_eq!(subjects.len(), 2);
    assert!(subjects[0].error_notes().contains("error in age_at_onset"));

    let mut reader = csv::Reader::from_path(&output).expect("open output");
    let headers = reader.headers().expect("headers").clone();
    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("records");
    assert_eq!(rows.len(), 2);

    let column = |name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .expect("header present")
    };
    assert_eq!(&rows[0][column("study ID")], "MELD_H4_P_0001");
    assert_eq!(&rows[0][column("original ID given by site")], "p1");
    assert_eq!(&rows[0][column("age_at_onset.passcheck")], "0");
    assert_eq!(&rows[0][column("aeds.text")], "levetiracetam");
    assert_eq!(&rows[0][column("need_mask")], "1");
    assert_eq!(&rows[1][column("need_mask")], "0");
    assert_eq!(&rows[1][column("aeds.passcheck")], "2");
}
