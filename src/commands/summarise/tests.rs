use std::fs;
use std::path::{Path, PathBuf};

use super::colour::{RowColour, row_colour};
use super::discovery::{participants_files, site_folders};
use super::mri::{MriAssessment, assess_subject};
use super::run::{summarise_site, summarise_sites};
use super::workbook::{SUMMARY_HEADERS, SummaryRow, write_summary_csv, write_summary_xlsx};
use crate::matrix::{MatrixRow, QcMatrix};
use crate::model::Modality;

const PARTICIPANTS_HEADER: &str =
    "id,old_id,site,patient_control,sex,age_at_preop_t1_3t,age_at_onset,histology\n";

fn reviewed(row: &mut MatrixRow, modality: Modality, correct: &str, defacing: &str) {
    let qc = row.modalities.entry(modality).or_default();
    qc.present = true;
    qc.correct_modality = correct.to_string();
    qc.artefact = "1".to_string();
    qc.fov = "1".to_string();
    qc.defacing = defacing.to_string();
}

fn write_matrix(path: &Path, rows: Vec<MatrixRow>) {
    let mut matrix = QcMatrix::load_or_new(path).expect("matrix");
    for row in rows {
        matrix.upsert(row);
    }
    matrix.persist().expect("persist matrix");
}

fn site_fixture(root: &Path) -> PathBuf {
    let site = root.join("MELD_H4");
    fs::create_dir_all(site.join("MELD_BIDS_QC")).expect("site dirs");
    fs::write(
        site.join("MELD_participants_infos_H4_2024.csv"),
        format!(
            "{PARTICIPANTS_HEADER}\
             MELD_H4_P_0001,a,H4,1,0,40,12,3\n\
             MELD_H4_P_0002,b,H4,1,1,30,10,3\n\
             MELD_H4_P_0003,c,H4,1,1,25,5,3\n\
             MELD_H4_C_0004,d,H4,2,0,50,,\n"
        ),
    )
    .expect("participants");

    let mut clean = MatrixRow::new("sub-MELDH4P0001");
    reviewed(&mut clean, Modality::T1Preop, "1", "1");
    clean.mask_present = true;
    clean.mask_qc = "1".to_string();

    let mut defaced = MatrixRow::new("sub-MELDH4P0003");
    reviewed(&mut defaced, Modality::T1Preop, "1", "1");
    reviewed(&mut defaced, Modality::T1Postop, "1", "1");
    reviewed(&mut defaced, Modality::FlairPreop, "1.0", "2");

    let mut pending = MatrixRow::new("sub-MELDH4C0004");
    pending.modalities.entry(Modality::T1Preop).or_default().present = true;

    write_matrix(
        &site.join("MELD_BIDS_QC").join("df_qc_all_2024.csv"),
        vec![clean, defaced, pending],
    );
    site
}

#[test]
fn site_folders_keep_only_meld_sites() {
    let dir = tempfile::tempdir().expect("tempdir");
    for name in ["MELD_H4", "MELD_H11", "other", "MELD_X1"] {
        fs::create_dir_all(dir.path().join(name)).expect("folder");
    }
    fs::write(dir.path().join("MELD_H9.txt"), "").expect("file");

    let sites: Vec<String> = site_folders(dir.path(), None)
        .expect("folders")
        .into_iter()
        .map(|folder| folder.site)
        .collect();
    assert_eq!(sites, vec!["H11", "H4"]);

    let explicit = site_folders(dir.path(), Some("X1")).expect("explicit");
    assert_eq!(explicit[0].path, dir.path().join("MELD_X1"));
}

#[test]
fn earlier_qc_sheets_are_not_participants_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("MELD_participants_infos_H4_2024.csv"), "").expect("csv");
    fs::write(dir.path().join("MELD_participants_infos_H4_2024_QC.csv"), "").expect("qc");
    fs::write(dir.path().join("MELD_participants_infos_H40_2024.csv"), "").expect("other");

    let files = participants_files(dir.path(), "H4").expect("files");
    assert_eq!(files.len(), 1);
}

#[test]
fn multiple_participants_sheets_flag_the_whole_site() {
    let dir = tempfile::tempdir().expect("tempdir");
    let site = dir.path().join("MELD_H4");
    fs::create_dir_all(&site).expect("site");
    for name in [
        "MELD_participants_infos_H4_a.csv",
        "MELD_participants_infos_H4_b.csv",
    ] {
        fs::write(site.join(name), PARTICIPANTS_HEADER).expect("participants");
    }

    let rows = summarise_sites(dir.path(), None).expect("summary");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].study_id, "all");
    assert_eq!(rows[0].demographic_qc, 0);
    assert_eq!(rows[0].demographic_notes, "Found multiple participants infos csv");
    assert!(!rows[0].mri.complete);
    assert_eq!(rows[0].mri.notes_text(), "MRI QC csv cannot be found");
    assert_eq!(row_colour(&rows[0]), RowColour::Yellow);
}

#[test]
fn site_summary_combines_demographic_and_mri_review() {
    let dir = tempfile::tempdir().expect("tempdir");
    let site = site_fixture(dir.path());

    let rows = summarise_sites(dir.path(), Some("H4")).expect("summary");
    assert_eq!(rows.len(), 4);
    assert!(site.join("MELD_participants_infos_H4_2024_QC.csv").is_file());
    assert!(rows.iter().all(|row| row.site == "H4"));

    let clean = &rows[0];
    assert_eq!(clean.demographic_qc, 1);
    assert!(clean.mri.complete);
    assert_eq!(clean.mri.usable(Modality::T1Preop), Some(1));
    assert_eq!(clean.mri.mask_qc, Some(1));
    assert_eq!(row_colour(clean), RowColour::LightGreen);

    let unreviewed = &rows[1];
    assert_eq!(unreviewed.mri.notes_text(), "QC not done or have failed");
    assert_eq!(row_colour(unreviewed), RowColour::LightCoral);

    let defaced = &rows[2];
    assert_eq!(defaced.mri.usable(Modality::FlairPreop), Some(0));
    assert_eq!(defaced.mri.usable(Modality::T1Postop), Some(1));
    assert_eq!(defaced.mri.mask_qc, Some(3));
    let notes = defaced.mri.notes_text();
    assert!(notes.contains("Defacing error: Face remaining on FLAIR;"));
    assert!(notes.contains("mask missing"));
    assert_eq!(row_colour(defaced), RowColour::Yellow);

    let control = &rows[3];
    assert_eq!(control.mri.notes_text(), "QC not done");
    assert_eq!(control.mri.mask_qc, None);
    assert_eq!(row_colour(control), RowColour::LightCoral);
}

#[test]
fn missing_mask_without_usable_postop_is_required() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("df_qc_all_x.csv");
    let mut row = MatrixRow::new("sub-MELDH4P0009");
    reviewed(&mut row, Modality::T1Preop, "1", "1");
    reviewed(&mut row, Modality::T1Postop, "3", "1");
    write_matrix(&path, vec![row]);

    let matrix = QcMatrix::read(&path).expect("matrix");
    let assessment = assess_subject(&matrix, "MELD_H4_P_0009", Some(1));
    assert_eq!(assessment.usable(Modality::T1Postop), Some(0));
    assert_eq!(assessment.mask_qc, Some(4));
    assert!(
        assessment
            .notes_text()
            .contains("Error with T1-Postop scan: contrast agent;")
    );

    let no_need = assess_subject(&matrix, "MELD_H4_P_0009", Some(0));
    assert_eq!(no_need.mask_qc, None);
}

#[test]
fn mask_review_codes_map_to_summary_codes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("df_qc_all_x.csv");
    let cases = [("", 0), ("1", 1), ("2", 2), ("6", 5), ("4", 0)];
    let rows = cases
        .iter()
        .enumerate()
        .map(|(index, (code, _))| {
            let mut row = MatrixRow::new(format!("sub-MELDH4P000{index}"));
            reviewed(&mut row, Modality::T1Preop, "1", "1");
            row.mask_present = true;
            row.mask_qc = code.to_string();
            row
        })
        .collect();
    write_matrix(&path, rows);

    let matrix = QcMatrix::read(&path).expect("matrix");
    for (index, (_, expected)) in cases.iter().enumerate() {
        let assessment = assess_subject(&matrix, &format!("MELD_H4_P_000{index}"), None);
        assert_eq!(assessment.mask_qc, Some(*expected), "case {index}");
    }
}

#[test]
fn demographic_gaps_outrank_imaging_problems() {
    let mut row = SummaryRow {
        study_id: "MELD_H4_P_0001".to_string(),
        original_id: String::new(),
        site: "H4".to_string(),
        demographic_qc: 0,
        demographic_notes: "error in sex: This is a mandatory information; ;".to_string(),
        mri: MriAssessment::incomplete("QC not done"),
    };
    assert_eq!(row_colour(&row), RowColour::Yellow);

    row.demographic_qc = 1;
    assert_eq!(row_colour(&row), RowColour::LightCoral);

    row.mri = MriAssessment {
        complete: true,
        ..MriAssessment::default()
    };
    row.mri.usability.insert(Modality::T1Preop, 1);
    row.mri.usability.insert(Modality::T2Preop, 0);
    assert_eq!(row_colour(&row), RowColour::Yellow);

    row.mri.mask_qc = Some(4);
    assert_eq!(row_colour(&row), RowColour::LightCoral);
}

#[test]
fn summary_is_written_as_csv_and_workbook() {
    let dir = tempfile::tempdir().expect("tempdir");
    site_fixture(dir.path());
    let folder = site_folders(dir.path(), None).expect("folders").remove(0);
    let rows = summarise_site(&folder).expect("summary");

    let csv_path = dir.path().join("out").join("summary.csv");
    write_summary_csv(&csv_path, &rows).expect("csv");
    let xlsx_path = csv_path.with_extension("xlsx");
    write_summary_xlsx(&xlsx_path, &rows).expect("xlsx");

    let mut reader = csv::Reader::from_path(&csv_path).expect("open");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.len(), SUMMARY_HEADERS.len());
    let records: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .expect("records");
    assert_eq!(records.len(), 4);
    assert_eq!(&records[0][0], "MELD_H4_P_0001");
    assert_eq!(&records[0][6], "1");
    assert_eq!(&records[1][6], "");

    let bytes = fs::read(&xlsx_path).expect("workbook");
    assert!(bytes.starts_with(b"PK"));
}
