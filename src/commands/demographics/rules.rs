/// Value used by sites for "not applicable" or "not known".
pub const SENTINEL: f64 = 555.0;

pub const AGE_RANGE: (f64, f64) = (0.0, 80.0);
pub const FOLLOW_UP_RANGE: (f64, f64) = (0.0, 20.0);
pub const YEAR_RANGE: (f64, f64) = (2000.0, 2025.0);

/// Preoperative age columns in the order they are preferred.
pub const PREOP_AGE_COLUMNS: [&str; 3] = [
    "age_at_preop_t1_3t",
    "age_at_preop_t1_7t",
    "age_at_preop_t1_15t",
];

pub const MANDATORY_COLUMNS: [&str; 3] = ["id", "sex", "patient_control"];

/// Histology code of a non-lesional finding; such patients need no mask.
pub const HISTOLOGY_NO_MASK: f64 = 10.0;

const BINARY: &[i64] = &[0, 1];
const YES_NO_UNKNOWN: &[i64] = &[0, 1, 3];
const BINARY_OR_NA: &[i64] = &[0, 1, 555];
const FINDINGS: &[i64] = &[
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 21, 22, 23,
];
const OUTCOME_SCALE: &[i64] = &[1, 2, 3, 4, 5, 6, 555];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rule {
    Id,
    Site,
    Categories(&'static [i64]),
    Age((f64, f64)),
    Year((f64, f64)),
    FreeText,
}

/// Every column of the participants sheet, in sheet order.
pub const SCHEMA: [&str; 50] = [
    "id",
    "site",
    "patient_control",
    "sex",
    "radiology",
    "radiology_report",
    "field_strengths___1",
    "field_strengths___2",
    "field_strengths___3",
    "age_at_preop_t1_15t",
    "age_at_preop_t1_3t",
    "age_at_preop_t1_7t",
    "preop_t1_yr_15t",
    "preop_t1_yr_3t",
    "preop_t1_yr_7t",
    "postop_t1_yr",
    "postop_t1_yr_2___1",
    "postop_t1_yr_2___2",
    "postop_t1_yr_2___3",
    "control_headache",
    "preop_t1",
    "preop_t2",
    "preop_flair",
    "preop_dwi",
    "postop_t1",
    "fields",
    "lesion_mask",
    "age_at_onset",
    "gtcs",
    "drug_resistant",
    "aeds",
    "mri_negative",
    "seeg",
    "operated",
    "surgery_year",
    "age_at_surgery",
    "mri_negative_surgery",
    "procedure",
    "procedure_other",
    "histology",
    "histology_other",
    "seizure_free",
    "seizure_free_aura",
    "engel_1yr",
    "ilae_1yr",
    "engel",
    "ilae",
    "follow_up",
    "aeds_post_op",
    "participant_information_complete",
];

/// `None` for bookkeeping columns that are carried in the sheet but not checked.
pub fn rule_for(column: &str) -> Option<Rule> {
    let rule = match column {
        "id" => Rule::Id,
        "site" => Rule::Site,
        "patient_control" => Rule::Categories(&[1, 2]),
        "sex" => Rule::Categories(BINARY),
        "radiology" | "histology" => Rule::Categories(FINDINGS),
        "radiology_report" | "aeds" | "procedure_other" | "histology_other" => Rule::FreeText,
        "field_strengths___1" | "field_strengths___2" | "field_strengths___3" => {
            Rule::Categories(BINARY)
        }
        "postop_t1_yr_2___1" | "postop_t1_yr_2___2" | "postop_t1_yr_2___3" => {
            Rule::Categories(BINARY)
        }
        "preop_t1" | "preop_t2" | "preop_flair" | "preop_dwi" | "fields" => {
            Rule::Categories(BINARY)
        }
        "age_at_preop_t1_15t" | "age_at_preop_t1_3t" | "age_at_preop_t1_7t" => {
            Rule::Age(AGE_RANGE)
        }
        "age_at_onset" | "age_at_surgery" => Rule::Age(AGE_RANGE),
        "follow_up" => Rule::Age(FOLLOW_UP_RANGE),
        "preop_t1_yr_15t" | "preop_t1_yr_3t" | "preop_t1_yr_7t" | "postop_t1_yr"
        | "surgery_year" => Rule::Year(YEAR_RANGE),
        "control_headache" => Rule::Categories(&[1, 2, 555]),
        "postop_t1" => Rule::Categories(&[1, 2, 3]),
        "lesion_mask" | "mri_negative_surgery" => Rule::Categories(BINARY_OR_NA),
        "gtcs" | "drug_resistant" | "mri_negative" | "seeg" | "operated" => {
            Rule::Categories(YES_NO_UNKNOWN)
        }
        "procedure" | "engel_1yr" => Rule::Categories(&[1, 2, 3, 4, 555]),
        "seizure_free" | "seizure_free_aura" => Rule::Categories(&[1, 2, 555]),
        "ilae_1yr" | "engel" | "ilae" => Rule::Categories(OUTCOME_SCALE),
        "aeds_post_op" => Rule::Categories(&[1, 2, 3, 555]),
        _ => return None,
    };
    Some(rule)
}

/// Schema columns that carry a rule, in sheet order.
pub fn checked_columns() -> impl Iterator<Item = (&'static str, Rule)> {
    SCHEMA
        .iter()
        .filter_map(|column| rule_for(column).map(|rule| (*column, rule)))
}
