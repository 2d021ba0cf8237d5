use super::rules::{Rule, SENTINEL};

/// Spellings read as an absent value, matching what spreadsheet exports emit.
const MISSING_MARKERS: [&str; 16] = [
    "", "#N/A", "#N/A N/A", "#NA", "-NaN", "-nan", "<NA>", "N/A", "NA", "NULL", "NaN", "None",
    "n/a", "nan", "null", "none",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckCode {
    Fail,
    Pass,
    Missing,
}

impl CheckCode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Fail => 0,
            Self::Pass => 1,
            Self::Missing => 2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckResult {
    pub code: CheckCode,
    pub message: String,
}

impl CheckResult {
    pub fn pass() -> Self {
        Self {
            code: CheckCode::Pass,
            message: String::new(),
        }
    }

    pub fn missing() -> Self {
        Self {
            code: CheckCode::Missing,
            message: String::new(),
        }
    }

    fn with(code: CheckCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Marks the column as failed and appends a message ending in `;`.
    pub fn fail_with(&mut self, message: &str) {
        self.code = CheckCode::Fail;
        self.message.push_str(message);
    }

    pub fn is_fail(&self) -> bool {
        self.code == CheckCode::Fail
    }
}

pub fn is_missing(raw: Option<&str>) -> bool {
    match raw {
        None => true,
        Some(value) => MISSING_MARKERS.contains(&value.trim()),
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Applies one column rule to a present value. Absent values never reach
/// this function; callers map them to `CheckCode::Missing`.
pub fn apply_rule(rule: Rule, value: &str, site_code: &str) -> CheckResult {
    match rule {
        Rule::Id => check_id(value, site_code),
        Rule::Site => check_site(value, site_code),
        Rule::Categories(categories) => check_in_categories(value, categories),
        Rule::Age(range) => check_age_years(value, range),
        Rule::Year(range) => check_year(value, range),
        Rule::FreeText => CheckResult::pass(),
    }
}

/// `MELD_<site>_<C|P>_<number>`.
pub fn check_id(value: &str, site_code: &str) -> CheckResult {
    let parts: Vec<&str> = value.trim().split('_').collect();
    if parts.len() != 4 {
        return CheckResult::with(CheckCode::Fail, "Error in MELD id structure;");
    }

    let mut result = CheckResult::pass();
    if parts[0] != "MELD" {
        result.fail_with("Error in first term of the id structure;");
    }
    if parts[1] != site_code {
        result.fail_with("Wrong site code;");
    }
    if parts[2] != "C" && parts[2] != "P" {
        result.fail_with("Error in group, other than C or P;");
    }
    result
}

pub fn check_site(value: &str, site_code: &str) -> CheckResult {
    if value.trim() == site_code {
        CheckResult::pass()
    } else {
        CheckResult::with(CheckCode::Fail, "Wrong site code;")
    }
}

pub fn check_in_categories(value: &str, categories: &[i64]) -> CheckResult {
    let allowed = parse_number(value).is_some_and(|number| {
        number.fract() == 0.0 && categories.contains(&(number as i64))
    });
    if allowed {
        CheckResult::pass()
    } else {
        CheckResult::with(
            CheckCode::Fail,
            format!("Value {} not in allowed categories;", value.trim()),
        )
    }
}

/// Exclusive range check. The sentinel is reported but not failed.
pub fn check_age_years(value: &str, range: (f64, f64)) -> CheckResult {
    let message = format!("Value {} seems to be months instead of years;", value.trim());
    match parse_number(value) {
        Some(number) if number == SENTINEL => CheckResult::with(CheckCode::Missing, message),
        Some(number) if number > range.0 && number < range.1 => CheckResult::pass(),
        _ => CheckResult::with(CheckCode::Fail, message),
    }
}

pub fn check_year(value: &str, range: (f64, f64)) -> CheckResult {
    match parse_number(value) {
        Some(number) if number == SENTINEL => CheckResult::missing(),
        Some(number) if number > range.0 && number < range.1 => CheckResult::pass(),
        _ => CheckResult::with(
            CheckCode::Fail,
            format!("Value {} seems to be a wrong year;", value.trim()),
        ),
    }
}
