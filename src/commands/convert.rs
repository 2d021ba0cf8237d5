use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use regex::{Captures, Regex};
use tracing::{info, warn};

use crate::case_id::{CaseId, enumerate_cases};
use crate::cli::ConvertArgs;
use crate::config::PipelineConfig;
use crate::markers::{fingerprint, invocation_fingerprint, is_complete, mark_complete};
use crate::tools::{SystemToolRunner, ToolError, ToolInvocation, ToolRunner};
use crate::util::{copy_file, ensure_directory, sha256_file};
use crate::volume::validate_nifti;

/// Naming of one converted case inside the target tree.
#[derive(Debug, Clone)]
pub struct ConvertLayout {
    pub t1_template: String,
    pub label_name: String,
    pub field_strength: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConvertCounts {
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseConversion {
    Converted { mask: bool },
    AlreadyConverted,
}

pub fn run(args: ConvertArgs) -> Result<()> {
    if !args.source_dir.is_dir() {
        bail!("source directory does not exist: {}", args.source_dir.display());
    }
    let config = PipelineConfig::load(args.config.as_deref())?;
    ensure_directory(&args.target_dir)?;

    transfer_participants_csv(&args.source_dir, &args.target_dir)?;

    let cases = enumerate_cases(
        &args.source_dir,
        args.subject_list.as_deref(),
        &args.cases,
        "MELD_",
    )?;
    info!(
        source = %args.source_dir.display(),
        target = %args.target_dir.display(),
        cases = cases.len(),
        "starting conversion"
    );

    let layout = ConvertLayout {
        t1_template: args.t1_template.clone(),
        label_name: args.label_name.clone(),
        field_strength: args.field_strength.clone(),
    };
    let runner = SystemToolRunner::new(config.tools.timeout());
    let counts = convert_cases(
        &runner,
        &config.tools.label2vol,
        &args.source_dir,
        &args.target_dir,
        &layout,
        &cases,
    );

    info!(
        converted = counts.converted,
        skipped = counts.skipped,
        failed = counts.failed,
        "conversion completed"
    );
    if counts.failed > 0 {
        bail!("{} of {} cases failed to convert", counts.failed, cases.len());
    }
    Ok(())
}

pub fn convert_cases(
    runner: &dyn ToolRunner,
    label2vol: &str,
    source_dir: &Path,
    target_dir: &Path,
    layout: &ConvertLayout,
    cases: &[CaseId],
) -> ConvertCounts {
    let mut counts = ConvertCounts::default();
    for case in cases {
        match convert_case(runner, label2vol, source_dir, target_dir, layout, case) {
            Ok(CaseConversion::Converted { mask }) => {
                info!(case = %case, mask, "case converted");
                counts.converted += 1;
            }
            Ok(CaseConversion::AlreadyConverted) => {
                info!(case = %case, "case already converted, skipping");
                counts.skipped += 1;
            }
            Err(err) => {
                warn!(case = %case, error = %format!("{err:#}"), "case conversion failed");
                counts.failed += 1;
            }
        }
    }
    counts
}

/// Copies the T1 and lesion label of one case into `<target>/<compact>/anat`,
/// converts the label to a mask volume and compresses the T1.
pub fn convert_case(
    runner: &dyn ToolRunner,
    label2vol: &str,
    source_dir: &Path,
    target_dir: &Path,
    layout: &ConvertLayout,
    case: &CaseId,
) -> Result<CaseConversion> {
    let compact = case.compact();
    let anat = target_dir.join(&compact).join("anat");
    let t1_copy = anat.join(format!("{compact}_{}_preop_T1w.nii", layout.field_strength));
    let t1_gz = gz_path(&t1_copy);

    let case_dir = source_dir.join(case.as_str());
    let t1_source = case_dir.join(expand_template(&layout.t1_template, case)?);
    if !t1_source.is_file() {
        bail!("T1 not found: {}", t1_source.display());
    }
    let source_fingerprint = fingerprint(&[
        t1_source.display().to_string(),
        sha256_file(&t1_source)?,
    ]);
    if is_complete("gzip", &source_fingerprint, &t1_gz) {
        return Ok(CaseConversion::AlreadyConverted);
    }
    ensure_directory(&anat)?;
    copy_file(&t1_source, &t1_copy)?;

    let label_source = case_dir.join(&layout.label_name);
    let mask = label_source.is_file();
    if mask {
        let label_copy = anat.join(format!(
            "{compact}_{}_lesion_mask.label",
            layout.field_strength
        ));
        let mask_path = anat.join(format!(
            "{compact}_{}_lesion_mask.nii.gz",
            layout.field_strength
        ));
        copy_file(&label_source, &label_copy)?;

        let invocation = ToolInvocation::new(label2vol)
            .path_arg("--label", &label_copy)
            .path_arg("--temp", &t1_copy)
            .path_arg("--o", &mask_path)
            .arg("--identity");
        let label_fingerprint = invocation_fingerprint(&invocation, &mask_path)?;
        runner
            .run(&invocation)
            .with_context(|| format!("label conversion failed for {case}"))?;
        if !mask_path.is_file() {
            return Err(ToolError::MissingOutput {
                program: label2vol.to_string(),
                path: mask_path,
            }
            .into());
        }
        validate_nifti(&mask_path)
            .with_context(|| format!("invalid lesion mask for {case}"))?;
        mark_complete("label2vol", &label_fingerprint, &mask_path)?;

        fs::remove_file(&label_copy)
            .with_context(|| format!("failed to remove {}", label_copy.display()))?;
    } else {
        info!(case = %case, label = %label_source.display(), "no lesion label, converting T1 only");
    }

    gzip_file(&t1_copy)?;
    mark_complete("gzip", &source_fingerprint, &t1_gz)?;
    Ok(CaseConversion::Converted { mask })
}

/// `{case}` is the full case id and `{case_no}` its trailing number.
/// `{case_no:N}` keeps the last `N` digits of the number, left-padded with
/// zeros to `N`, so `0{case_no:2}` names case `0103` as `003`.
pub fn expand_template(template: &str, case: &CaseId) -> Result<String> {
    let number = case.case_number().unwrap_or_default();
    let width_pattern =
        Regex::new(r"\{case_no:(\d+)\}").context("failed to compile case number pattern")?;
    let widened = width_pattern.replace_all(template, |caps: &Captures<'_>| {
        let width: usize = caps[1].parse().unwrap_or(0);
        let tail: String = {
            let chars: Vec<char> = number.chars().collect();
            chars[chars.len().saturating_sub(width)..].iter().collect()
        };
        format!("{tail:0>width$}")
    });

    Ok(widened
        .replace("{case_no}", number)
        .replace("{case}", case.as_str()))
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".gz");
    path.with_file_name(name)
}

/// Compresses `path` to `<path>.gz` and removes the original.
pub fn gzip_file(path: &Path) -> Result<PathBuf> {
    let output = gz_path(path);
    let input = File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let file = File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let mut encoder = GzEncoder::new(file, Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)
        .with_context(|| format!("failed to compress {}", path.display()))?;
    encoder
        .finish()
        .with_context(|| format!("failed to finish {}", output.display()))?;

    fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(output)
}

/// Copies `<source>/<source name>_participants_info.csv` into the target once.
pub fn transfer_participants_csv(source_dir: &Path, target_dir: &Path) -> Result<bool> {
    let Some(cohort) = source_dir
        .file_name()
        .and_then(|name| name.to_str())
    else {
        return Ok(false);
    };
    let csv_name = format!("{cohort}_participants_info.csv");
    let destination = target_dir.join(&csv_name);
    if destination.exists() {
        return Ok(false);
    }

    let source = source_dir.join(&csv_name);
    if !source.is_file() {
        warn!(path = %source.display(), "participants csv not found");
        return Ok(false);
    }
    copy_file(&source, &destination)?;
    info!(path = %destination.display(), "participants csv transferred");
    Ok(true)
}
