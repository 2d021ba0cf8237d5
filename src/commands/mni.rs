//! Coregistration of T1 volumes and lesion masks to an MNI template.
//!
//! Each case with a lesion mask is bias-corrected with N4, skull-stripped with
//! `bet`, registered to the skull-stripped template with SyN, and both the
//! original T1 and the mask are resampled through that transform. Every step
//! carries a completion marker, so reruns pick up where a case stopped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::case_id::{CaseId, enumerate_cases};
use crate::cli::CoregisterMniArgs;
use crate::commands::register::ants::AntsRegistrar;
use crate::commands::register::registrar::{Registrar, RegistrationRequest, run_step};
use crate::commands::register::resolve;
use crate::config::{PipelineConfig, ToolConfig, TransformKind};
use crate::model::Modality;
use crate::tools::{SystemToolRunner, ToolInvocation, ToolRunner};
use crate::util::ensure_directory;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MniCounts {
    pub coregistered: usize,
    pub without_mask: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MniOutcome {
    Coregistered { mask: PathBuf },
    NoLesionMask,
}

/// Files written for one case under `<output>/<case>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MniPaths {
    pub unbiased: PathBuf,
    pub brain: PathBuf,
    pub brain_in_mni: PathBuf,
    pub t1_in_mni: PathBuf,
    pub mask_in_mni: PathBuf,
}

impl MniPaths {
    pub fn new(output_dir: &Path, case: &CaseId) -> Self {
        let dir = output_dir.join(case.as_str());
        let file = |suffix: &str| dir.join(format!("{case}_{suffix}.nii.gz"));
        Self {
            unbiased: file("T1unbias"),
            brain: file("T1brain"),
            brain_in_mni: file("T1brain_in_MNI"),
            t1_in_mni: file("T1_in_MNI"),
            mask_in_mni: file("lesionmask_in_MNI"),
        }
    }
}

pub fn run(args: CoregisterMniArgs) -> Result<()> {
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(timeout_secs) = args.timeout_secs {
        config.tools.timeout_secs = timeout_secs;
    }

    if !args.bids_root.is_dir() {
        bail!("input directory does not exist: {}", args.bids_root.display());
    }
    if !args.template.is_file() {
        bail!("MNI template not found: {}", args.template.display());
    }
    ensure_directory(&args.output_dir)?;

    let cases: Vec<CaseId> = enumerate_cases(
        &args.bids_root,
        args.subject_list.as_deref(),
        &args.cases,
        "sub",
    )?
    .iter()
    .map(|case| CaseId::new(case.compact()))
    .collect();

    info!(
        bids_root = %args.bids_root.display(),
        output_dir = %args.output_dir.display(),
        template = %args.template.display(),
        cases = cases.len(),
        "starting MNI coregistration"
    );

    let runner = SystemToolRunner::new(config.tools.timeout());
    let counts = coregister_cases(
        &runner,
        &config,
        &args.bids_root,
        &args.output_dir,
        &args.template,
        &cases,
    );

    info!(
        coregistered = counts.coregistered,
        without_mask = counts.without_mask,
        failed = counts.failed,
        "MNI coregistration completed"
    );
    if counts.failed > 0 {
        bail!("{} of {} cases failed MNI coregistration", counts.failed, cases.len());
    }
    Ok(())
}

pub fn coregister_cases(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    bids_root: &Path,
    output_dir: &Path,
    template: &Path,
    cases: &[CaseId],
) -> MniCounts {
    let mut counts = MniCounts::default();
    for case in cases {
        match coregister_case(runner, config, bids_root, output_dir, template, case) {
            Ok(MniOutcome::Coregistered { mask }) => {
                info!(case = %case, mask = %mask.display(), "case in MNI space");
                counts.coregistered += 1;
            }
            Ok(MniOutcome::NoLesionMask) => {
                info!(case = %case, "no lesion mask, skipping");
                counts.without_mask += 1;
            }
            Err(err) => {
                warn!(case = %case, error = %format!("{err:#}"), "MNI coregistration failed");
                counts.failed += 1;
            }
        }
    }
    counts
}

pub fn coregister_case(
    runner: &dyn ToolRunner,
    config: &PipelineConfig,
    bids_root: &Path,
    output_dir: &Path,
    template: &Path,
    case: &CaseId,
) -> Result<MniOutcome> {
    let modalities = resolve(&bids_root.join(case.as_str()), &config.suffixes)?;
    let t1 = modalities
        .get(Modality::T1Preop)
        .with_context(|| format!("no pre-operative T1 for {case}"))?;
    let Some(mask) = modalities.get(Modality::LesionMask) else {
        return Ok(MniOutcome::NoLesionMask);
    };

    let paths = MniPaths::new(output_dir, case);
    ensure_directory(&output_dir.join(case.as_str()))?;

    correct_bias(runner, &config.tools, t1, &paths.unbiased)?;
    strip_skull(runner, &config.tools, &paths.unbiased, &paths.brain)?;

    let registrar = AntsRegistrar::new(runner, &config.tools, TransformKind::Syn);
    let registration = registrar.register(&RegistrationRequest {
        modality: Modality::T1Preop,
        fixed: template,
        moving: &paths.brain,
        warped: &paths.brain_in_mni,
        work_dir: &output_dir.join(case.as_str()),
    })?;
    registrar.warp_image(&registration, template, t1, &paths.t1_in_mni)?;
    registrar.warp_label(&registration, template, mask, &paths.mask_in_mni)?;

    Ok(MniOutcome::Coregistered {
        mask: paths.mask_in_mni,
    })
}

fn correct_bias(
    runner: &dyn ToolRunner,
    tools: &ToolConfig,
    t1: &Path,
    output: &Path,
) -> Result<()> {
    let invocation = ToolInvocation::new(&tools.n4_bias_correction)
        .arg("-d")
        .arg("3")
        .path_arg("-i", t1)
        .path_arg("-o", output);
    run_step(runner, "n4_bias_correction", &invocation, output)?;
    Ok(())
}

fn strip_skull(
    runner: &dyn ToolRunner,
    tools: &ToolConfig,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let invocation = ToolInvocation::new(&tools.bet)
        .arg(input.as_os_str())
        .arg(output.as_os_str());
    run_step(runner, "bet", &invocation, output)?;
    Ok(())
}
