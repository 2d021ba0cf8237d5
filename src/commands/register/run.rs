use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::info;

use crate::case_id::{CaseId, enumerate_cases};
use crate::cli::{RegisterArgs, RegistrationMethod};
use crate::config::PipelineConfig;
use crate::gallery::Gallery;
use crate::markers::clear_markers;
use crate::matrix::{MatrixRow, QcMatrix};
use crate::model::{
    CaseCompletion, CaseFailure, Modality, RegisterCounts, RegisterPaths, RegisterRunManifest,
    RegistrationStatus,
};
use crate::render::Renderer;
use crate::tools::{SystemToolRunner, VERSION_TIMEOUT, collect_tool_versions};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

use super::ants::AntsRegistrar;
use super::case::{CaseContext, process_case};
use super::registrar::Registrar;
use super::synthseg::SynthSegRegistrar;

pub const CASE_COMPLETE_FILE: &str = "case_complete.json";

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub counts: RegisterCounts,
    pub failures: Vec<CaseFailure>,
    pub warnings: Vec<String>,
}

pub fn run(args: RegisterArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if args.mask_in_flair {
        config.mask_in_flair = true;
    }
    if args.affine_only {
        config.affine_only = true;
    }
    if let Some(transform) = args.transform {
        config.transform = transform;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.tools.timeout_secs = timeout_secs;
    }

    if !args.bids_root.is_dir() {
        bail!("input directory does not exist: {}", args.bids_root.display());
    }
    ensure_directory(&args.save_dir)?;

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
        save_dir = %args.save_dir.display(),
        run_id = %run_id,
        cases = cases.len(),
        method = args.method.as_str(),
        "starting registration"
    );

    let runner = SystemToolRunner::new(config.tools.timeout());
    let registrar: Box<dyn Registrar + '_> = match args.method {
        RegistrationMethod::Simple => Box::new(AntsRegistrar::new(
            &runner,
            &config.tools,
            config.transform,
        )),
        RegistrationMethod::Synthseg => Box::new(SynthSegRegistrar::new(
            &runner,
            &config.tools,
            config.affine_only,
        )),
    };
    let renderer = Renderer::new(config.panel_scale);
    let tool_versions =
        collect_tool_versions(&SystemToolRunner::new(VERSION_TIMEOUT), &config.tools);

    let ctx = CaseContext {
        bids_root: &args.bids_root,
        save_dir: &args.save_dir,
        config: &config,
        registrar: registrar.as_ref(),
        renderer: &renderer,
    };
    let summary = register_cases(&ctx, &cases, args.force)?;

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.save_dir.join("manifests").join(format!(
            "register_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let status = if summary.failures.is_empty() {
        "completed"
    } else {
        "completed_with_failures"
    };
    let manifest = RegisterRunManifest {
        manifest_version: 1,
        run_id,
        status: status.to_string(),
        method: args.method.as_str().to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: std::env::args().collect::<Vec<_>>().join(" "),
        tool_versions,
        paths: RegisterPaths {
            bids_root: args.bids_root.display().to_string(),
            save_dir: args.save_dir.display().to_string(),
            matrix_path: args.save_dir.join(&config.matrix_file_name).display().to_string(),
            markdown_path: args
                .save_dir
                .join(&config.markdown_file_name)
                .display()
                .to_string(),
            html_path: args.save_dir.join(&config.html_file_name).display().to_string(),
        },
        counts: summary.counts.clone(),
        failures: summary.failures.clone(),
        warnings: summary.warnings.clone(),
    };
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote register run manifest");

    info!(
        processed = summary.counts.processed_case_count,
        skipped = summary.counts.skipped_case_count,
        failed = summary.counts.failed_case_count,
        registered = summary.counts.registered_modality_count,
        unregistered = summary.counts.unregistered_modality_count,
        "registration completed"
    );

    if !summary.failures.is_empty() {
        bail!(
            "{} of {} cases failed; see {}",
            summary.failures.len(),
            cases.len(),
            manifest_path.display()
        );
    }
    Ok(())
}

/// Processes cases in order, persisting the matrix and gallery after each one.
pub fn register_cases(
    ctx: &CaseContext<'_>,
    cases: &[CaseId],
    force: bool,
) -> Result<BatchSummary> {
    let config = ctx.config;
    let mut matrix = QcMatrix::load_or_new(&ctx.save_dir.join(&config.matrix_file_name))?;
    let gallery = Gallery::open(
        &ctx.save_dir.join(&config.markdown_file_name),
        &config.markdown_title,
    )?;

    let mut summary = BatchSummary::default();
    summary.counts.case_count = cases.len();

    for case in cases {
        let completion_path = case_completion_path(ctx.save_dir, case);
        if !force && completion_path.exists() {
            info!(case = %case, "case already complete, skipping");
            summary.counts.skipped_case_count += 1;
            continue;
        }

        if force {
            let cleared = clear_markers(&ctx.save_dir.join(case.as_str()))?;
            if cleared > 0 {
                info!(case = %case, cleared, "cleared step markers");
            }
        }

        let started = Instant::now();
        info!(case = %case, "registration starting");
        let report = process_case(ctx, case);

        matrix.upsert(MatrixRow::from_report(&report));
        matrix.persist()?;

        summary.counts.processed_case_count += 1;
        summary.counts.registered_modality_count += report.registered_count();
        summary.counts.unregistered_modality_count += report.unregistered_count();
        summary.warnings.extend(
            report
                .warnings
                .iter()
                .map(|warning| format!("{case}: {warning}")),
        );

        match &report.failure {
            Some(reason) => {
                summary.counts.failed_case_count += 1;
                summary.failures.push(CaseFailure {
                    case: case.to_string(),
                    reason: reason.clone(),
                });
            }
            None => {
                gallery.append_case(&report)?;
                let completion = CaseCompletion {
                    case: case.to_string(),
                    completed_at: now_utc_string(),
                    registered: modalities_where(&report.outcomes, |status| {
                        status.is_registered()
                    }),
                    unregistered: modalities_where(&report.outcomes, |status| {
                        matches!(status, RegistrationStatus::Unregistered { .. })
                    }),
                };
                write_json_pretty(&completion_path, &completion)?;
            }
        }

        info!(
            case = %case,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "registration complete"
        );
    }

    gallery.render_html(&ctx.save_dir.join(&config.html_file_name))?;
    Ok(summary)
}

pub fn case_completion_path(save_dir: &Path, case: &CaseId) -> PathBuf {
    save_dir.join(case.as_str()).join(CASE_COMPLETE_FILE)
}

fn modalities_where(
    outcomes: &BTreeMap<Modality, RegistrationStatus>,
    predicate: impl Fn(&RegistrationStatus) -> bool,
) -> Vec<Modality> {
    outcomes
        .iter()
        .filter(|(_, status)| predicate(status))
        .map(|(modality, _)| *modality)
        .collect()
}
