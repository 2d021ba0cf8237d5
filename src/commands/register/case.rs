use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::case_id::CaseId;
use crate::config::PipelineConfig;
use crate::model::{CaseReport, GalleryImage, Modality, RegistrationStatus};
use crate::render::{Plane, RenderedImage, Renderer};
use crate::util::{copy_file, display_relative, ensure_directory, file_name_string, space_t1_name};
use crate::volume::is_three_dimensional;

use super::registrar::{Registrar, Registration, RegistrationRequest};
use super::resolver::{ResolveError, present_modalities, resolve};
use super::sidecar::{copy_sidecar, sidecar_for, write_spatial_reference};

pub struct CaseContext<'a> {
    pub bids_root: &'a Path,
    pub save_dir: &'a Path,
    pub config: &'a PipelineConfig,
    pub registrar: &'a dyn Registrar,
    pub renderer: &'a Renderer,
}

#[derive(Debug, Error)]
pub enum CaseError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("no pre-operative T1 found")]
    MissingT1,
    #[error("pre-operative T1 is not a 3D volume: {}", .0.display())]
    T1NotThreeDimensional(PathBuf),
    #[error("{0:#}")]
    Output(#[from] anyhow::Error),
}

impl CaseContext<'_> {
    fn output_folder(&self, case: &CaseId, modality: Modality) -> PathBuf {
        self.save_dir.join(case.as_str()).join(modality.subfolder())
    }

    fn image_folder(&self, case: &CaseId) -> PathBuf {
        self.save_dir
            .join(&self.config.image_dir_name)
            .join(case.as_str())
    }
}

/// Registers, renders and summarises one case. Failures that stop the case
/// are recorded on the report rather than returned.
pub fn process_case(ctx: &CaseContext<'_>, case: &CaseId) -> CaseReport {
    let mut report = CaseReport::new(case.clone());
    if let Err(err) = register_case(ctx, &mut report) {
        warn!(case = %case, error = %err, "case failed");
        report.failure = Some(err.to_string());
    }
    report
}

fn register_case(ctx: &CaseContext<'_>, report: &mut CaseReport) -> Result<(), CaseError> {
    let case = report.case.clone();
    let case_dir = ctx.bids_root.join(case.as_str());
    report.present = present_modalities(&case_dir, &ctx.config.suffixes)?;
    report.paths = resolve(&case_dir, &ctx.config.suffixes)?;
    info!(case = %case, modalities = report.paths.len(), "resolved modalities");

    let fixed = report
        .paths
        .get(Modality::T1Preop)
        .map(Path::to_path_buf)
        .ok_or(CaseError::MissingT1)?;
    if !is_three_dimensional(&fixed)? {
        return Err(CaseError::T1NotThreeDimensional(fixed));
    }

    let anat_out = ctx.output_folder(&case, Modality::T1Preop);
    ensure_directory(&anat_out)?;
    let fixed_copy = anat_out.join(file_name_string(&fixed)?);
    copy_file(&fixed, &fixed_copy)?;
    copy_sidecar(&fixed, &fixed_copy)?;

    let image_dir = ctx.image_folder(&case);
    let mut renders: Vec<(String, Vec<RenderedImage>)> = Vec::new();
    render_into(ctx, report, &mut renders, &fixed, Modality::T1Preop, &image_dir);

    if !ctx.config.mask_in_flair {
        carry_mask(report, &anat_out)?;
    }

    for modality in Modality::MOVING {
        let Some(moving) = report.paths.get(modality).map(Path::to_path_buf) else {
            continue;
        };

        let status = match register_modality(ctx, &case, modality, &fixed, &moving)? {
            Ok(registration) => {
                render_into(ctx, report, &mut renders, &registration.warped, modality, &image_dir);
                if modality == Modality::FlairPreop && ctx.config.mask_in_flair {
                    warp_flair_mask(ctx, report, &registration, &fixed, &anat_out);
                }
                RegistrationStatus::Registered {
                    warped: registration.warped,
                    dice: registration.dice,
                }
            }
            Err(reason) => {
                warn!(case = %case, modality = modality.matrix_label(), reason = %reason, "modality not registered");
                report
                    .warnings
                    .push(format!("{} not registered: {reason}", modality.matrix_label()));
                RegistrationStatus::Unregistered { reason }
            }
        };
        report.outcomes.insert(modality, status);
    }

    if ctx.config.mask_in_flair
        && report.paths.is_present(Modality::LesionMask)
        && report.mask_in_t1.is_none()
    {
        let reason = "mask drawn on FLAIR but FLAIR was not registered".to_string();
        report.warnings.push(reason.clone());
        report
            .outcomes
            .insert(Modality::LesionMask, RegistrationStatus::Unregistered { reason });
    }

    let overlays = match report.mask_in_t1.clone() {
        Some(mask) => {
            let postop = report.outcome(Modality::T1Postop).warped().map(Path::to_path_buf);
            match ctx
                .renderer
                .render_overlay(&fixed, postop.as_deref(), &mask, &image_dir, case.as_str())
            {
                Ok(images) => images,
                Err(err) => {
                    report.warnings.push(format!("overlay rendering failed: {err:#}"));
                    Vec::new()
                }
            }
        }
        None => {
            info!(case = %case, "mask QC not possible as no mask in T1 space");
            Vec::new()
        }
    };

    report.images = gallery_images(ctx.save_dir, &renders, &overlays);
    Ok(())
}

/// `Ok(Err(reason))` is a modality that could not be registered; the outer
/// error is reserved for filesystem failures that stop the case.
fn register_modality(
    ctx: &CaseContext<'_>,
    case: &CaseId,
    modality: Modality,
    fixed: &Path,
    moving: &Path,
) -> Result<Result<Registration, String>, CaseError> {
    match is_three_dimensional(moving) {
        Ok(true) => {}
        Ok(false) => return Ok(Err("volume is not 3D".to_string())),
        Err(err) => return Ok(Err(format!("{err:#}"))),
    }

    let out_dir = ctx.output_folder(case, modality);
    let work_dir = ctx.save_dir.join(case.as_str()).join(ctx.registrar.name());
    ensure_directory(&out_dir)?;
    ensure_directory(&work_dir)?;

    let warped = out_dir.join(space_t1_name(&file_name_string(moving)?));
    let request = RegistrationRequest {
        modality,
        fixed,
        moving,
        warped: &warped,
        work_dir: &work_dir,
    };

    info!(case = %case, modality = modality.matrix_label(), registrar = ctx.registrar.name(), "registering");
    let registration = match ctx.registrar.register(&request) {
        Ok(registration) => registration,
        Err(err) => return Ok(Err(err.to_string())),
    };

    write_spatial_reference(&sidecar_for(moving), &sidecar_for(&warped), fixed)?;
    Ok(Ok(registration))
}

fn carry_mask(report: &mut CaseReport, anat_out: &Path) -> Result<(), CaseError> {
    let Some(mask) = report.paths.get(Modality::LesionMask).map(Path::to_path_buf) else {
        return Ok(());
    };

    match is_three_dimensional(&mask) {
        Ok(true) => {
            let copy = anat_out.join(file_name_string(&mask)?);
            copy_file(&mask, &copy)?;
            copy_sidecar(&mask, &copy)?;
            report.outcomes.insert(
                Modality::LesionMask,
                RegistrationStatus::Registered {
                    warped: copy.clone(),
                    dice: None,
                },
            );
            report.mask_in_t1 = Some(copy);
        }
        Ok(false) => {
            let reason = "mask is not a 3D volume".to_string();
            report.warnings.push(reason.clone());
            report
                .outcomes
                .insert(Modality::LesionMask, RegistrationStatus::Unregistered { reason });
        }
        Err(err) => {
            let reason = format!("{err:#}");
            report.warnings.push(format!("mask unreadable: {reason}"));
            report
                .outcomes
                .insert(Modality::LesionMask, RegistrationStatus::Unregistered { reason });
        }
    }
    Ok(())
}

fn warp_flair_mask(
    ctx: &CaseContext<'_>,
    report: &mut CaseReport,
    registration: &Registration,
    fixed: &Path,
    anat_out: &Path,
) {
    let Some(mask) = report.paths.get(Modality::LesionMask).map(Path::to_path_buf) else {
        return;
    };
    let status = match file_name_string(&mask) {
        Ok(name) => {
            let output = anat_out.join(space_t1_name(&name));
            match ctx.registrar.warp_label(registration, fixed, &mask, &output) {
                Ok(()) => {
                    report.mask_in_t1 = Some(output.clone());
                    RegistrationStatus::Registered {
                        warped: output,
                        dice: None,
                    }
                }
                Err(err) => RegistrationStatus::Unregistered {
                    reason: err.to_string(),
                },
            }
        }
        Err(err) => RegistrationStatus::Unregistered {
            reason: format!("{err:#}"),
        },
    };

    if let RegistrationStatus::Unregistered { reason } = &status {
        report.warnings.push(format!("mask not moved to T1 space: {reason}"));
    }
    report.outcomes.insert(Modality::LesionMask, status);
}

fn render_into(
    ctx: &CaseContext<'_>,
    report: &mut CaseReport,
    renders: &mut Vec<(String, Vec<RenderedImage>)>,
    volume: &Path,
    modality: Modality,
    image_dir: &Path,
) {
    let label = modality.image_label();
    match ctx
        .renderer
        .render_modality(volume, image_dir, report.case.as_str(), label)
    {
        Ok(images) => renders.push((label.to_string(), images)),
        Err(err) => {
            warn!(case = %report.case, modality = label, error = %err, "qc rendering failed");
            report
                .warnings
                .push(format!("{label} rendering failed: {err:#}"));
        }
    }
}

/// All sagittal views, then all coronal views, then the overlays.
fn gallery_images(
    save_dir: &Path,
    renders: &[(String, Vec<RenderedImage>)],
    overlays: &[RenderedImage],
) -> Vec<GalleryImage> {
    let mut images = Vec::new();
    for plane in Plane::BOTH {
        for (label, rendered) in renders {
            for image in rendered.iter().filter(|image| image.plane == plane) {
                images.push(GalleryImage {
                    description: format!("{label} {}", plane.caption()),
                    path: display_relative(&image.path, save_dir),
                });
            }
        }
    }
    for overlay in overlays {
        images.push(GalleryImage {
            description: format!("{}-Overlay", overlay.plane.caption()),
            path: display_relative(&overlay.path, save_dir),
        });
    }
    images
}
