use std::path::{Path, PathBuf};

use crate::config::ToolConfig;
use crate::model::Modality;
use crate::tools::{ToolInvocation, ToolRunner};
use crate::util::derived_path;
use crate::volume::load_labels;

use super::dice::dice_summary;
use super::registrar::{
    Registrar, Registration, RegistrationError, RegistrationRequest, TransformHandle, run_step,
};

/// Segmentation-guided registration: SynthSeg parcellations of both images
/// drive EasyReg, and the warped image is re-segmented to score the result.
pub struct SynthSegRegistrar<'a> {
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
    affine_only: bool,
}

impl<'a> SynthSegRegistrar<'a> {
    pub fn new(runner: &'a dyn ToolRunner, tools: &'a ToolConfig, affine_only: bool) -> Self {
        Self {
            runner,
            tools,
            affine_only,
        }
    }

    fn segment(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, RegistrationError> {
        let output = derived_path(work_dir, input, "_synthseg.nii.gz");
        let invocation = ToolInvocation::new(&self.tools.synthseg)
            .path_arg("--i", input)
            .path_arg("--o", work_dir)
            .arg("--parc")
            .arg("--robust")
            .path_arg("--resample", work_dir);
        run_step(self.runner, "synthseg", &invocation, &output)?;
        Ok(output)
    }

    /// Post-operative scans are synthesised into a clean T1 contrast first.
    fn synthesise(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, RegistrationError> {
        let output = derived_path(work_dir, input, "_synthsr.nii.gz");
        let invocation = ToolInvocation::new(&self.tools.synthsr)
            .path_arg("--i", input)
            .path_arg("--o", work_dir);
        run_step(self.runner, "synthsr", &invocation, &output)?;
        Ok(output)
    }

    fn warp(
        &self,
        input: &Path,
        output: &Path,
        field: &Path,
        nearest: bool,
    ) -> Result<(), RegistrationError> {
        let invocation = ToolInvocation::new(&self.tools.easywarp)
            .path_arg("--i", input)
            .path_arg("--o", output)
            .path_arg("--field", field)
            .flag_if(nearest, "--nearest");
        run_step(self.runner, "easywarp", &invocation, output)
    }
}

impl Registrar for SynthSegRegistrar<'_> {
    fn name(&self) -> &'static str {
        "synthseg"
    }

    fn register(
        &self,
        request: &RegistrationRequest<'_>,
    ) -> Result<Registration, RegistrationError> {
        let work_dir = request.work_dir;
        let fixed_seg = self.segment(request.fixed, work_dir)?;

        let floating = if request.modality == Modality::T1Postop {
            self.synthesise(request.moving, work_dir)?
        } else {
            request.moving.to_path_buf()
        };
        let floating_seg = self.segment(&floating, work_dir)?;

        let field = derived_path(work_dir, request.moving, "_fwdfield.nii.gz");
        let easyreg = ToolInvocation::new(&self.tools.easyreg)
            .path_arg("--ref", request.fixed)
            .path_arg("--flo", &floating)
            .path_arg("--ref_seg", &fixed_seg)
            .path_arg("--flo_seg", &floating_seg)
            .path_arg("--fwd_field", &field)
            .flag_if(self.affine_only, "--affine_only");
        run_step(self.runner, "easyreg", &easyreg, &field)?;

        self.warp(request.moving, request.warped, &field, false)?;

        let warped_seg = derived_path(work_dir, request.moving, "_synthseg_warp.nii.gz");
        let resegment = ToolInvocation::new(&self.tools.synthseg)
            .path_arg("--i", request.warped)
            .path_arg("--o", &warped_seg)
            .arg("--parc");
        run_step(self.runner, "synthseg_warped", &resegment, &warped_seg)?;

        let reference = load_labels(&fixed_seg)
            .map_err(|err| RegistrationError::Dice(format!("{err:#}")))?;
        let resegmented = load_labels(&warped_seg)
            .map_err(|err| RegistrationError::Dice(format!("{err:#}")))?;
        let dice = dice_summary(&reference, &resegmented)
            .map_err(|err| RegistrationError::Dice(format!("{err:#}")))?;

        Ok(Registration {
            warped: request.warped.to_path_buf(),
            transform: TransformHandle::DisplacementField { field },
            dice: Some(dice),
        })
    }

    fn warp_label(
        &self,
        registration: &Registration,
        _fixed: &Path,
        label: &Path,
        output: &Path,
    ) -> Result<(), RegistrationError> {
        let TransformHandle::DisplacementField { field } = &registration.transform else {
            return Err(RegistrationError::IncompatibleTransform {
                registrar: self.name(),
                found: registration.transform.kind(),
            });
        };
        self.warp(label, output, field, true)
    }
}
