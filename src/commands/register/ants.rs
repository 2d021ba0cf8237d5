use std::path::{Path, PathBuf};

use crate::config::{ToolConfig, TransformKind};
use crate::tools::{ToolInvocation, ToolRunner};
use crate::util::nifti_stem;

use super::registrar::{
    Registrar, Registration, RegistrationError, RegistrationRequest, TransformHandle, run_step,
    verify_output,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interpolation {
    Linear,
    NearestNeighbor,
}

impl Interpolation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "Linear",
            Self::NearestNeighbor => "NearestNeighbor",
        }
    }
}

/// Quick rigid, affine or SyN registration with ANTs command-line tools.
pub struct AntsRegistrar<'a> {
    runner: &'a dyn ToolRunner,
    tools: &'a ToolConfig,
    transform: TransformKind,
}

impl<'a> AntsRegistrar<'a> {
    pub fn new(runner: &'a dyn ToolRunner, tools: &'a ToolConfig, transform: TransformKind) -> Self {
        Self {
            runner,
            tools,
            transform,
        }
    }

    fn apply(
        &self,
        fixed: &Path,
        moving: &Path,
        output: &Path,
        transforms: &[PathBuf],
        interpolation: Interpolation,
    ) -> Result<(), RegistrationError> {
        let mut invocation = ToolInvocation::new(&self.tools.ants_apply_transforms)
            .arg("-d")
            .arg("3")
            .path_arg("-i", moving)
            .path_arg("-r", fixed)
            .path_arg("-o", output);
        for transform in transforms {
            invocation = invocation.path_arg("-t", transform);
        }
        invocation = invocation.arg("-n").arg(interpolation.as_str());

        run_step(self.runner, "ants_apply_transforms", &invocation, output)
    }

    /// Resamples an intensity image with the transforms of `registration`.
    pub fn warp_image(
        &self,
        registration: &Registration,
        fixed: &Path,
        image: &Path,
        output: &Path,
    ) -> Result<(), RegistrationError> {
        let transforms = self.transforms_of(registration)?;
        self.apply(fixed, image, output, transforms, Interpolation::Linear)
    }

    fn transforms_of<'r>(
        &self,
        registration: &'r Registration,
    ) -> Result<&'r [PathBuf], RegistrationError> {
        match &registration.transform {
            TransformHandle::Ants { transforms } => Ok(transforms),
            other => Err(RegistrationError::IncompatibleTransform {
                registrar: self.name(),
                found: other.kind(),
            }),
        }
    }
}

impl Registrar for AntsRegistrar<'_> {
    fn name(&self) -> &'static str {
        "ants"
    }

    fn register(
        &self,
        request: &RegistrationRequest<'_>,
    ) -> Result<Registration, RegistrationError> {
        let stem = request
            .moving
            .file_name()
            .map(|name| nifti_stem(&name.to_string_lossy()).to_string())
            .unwrap_or_default();
        let prefix = request.work_dir.join(format!("{stem}_"));
        let affine = request.work_dir.join(format!("{stem}_0GenericAffine.mat"));
        let warp_field = request.work_dir.join(format!("{stem}_1Warp.nii.gz"));

        let invocation = ToolInvocation::new(&self.tools.ants_registration)
            .arg("-d")
            .arg("3")
            .path_arg("-f", request.fixed)
            .path_arg("-m", request.moving)
            .path_arg("-o", &prefix)
            .arg("-t")
            .arg(self.transform.ants_flag());
        run_step(self.runner, "ants_registration", &invocation, &affine)?;

        let transforms = if self.transform.has_warp_field() {
            verify_output("ants_registration", &warp_field)?;
            vec![warp_field, affine]
        } else {
            vec![affine]
        };

        self.apply(
            request.fixed,
            request.moving,
            request.warped,
            &transforms,
            Interpolation::Linear,
        )?;

        Ok(Registration {
            warped: request.warped.to_path_buf(),
            transform: TransformHandle::Ants { transforms },
            dice: None,
        })
    }

    fn warp_label(
        &self,
        registration: &Registration,
        fixed: &Path,
        label: &Path,
        output: &Path,
    ) -> Result<(), RegistrationError> {
        let transforms = self.transforms_of(registration)?;
        self.apply(fixed, label, output, transforms, Interpolation::NearestNeighbor)
    }
}
