use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::markers::{invocation_fingerprint, is_complete, mark_complete};
use crate::model::{DiceSummary, Modality};
use crate::tools::{ToolError, ToolInvocation, ToolRunner};
use crate::util::is_nifti_name;
use crate::volume::validate_nifti;

pub struct RegistrationRequest<'a> {
    pub modality: Modality,
    pub fixed: &'a Path,
    pub moving: &'a Path,
    pub warped: &'a Path,
    pub work_dir: &'a Path,
}

/// What a later label warp needs to replay a registration.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformHandle {
    Ants { transforms: Vec<PathBuf> },
    DisplacementField { field: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub warped: PathBuf,
    pub transform: TransformHandle,
    pub dice: Option<DiceSummary>,
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("{step} failed: {source}")]
    Tool {
        step: &'static str,
        #[source]
        source: ToolError,
    },
    #[error("{step} produced an unusable output {}: {reason}", path.display())]
    InvalidOutput {
        step: &'static str,
        path: PathBuf,
        reason: String,
    },
    #[error("{step} inputs could not be fingerprinted: {reason}")]
    Fingerprint { step: &'static str, reason: String },
    #[error("dice scoring failed: {0}")]
    Dice(String),
    #[error("{registrar} cannot replay a {found} transform")]
    IncompatibleTransform {
        registrar: &'static str,
        found: &'static str,
    },
}

pub trait Registrar {
    /// Also names the per-case work folder.
    fn name(&self) -> &'static str;

    fn register(&self, request: &RegistrationRequest<'_>)
    -> Result<Registration, RegistrationError>;

    /// Resamples a label volume with an existing registration's transform.
    fn warp_label(
        &self,
        registration: &Registration,
        fixed: &Path,
        label: &Path,
        output: &Path,
    ) -> Result<(), RegistrationError>;
}

impl TransformHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ants { .. } => "ants",
            Self::DisplacementField { .. } => "displacement-field",
        }
    }
}

/// Runs one tool step unless `output` carries a marker from this exact
/// invocation over the same inputs, then validates the output and marks it.
pub fn run_step(
    runner: &dyn ToolRunner,
    step: &'static str,
    invocation: &ToolInvocation,
    output: &Path,
) -> Result<(), RegistrationError> {
    let fingerprint =
        invocation_fingerprint(invocation, output).map_err(|err| RegistrationError::Fingerprint {
            step,
            reason: format!("{err:#}"),
        })?;
    if is_complete(step, &fingerprint, output) {
        debug!(step, path = %output.display(), "step already complete");
        return Ok(());
    }

    debug!(step, command = %invocation.render(), "running step");
    runner
        .run(invocation)
        .map_err(|source| RegistrationError::Tool { step, source })?;

    verify_output(step, output)?;
    mark_complete(step, &fingerprint, output).map_err(|err| RegistrationError::InvalidOutput {
        step,
        path: output.to_path_buf(),
        reason: format!("{err:#}"),
    })?;
    Ok(())
}

pub fn verify_output(step: &'static str, output: &Path) -> Result<(), RegistrationError> {
    let invalid = |reason: String| RegistrationError::InvalidOutput {
        step,
        path: output.to_path_buf(),
        reason,
    };

    let metadata = output
        .metadata()
        .map_err(|_| invalid("output was not written".to_string()))?;
    if metadata.len() == 0 {
        return Err(invalid("output is empty".to_string()));
    }

    let is_volume = output
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(is_nifti_name);
    if is_volume {
        validate_nifti(output).map_err(|err| invalid(format!("{err:#}")))?;
    }
    Ok(())
}
