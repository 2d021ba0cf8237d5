use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::TransformKind;

#[derive(Parser, Debug)]
#[command(
    name = "meld-qc",
    version,
    about = "Coregistration and quality-control tooling for MELD imaging cohorts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a raw cohort export into the BIDS-like case layout.
    Convert(ConvertArgs),
    /// List every case and the modality files it provides.
    Inventory(InventoryArgs),
    /// Coregister each case to its pre-operative T1 and build the QC reports.
    Register(RegisterArgs),
    /// Bias-correct, skull-strip and warp each T1 and lesion mask into MNI space.
    CoregisterMni(CoregisterMniArgs),
    /// Re-render the HTML gallery from the Markdown gallery.
    Gallery(GalleryArgs),
    /// Check a participants sheet against the demographic rules.
    Demographics(DemographicsArgs),
    /// Combine demographic and imaging QC of every site into one workbook.
    Summarise(SummariseArgs),
    /// Report the latest register run, QC matrix counts and completed cases.
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RegistrationMethod {
    /// ANTs registration with the configured transform.
    Simple,
    /// SynthSeg-guided EasyReg registration with Dice scoring.
    Synthseg,
}

impl RegistrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Synthseg => "synthseg",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    #[arg(long)]
    pub source_dir: PathBuf,

    #[arg(long)]
    pub target_dir: PathBuf,

    #[arg(long = "case")]
    pub cases: Vec<String>,

    #[arg(long)]
    pub subject_list: Option<PathBuf>,

    /// T1 file name inside each case folder; `{case}`, `{case_no}` and
    /// `{case_no:N}` (last N digits, zero padded) are expanded.
    #[arg(long, default_value = "{case}.nii")]
    pub t1_template: String,

    #[arg(long, default_value = "fcd.label")]
    pub label_name: String,

    #[arg(long, default_value = "3T")]
    pub field_strength: String,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long)]
    pub bids_root: PathBuf,

    #[arg(long = "case")]
    pub cases: Vec<String>,

    #[arg(long)]
    pub subject_list: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    #[arg(long)]
    pub bids_root: PathBuf,

    #[arg(long)]
    pub save_dir: PathBuf,

    #[arg(long)]
    pub subject_list: Option<PathBuf>,

    #[arg(long = "case")]
    pub cases: Vec<String>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = RegistrationMethod::Simple)]
    pub method: RegistrationMethod,

    /// Reprocess cases that already carry a completion marker, rerunning every tool step.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long, default_value_t = false)]
    pub mask_in_flair: bool,

    #[arg(long, default_value_t = false)]
    pub affine_only: bool,

    #[arg(long, value_enum)]
    pub transform: Option<TransformKind>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CoregisterMniArgs {
    #[arg(long)]
    pub bids_root: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    /// Skull-stripped MNI template, e.g. `mni_icbm152_t1_tal_nlin_sym_09a_brain.nii`.
    #[arg(long)]
    pub template: PathBuf,

    #[arg(long = "case")]
    pub cases: Vec<String>,

    #[arg(long)]
    pub subject_list: Option<PathBuf>,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct GalleryArgs {
    #[arg(long)]
    pub save_dir: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DemographicsArgs {
    #[arg(short, long)]
    pub file: PathBuf,

    #[arg(long)]
    pub site: String,

    #[arg(short, long)]
    pub output_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SummariseArgs {
    #[arg(short, long)]
    pub dir: PathBuf,

    #[arg(long)]
    pub site: Option<String>,

    /// CSV output; the workbook is written next to it with an `.xlsx` extension.
    #[arg(short, long)]
    pub output_file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub save_dir: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,
}
