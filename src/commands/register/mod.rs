pub(crate) mod ants;
mod case;
mod dice;
pub(crate) mod registrar;
mod resolver;
mod run;
mod sidecar;
mod synthseg;

pub use resolver::resolve;
pub use run::{CASE_COMPLETE_FILE, run};
