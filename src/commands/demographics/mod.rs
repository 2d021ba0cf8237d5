mod checks;
mod rules;
mod run;
#[cfg(test)]
mod tests;

pub use run::{qc_demographics, run};
