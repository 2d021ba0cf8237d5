mod colour;
mod discovery;
mod mri;
mod run;
#[cfg(test)]
mod tests;
mod workbook;

pub use run::run;
