pub mod convert;
pub mod demographics;
pub mod gallery;
pub mod inventory;
pub mod mni;
pub mod register;
pub mod status;
pub mod summarise;
