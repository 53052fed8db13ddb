pub mod aggregate;
mod clean;
mod core;
pub mod relocate;
pub mod report;
pub mod steps;

pub use clean::clean;
pub use core::Session;
pub use report::{BuildReport, Outcome};
