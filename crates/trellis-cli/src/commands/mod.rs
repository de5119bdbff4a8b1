//! Command implementations

pub mod pending;
pub mod report;
pub mod resume;
pub mod review;
pub mod triage;
