//! REST API endpoint modules.

pub mod projects;
pub mod repo;
pub mod status;
