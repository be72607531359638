//! HTTP route definitions

pub mod operations;
pub mod system;
