//! Request parsing and validation shared by the route handlers

pub mod operations;
