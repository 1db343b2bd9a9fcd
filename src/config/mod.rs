//! Configuration
//!
//! Build manifest loading, validation and the shared domain types.

pub mod manifest;
pub mod types;
pub mod validator;
