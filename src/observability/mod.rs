//! Observability
//!
//! Structured lifecycle audit events on the `bootbox::audit` log target.

pub mod audit;
