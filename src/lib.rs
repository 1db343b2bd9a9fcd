//! bootbox: container bootstrap for a single worker process
//!
//! Installs the packages an image needs, places the worker's runtime
//! configuration at a fixed path, then replaces itself with the worker so the
//! worker owns the container's PID and signals.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::manifest`]: `bootbox.json` build manifest with image defaults
//! - [`config::validator`]: startup validation, all errors reported together
//! - [`config::types`]: package specs, channels, [`BootError`]
//!
//! ## Provisioning ([`provision`])
//! - [`provision::channel`]: pure channel resolution into install batches
//! - [`provision::installer`]: apk/pip command installers
//! - [`provision::environment`]: the provisioned environment value
//!
//! ## Image Layout ([`layout`])
//! - [`layout::tree`]: source tree copy
//! - [`layout::materialize`]: atomic template materialization
//! - [`layout::record`]: build record and config digest
//!
//! ## Execution ([`exec`])
//! - [`exec::preexec`]: `Bootstrap<S>` type-state chain
//! - [`exec::command`]: entrypoint rendering and program resolution
//! - [`exec::forward`]: signal-forwarding supervisor for PID 1 images
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: lifecycle audit events
//!
//! ## Testing Infrastructure ([`testing`])
//! - in-memory package index installer and image fixtures
//!
//! # Lifecycle
//!
//! `BuildPending -> Provisioned -> Configured -> Running`. Every transition
//! consumes the previous state; only `Configured` can start the worker.

// Configuration
pub mod config;

// Package provisioning
pub mod provision;

// Image filesystem
pub mod layout;

// Worker execution
pub mod exec;

// Observability
pub mod observability;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the bootbox binary
pub mod cli;

pub use config::types::*;
pub use exec::preexec;
