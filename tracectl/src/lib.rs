// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Logging setup for the infra manager and runtime control of the per-target log levels.
//!
//! Crates declare their tracing targets with [`trace_target!`] (module-scoped) or
//! [`custom_target!`] (arbitrary target string, e.g. for third-party crates). The targets are
//! collected at link time, so the control object knows about every target in the binary before
//! the first event is emitted.

pub mod control;
pub mod targets;

pub use control::{TracingControl, TracingError, get_trace_ctl};
pub use tracing_subscriber::filter::LevelFilter;
