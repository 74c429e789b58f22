// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Structured logging setup. Matches the teacher's use of `tracing` for
//! span/event instrumentation across the pipeline's async entry points;
//! unlike the teacher's full service, OpenTelemetry/Cloud Trace export is
//! dropped here — that's an HTTP-service-level concern out of scope for
//! the build core in isolation.
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, defaulting to `info` when unset.
pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  fmt().with_env_filter(filter).init();
}
