// Copyright 2024 the registry authors. All rights reserved. MIT license.
use thiserror::Error;

/// The error kinds enumerated in spec.md §7. Every variant aborts the
/// current build; the pipeline is responsible for removing the working
/// directory and not writing a cache entry when any variant is returned
/// (spec.md §7 "Propagation policy").
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("install failed: {0}")]
  InstallFailed(String),

  #[error("could not determine module shape for {path}: {source}")]
  ProbeFailed {
    path: String,
    #[source]
    source: anyhow::Error,
  },

  #[error("bundle failed: {0}")]
  BundleFailed(String),

  #[error("io failed: {0}")]
  IoFailed(#[from] std::io::Error),
}

pub type BuildResult<T> = Result<T, BuildError>;
