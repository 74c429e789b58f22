// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! `Install(list of name@version) -> materialized tree at <workDir>/node_modules`
//! (spec.md §4.3). The installer itself is a subprocess — in practice a
//! registry client such as `yarn add` — invoked with a per-build working
//! directory under the system temp directory, removed unconditionally once
//! the build finishes.
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::instrument;

use crate::errors::BuildError;
use crate::model::PackageRef;

/// An isolated working directory for one build. Dropping it removes the
/// directory tree (spec.md §5 "Working directory: exclusive per build;
/// removed on exit by a guaranteed cleanup arranged at build start") —
/// callers hold this for the lifetime of the whole pipeline run, not just
/// the install step, so the guarantee covers Resolver/Prober/Bundler too.
pub struct WorkDir(TempDir);

impl WorkDir {
  pub fn node_modules(&self) -> std::path::PathBuf {
    self.0.path().join("node_modules")
  }

  pub fn path(&self) -> &std::path::Path {
    self.0.path()
  }
}

pub struct RegistryInstaller {
  installer_bin: String,
  timeout: Duration,
}

impl RegistryInstaller {
  pub fn new(installer_bin: impl Into<String>, timeout: Duration) -> Self {
    RegistryInstaller {
      installer_bin: installer_bin.into(),
      timeout,
    }
  }

  /// Creates a fresh working directory and materializes `packages` into its
  /// `node_modules`. The directory is destroyed by the caller via the
  /// returned [`WorkDir`]'s `Drop` impl regardless of outcome, including on
  /// error (the `TempDir` is constructed first and dropped on early return).
  #[instrument(skip(self, packages), err)]
  pub async fn install(&self, packages: &[PackageRef]) -> Result<WorkDir, BuildError> {
    let dir = tempfile::Builder::new()
      .prefix("registry-build-")
      .tempdir()
      .map_err(BuildError::IoFailed)?;

    self.install_into(dir.path(), packages).await?;
    Ok(WorkDir(dir))
  }

  /// Adds `packages` to an already-materialized working directory — used to
  /// install true peers discovered by the Metadata Resolver after the
  /// initial install (spec.md §4.4 "True peers are added to the install
  /// list").
  #[instrument(skip(self, packages), err)]
  pub async fn install_into(
    &self,
    dir: &std::path::Path,
    packages: &[PackageRef],
  ) -> Result<(), BuildError> {
    if packages.is_empty() {
      return Ok(());
    }

    let specs: Vec<String> = packages
      .iter()
      .map(|p| format!("{}@{}", p.name, p.version))
      .collect();

    let mut cmd = Command::new(&self.installer_bin);
    cmd
      .arg("add")
      .args(&specs)
      .current_dir(dir)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let output = tokio::time::timeout(self.timeout, cmd.output())
      .await
      .map_err(|_| BuildError::InstallFailed(format!("installer timed out after {:?}", self.timeout)))?
      .map_err(BuildError::IoFailed)?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(BuildError::InstallFailed(format!(
        "{} exited with {}: {}",
        self.installer_bin, output.status, stderr
      )));
    }

    Ok(())
  }
}
