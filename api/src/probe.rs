// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! `Probe(workDir, entryRelativePath) -> (exports, isESM)` (spec.md §4.5).
//! Classifies a resolved entry by static inspection of its source, and
//! enumerates its exported names — for ESM sources by regex extraction, for
//! CommonJS sources by delegating to a CJS-lexer subprocess.
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::instrument;

use crate::errors::BuildError;

static ESM_SYNTAX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?m)^\s*(export|import)\s").unwrap());

static EXPORT_NAMED_DECL: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"(?m)^\s*export\s+(?:const|let|var|function\*?|class|async\s+function)\s+([A-Za-z_$][\w$]*)").unwrap()
});

static EXPORT_BRACE_LIST: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?m)^\s*export\s*\{([^}]*)\}").unwrap());

static EXPORT_DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*export\s+default\b").unwrap());

static EXPORT_STAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*export\s*\*\s").unwrap());

pub struct ModuleShapeProber {
  cjs_lexer_bin: String,
  timeout: Duration,
}

impl ModuleShapeProber {
  pub fn new(cjs_lexer_bin: impl Into<String>, timeout: Duration) -> Self {
    ModuleShapeProber {
      cjs_lexer_bin: cjs_lexer_bin.into(),
      timeout,
    }
  }

  /// Probes `<work_dir>/<entry_relative_path>`. If `module` was declared but
  /// the entry turns out not to be ESM, callers re-probe having cleared
  /// `module` on the caller's [`crate::model::ImportMeta`] (spec.md §4.5
  /// "If `module` is declared but probing classifies it as non-ESM...").
  #[instrument(skip(self), err)]
  pub async fn probe(
    &self,
    work_dir: &Path,
    entry_relative_path: &str,
  ) -> Result<(Vec<String>, bool), BuildError> {
    let path = work_dir.join(entry_relative_path);
    let source = tokio::fs::read_to_string(&path)
      .await
      .map_err(BuildError::IoFailed)?;

    if ESM_SYNTAX.is_match(&source) {
      Ok((esm_exports(&source), true))
    } else {
      let exports = self.lex_commonjs_exports(&path).await?;
      Ok((exports, false))
    }
  }

  async fn lex_commonjs_exports(&self, path: &Path) -> Result<Vec<String>, BuildError> {
    let mut cmd = Command::new(&self.cjs_lexer_bin);
    cmd
      .arg(path)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let output = tokio::time::timeout(self.timeout, cmd.output())
      .await
      .map_err(|_| BuildError::ProbeFailed {
        path: path.display().to_string(),
        source: anyhow::anyhow!("cjs lexer timed out after {:?}", self.timeout),
      })?
      .map_err(|e| BuildError::ProbeFailed {
        path: path.display().to_string(),
        source: e.into(),
      })?;

    if !output.status.success() {
      return Err(BuildError::ProbeFailed {
        path: path.display().to_string(),
        source: anyhow::anyhow!(
          "{} exited with {}: {}",
          self.cjs_lexer_bin,
          output.status,
          String::from_utf8_lossy(&output.stderr)
        ),
      });
    }

    serde_json::from_slice::<Vec<String>>(&output.stdout).map_err(|e| BuildError::ProbeFailed {
      path: path.display().to_string(),
      source: e.into(),
    })
  }
}

/// Extracts exported names from ESM source by regex rather than a full
/// parser, matching the static-inspection contract in spec.md §4.5.
/// `default` is included as a pseudo-name when a default export is present,
/// consistent with how [`crate::model::ImportMeta::has_default_export`]
/// checks for it.
fn esm_exports(source: &str) -> Vec<String> {
  let mut names = Vec::new();

  for cap in EXPORT_NAMED_DECL.captures_iter(source) {
    names.push(cap[1].to_string());
  }

  for cap in EXPORT_BRACE_LIST.captures_iter(source) {
    for part in cap[1].split(',') {
      let part = part.trim();
      if part.is_empty() {
        continue;
      }
      let name = part.split_whitespace().last().unwrap_or(part);
      if name == "default" {
        if !names.contains(&"default".to_string()) {
          names.push("default".to_string());
        }
      } else {
        names.push(name.to_string());
      }
    }
  }

  if EXPORT_DEFAULT.is_match(source) && !names.contains(&"default".to_string()) {
    names.push("default".to_string());
  }

  if EXPORT_STAR.is_match(source) {
    // re-exported surface is unknown statically; callers that need exact
    // names for a re-exporting entry should probe the re-exported path
    // directly instead of relying on this heuristic.
  }

  names
}
