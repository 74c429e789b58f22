// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Drives the generic JS bundler (spec.md §4.8). The bundler itself is an
//! out-of-scope black box (spec.md §1) normally driven through native
//! plugin hooks; since this crate only has a CLI to shell out to, the
//! External Resolver's decisions (spec.md §4.7) are applied as a
//! specifier-rewrite pass over the bundler's emitted source rather than as
//! a true `OnResolve` interception — functionally equivalent for the
//! static import/`require` forms this system needs to handle.
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;
use tracing::warn;

use crate::errors::BuildError;
use crate::external_resolver::BuildContext;
use crate::external_resolver::ExternalResolver;
use crate::external_resolver::ResolveAction;
use crate::ids::Target;

static COULD_NOT_RESOLVE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"Could not resolve "([^"]+)""#).unwrap());

static FROM_SPECIFIER: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"from\s+"([^"]+)""#).unwrap());

static REQUIRE_CALL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"require\(\s*"([^"]+)"\s*\)"#).unwrap());

/// The retry loop's explicit states (spec.md §9 re-architecture hint).
#[derive(Debug, PartialEq, Eq)]
enum LoopState {
  Building,
  AppendingExternals,
  Done,
  Failed,
}

pub struct BundleOutput {
  pub js: Vec<u8>,
  pub warnings: Vec<String>,
}

pub struct BundlerDriver {
  bundler_bin: String,
  timeout: Duration,
  max_retries: u32,
}

impl BundlerDriver {
  pub fn new(bundler_bin: impl Into<String>, timeout: Duration, max_retries: u32) -> Self {
    BundlerDriver {
      bundler_bin: bundler_bin.into(),
      timeout,
      max_retries,
    }
  }

  /// Runs the bundler, retrying on `Could not resolve "<name>"` errors by
  /// adding `<name>` to the externals set and trying again (spec.md §4.8,
  /// §8 property 6). Any other bundler error is fatal. On success, rewrites
  /// resolved-external import specifiers in place via [`ExternalResolver`].
  #[instrument(skip(self, entry_source, ctx), err)]
  pub async fn build(
    &self,
    entry_source: &str,
    ctx: &mut BuildContext,
  ) -> Result<BundleOutput, BuildError> {
    let mut state = LoopState::Building;
    let mut attempt = 0;
    let mut last_js = Vec::new();
    let mut last_warnings = Vec::new();

    loop {
      match state {
        LoopState::Building | LoopState::AppendingExternals => {
          attempt += 1;
          if attempt > self.max_retries {
            return Err(BuildError::BundleFailed(format!(
              "exceeded {} bundler retries",
              self.max_retries
            )));
          }

          let result = self.invoke(entry_source, ctx).await?;
          let unresolved = result
            .stderr_text
            .lines()
            .filter_map(|line| COULD_NOT_RESOLVE.captures(line))
            .map(|c| c[1].to_string())
            .collect::<Vec<_>>();

          if !unresolved.is_empty() {
            let mut grew = false;
            for name in unresolved {
              if ctx.record_indirect_require(name.clone()) {
                grew = true;
              }
            }
            if !grew {
              state = LoopState::Failed;
              continue;
            }
            state = LoopState::AppendingExternals;
            continue;
          }

          if !result.success {
            state = LoopState::Failed;
            continue;
          }

          last_js = result.js;
          last_warnings = result.warnings;
          state = LoopState::Done;
        }
        LoopState::Done => {
          let rewritten = rewrite_specifiers(&String::from_utf8_lossy(&last_js), ctx);
          return Ok(BundleOutput {
            js: rewritten.into_bytes(),
            warnings: last_warnings,
          });
        }
        LoopState::Failed => {
          return Err(BuildError::BundleFailed(
            "bundler reported a non-resolution error".to_string(),
          ));
        }
      }
    }
  }

  async fn invoke(&self, entry_source: &str, ctx: &BuildContext) -> Result<InvokeResult, BuildError> {
    let mut args = vec![
      "--bundle".to_string(),
      "--format=esm".to_string(),
      format!("--target={}", target_flag(ctx.target)),
    ];
    if !ctx.dev {
      args.push("--minify".to_string());
    }
    for (token, value) in define_map(ctx.dev).into_iter() {
      args.push(format!("--define:{token}={value}"));
    }
    for name in &ctx.indirect_requires {
      args.push(format!("--external:{name}"));
    }

    let mut cmd = Command::new(&self.bundler_bin);
    cmd
      .args(&args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(BuildError::IoFailed)?;
    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(entry_source.as_bytes())
        .await
        .map_err(BuildError::IoFailed)?;
    }

    let output = tokio::time::timeout(self.timeout, child.wait_with_output())
      .await
      .map_err(|_| BuildError::BundleFailed(format!("bundler timed out after {:?}", self.timeout)))?
      .map_err(BuildError::IoFailed)?;

    let stderr_text = String::from_utf8_lossy(&output.stderr).to_string();
    let warnings = stderr_text
      .lines()
      .filter(|l| l.contains("warning") && !l.contains("Could not resolve"))
      .map(str::to_string)
      .collect();

    Ok(InvokeResult {
      success: output.status.success(),
      js: output.stdout,
      warnings,
      stderr_text,
    })
  }
}

struct InvokeResult {
  success: bool,
  js: Vec<u8>,
  warnings: Vec<String>,
  stderr_text: String,
}

fn target_flag(target: Target) -> &'static str {
  target.as_segment()
}

/// Builds the static substitution table (spec.md §4.8). `__filename`/
/// `__dirname` need the final artifact URL, which isn't known until after
/// fingerprinting — those two sentinels are left for the Post-Processor,
/// which has the BuildID in hand.
fn define_map(dev: bool) -> HashMap<String, String> {
  let node_env = if dev { "\"development\"" } else { "\"production\"" };
  HashMap::from([
    ("process".to_string(), "__process$".to_string()),
    ("global.process".to_string(), "__process$".to_string()),
    ("Buffer".to_string(), "__Buffer$".to_string()),
    ("global.Buffer".to_string(), "__Buffer$".to_string()),
    ("setImmediate".to_string(), "__setImmediate$".to_string()),
    (
      "global.setImmediate".to_string(),
      "__setImmediate$".to_string(),
    ),
    ("clearImmediate".to_string(), "clearTimeout".to_string()),
    (
      "global.clearImmediate".to_string(),
      "clearTimeout".to_string(),
    ),
    ("require.resolve".to_string(), "__rResolve$".to_string()),
    (
      "global.require.resolve".to_string(),
      "__rResolve$".to_string(),
    ),
    ("global".to_string(), "__global$".to_string()),
    ("process.env.NODE_ENV".to_string(), node_env.to_string()),
    (
      "global.process.env.NODE_ENV".to_string(),
      node_env.to_string(),
    ),
  ])
}

/// Rewrites resolved-external specifiers in the bundler's output. ESM
/// `from "<name>"` occurrences are replaced with the resolved URL;
/// `require("<name>")` occurrences are left untouched and recorded in
/// `ctx.peer_modules_for_commonjs` for the Post-Processor (spec.md §4.7
/// step 4, §4.9).
fn rewrite_specifiers(js: &str, ctx: &mut BuildContext) -> String {
  let esm_targets: Vec<String> = FROM_SPECIFIER
    .captures_iter(js)
    .map(|c| c[1].to_string())
    .filter(|name| ctx.matches(name))
    .collect();

  let mut rewritten = js.to_string();
  for name in esm_targets {
    match ExternalResolver::resolve(ctx, &name, true) {
      ResolveAction::External { url } => {
        rewritten = rewritten.replace(&format!("from \"{name}\""), &format!("from \"{url}\""));
      }
      ResolveAction::Inline => {}
      ResolveAction::RecordForCjs { .. } => {
        warn!(name, "ESM importer resolved as CJS side-map entry, unexpected");
      }
    }
  }

  let cjs_targets: Vec<String> = REQUIRE_CALL
    .captures_iter(&rewritten)
    .map(|c| c[1].to_string())
    .filter(|name| ctx.matches(name) && !ctx.peer_modules_for_commonjs.contains_key(name))
    .collect();
  for name in cjs_targets {
    let _ = ExternalResolver::resolve(ctx, &name, false);
  }

  rewritten
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::PackageName;
  use crate::model::BuildRequest;
  use crate::model::PackageRef;

  fn pkg(name: &str, version: &str) -> PackageRef {
    PackageRef::new(PackageName::parse(name).unwrap(), version, "")
  }

  #[test]
  fn define_map_includes_setimmediate_single_dollar() {
    let map = define_map(false);
    assert_eq!(map.get("setImmediate").unwrap(), "__setImmediate$");
    assert_eq!(map.get("process.env.NODE_ENV").unwrap(), "\"production\"");
  }

  #[test]
  fn rewrite_specifiers_replaces_esm_import_of_known_peer() {
    let req = BuildRequest::single(pkg("react-dom", "17.0.2"), Target::Es2020, false);
    let mut ctx = BuildContext::new(&req)
      .with_build_version(1)
      .with_true_peers(vec![pkg("react", "17.0.2")]);

    let js = "import { createElement } from \"react\"\n";
    let out = rewrite_specifiers(js, &mut ctx);
    assert!(out.contains("from \"/v1/react@17.0.2/es2020/react.js\""));
  }

  #[test]
  fn rewrite_specifiers_leaves_require_literal_intact_but_records_side_map() {
    let req = BuildRequest::single(pkg("react-dom", "17.0.2"), Target::Es2020, false);
    let mut ctx = BuildContext::new(&req)
      .with_build_version(1)
      .with_true_peers(vec![pkg("react", "17.0.2")]);

    let js = "const r = require(\"react\")\n";
    let out = rewrite_specifiers(js, &mut ctx);
    assert_eq!(out, js);
    assert_eq!(
      ctx.peer_modules_for_commonjs.get("react").unwrap(),
      "/v1/react@17.0.2/es2020/react.js"
    );
  }
}
