// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! The build core's ambient configuration surface, loaded the way the
//! teacher service loads its own `Config`: a `clap::Parser` struct with one
//! `env`-backed flag per field, populated from `.env` via `dotenvy` at
//! process start. This covers only the build core's knobs (storage root,
//! BuildVersion, subprocess timeouts/paths, concurrency) — HTTP port, auth
//! and bucket credentials belong to the out-of-scope front-end.
use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "registry-build", about = "on-demand npm-to-ESM build core")]
pub struct BuildConfig {
  /// Root directory for the persistent artifact cache (builds/, types/, kv).
  #[arg(long, env = "STORAGE_ROOT", default_value = "./data")]
  pub storage_root: String,

  /// Monotonic version baked into every artifact path. Bumping invalidates
  /// all prior artifacts (spec.md §6).
  #[arg(long, env = "BUILD_VERSION", default_value_t = 1)]
  pub build_version: u32,

  /// Binary used to materialize `name@version` into `node_modules`
  /// (spec.md §4.3). In practice a registry client such as `yarn`.
  #[arg(long, env = "INSTALLER_BIN", default_value = "yarn")]
  pub installer_bin: String,

  #[arg(long, env = "INSTALLER_TIMEOUT_SECS", default_value_t = 60)]
  pub installer_timeout_secs: u64,

  /// Binary used to enumerate `module.exports` names on a CJS entry
  /// (spec.md §4.5). A mature in-process equivalent may be substituted
  /// without changing the prober's contract (spec.md §9).
  #[arg(long, env = "CJS_LEXER_BIN", default_value = "cjs-module-lexer")]
  pub cjs_lexer_bin: String,

  #[arg(long, env = "PROBE_TIMEOUT_SECS", default_value_t = 10)]
  pub probe_timeout_secs: u64,

  /// Bundler entrypoint invoked once per retry-loop iteration (spec.md
  /// §4.8). Treated as a black box with plugin hooks.
  #[arg(long, env = "BUNDLER_BIN", default_value = "esbuild")]
  pub bundler_bin: String,

  #[arg(long, env = "BUNDLE_TIMEOUT_SECS", default_value_t = 30)]
  pub bundle_timeout_secs: u64,

  /// Upper bound on retries of the bundler's "Could not resolve" loop
  /// (spec.md §8 property 6: each retry strictly grows externals, so this
  /// is a backstop, not the normal exit condition).
  #[arg(long, env = "MAX_BUNDLE_RETRIES", default_value_t = 8)]
  pub max_bundle_retries: u32,

  /// Max number of builds the per-fingerprint coalescing map (spec.md §4.10,
  /// §9) runs concurrently; distinct fingerprints beyond this queue.
  #[arg(long, env = "MAX_CONCURRENT_BUILDS", default_value_t = 8)]
  pub max_concurrent_builds: usize,

  /// Hostname artifacts are served from; used to build absolute sentinel
  /// URLs (`__filename`, `__dirname`, the resolve-error sentinel) when the
  /// reference isn't resolvable relative to the artifact's own path.
  #[arg(long, env = "SERVICE_HOSTNAME", default_value = "esm.sh")]
  pub service_hostname: String,
}

impl BuildConfig {
  pub fn installer_timeout(&self) -> Duration {
    Duration::from_secs(self.installer_timeout_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs)
  }

  pub fn bundle_timeout(&self) -> Duration {
    Duration::from_secs(self.bundle_timeout_secs)
  }

  /// Parses from process args/env, loading a `.env` file first if present.
  /// Mirrors the teacher's `Config::load` (`dotenvy::dotenv()` then
  /// `Parser::parse()`).
  pub fn load() -> Self {
    let _ = dotenvy::dotenv();
    BuildConfig::parse()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_parse_from_empty_args() {
    let cfg = BuildConfig::parse_from(["registry-build"]);
    assert_eq!(cfg.build_version, 1);
    assert_eq!(cfg.storage_root, "./data");
    assert_eq!(cfg.max_concurrent_builds, 8);
  }

  #[test]
  fn timeouts_convert_to_duration() {
    let cfg = BuildConfig::parse_from(["registry-build", "--installer-timeout-secs", "5"]);
    assert_eq!(cfg.installer_timeout(), Duration::from_secs(5));
  }
}
