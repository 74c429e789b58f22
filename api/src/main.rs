// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Thin CLI entrypoint for manual/ad-hoc builds. The HTTP front-end that
//! would normally drive this pipeline is out of scope (spec.md §1); this
//! binary exists so the build core can be exercised directly.
mod artifact_store;
mod bundler;
mod config;
mod errors;
mod external_resolver;
mod fingerprint;
mod ids;
mod installer;
mod metadata_resolver;
mod model;
mod paths;
mod pipeline;
mod polyfills;
mod postprocess;
mod probe;
mod serializer;
mod synth;
mod tracing;

use std::process::ExitCode;

use clap::Parser;

use crate::artifact_store::FileKvStore;
use crate::config::BuildConfig;
use crate::ids::PackageName;
use crate::ids::Target;
use crate::model::BuildRequest;
use crate::model::PackageRef;
use crate::pipeline::Pipeline;

/// `registry-build preact@10.5.0 --target es2020` — builds one request and
/// writes the resulting artifact + import meta to stdout.
#[derive(Parser)]
#[command(name = "registry-build")]
struct Cli {
  #[command(flatten)]
  config: BuildConfig,

  /// `name@version[/submodule]` for each requested package. More than one
  /// produces a multi-package bundle (spec.md §3).
  #[arg(required = true)]
  packages: Vec<String>,

  /// `name@version` external overrides, pinning the CDN URL used for that
  /// dependency (spec.md §3).
  #[arg(long = "external")]
  externals: Vec<String>,

  #[arg(long, default_value = "es2020")]
  target: String,

  #[arg(long)]
  dev: bool,
}

/// Parses `name@version[/submodule]`, where `name` may itself be scoped
/// (`@scope/name@version`). The version separator is the first `@` after
/// a leading scope marker, if any.
fn parse_package_ref(spec: &str) -> anyhow::Result<PackageRef> {
  let search_from = usize::from(spec.starts_with('@'));
  let at_pos = spec[search_from..]
    .find('@')
    .map(|i| i + search_from)
    .ok_or_else(|| anyhow::anyhow!("expected name@version, got '{spec}'"))?;

  let name = PackageName::parse(&spec[..at_pos])?;
  let rest = &spec[at_pos + 1..];
  let (version, submodule) = rest.split_once('/').unwrap_or((rest, ""));

  Ok(PackageRef::new(name, version, submodule))
}

#[tokio::main]
async fn main() -> ExitCode {
  tracing::init();
  let cli = Cli::parse();

  let packages = match cli
    .packages
    .iter()
    .map(|s| parse_package_ref(s))
    .collect::<anyhow::Result<Vec<_>>>()
  {
    Ok(p) => p,
    Err(e) => {
      eprintln!("error: {e}");
      return ExitCode::FAILURE;
    }
  };

  let externals = match cli
    .externals
    .iter()
    .map(|s| parse_package_ref(s))
    .collect::<anyhow::Result<Vec<_>>>()
  {
    Ok(p) => p,
    Err(e) => {
      eprintln!("error: {e}");
      return ExitCode::FAILURE;
    }
  };

  let target: Target = match cli.target.parse() {
    Ok(t) => t,
    Err(e) => {
      eprintln!("error: {e}");
      return ExitCode::FAILURE;
    }
  };

  let req = BuildRequest {
    packages,
    externals,
    target,
    dev: cli.dev,
  };

  let kv = FileKvStore::new(format!("{}/kv", cli.config.storage_root));
  let pipeline = Pipeline::new(cli.config, kv);

  match pipeline.build(req).await {
    Ok(output) => {
      println!("{}", String::from_utf8_lossy(&output.js));
      eprintln!(
        "// build id: {}\n// import meta: {}",
        output.build_id,
        serde_json::to_string(&output.import_meta).unwrap_or_default()
      );
      ExitCode::SUCCESS
    }
    Err(e) => {
      eprintln!("build failed: {e}");
      ExitCode::FAILURE
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_unscoped_ref_with_submodule() {
    let r = parse_package_ref("react-dom@17.0.2/server").unwrap();
    assert_eq!(r.name.to_string(), "react-dom");
    assert_eq!(r.version, "17.0.2");
    assert_eq!(r.submodule, "server");
  }

  #[test]
  fn parses_scoped_ref_without_submodule() {
    let r = parse_package_ref("@babel/core@7.20.0").unwrap();
    assert_eq!(r.name.to_string(), "@babel/core");
    assert_eq!(r.version, "7.20.0");
    assert_eq!(r.submodule, "");
  }

  #[test]
  fn rejects_ref_without_version() {
    assert!(parse_package_ref("preact").is_err());
  }
}
