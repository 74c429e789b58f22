// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! The `OnResolve` bundler plugin hook (spec.md §4.7). Modeled as an
//! explicit [`BuildContext`] value threaded through plugin callbacks rather
//! than process-wide mutable state (spec.md §9 re-architecture hint).
use std::collections::HashMap;
use std::collections::HashSet;

use crate::ids::PackageName;
use crate::ids::Target;
use crate::model::BuildRequest;
use crate::model::PackageRef;
use crate::paths;
use crate::polyfills::PolyfillTable;

/// Mutable state the resolver plugin observes across one retry-loop run:
/// the accumulated externals set, the CJS peer side-map, and the indirect
/// `require()` names discovered by the Bundler Driver (spec.md §9).
pub struct BuildContext {
  pub build_version: u32,
  pub target: Target,
  pub dev: bool,
  overrides: Vec<PackageRef>,
  true_peers: Vec<PackageRef>,
  own_import_path: Option<String>,
  pub externals: Vec<PackageRef>,
  /// `name -> resolvePath URL`, populated only for imports reached through
  /// a CJS importer (spec.md §4.7 step 4). An empty URL marks a dangling
  /// entry the Post-Processor leaves unresolved (spec.md §4.9).
  pub peer_modules_for_commonjs: HashMap<String, String>,
  pub indirect_requires: HashSet<String>,
}

impl BuildContext {
  pub fn new(req: &BuildRequest) -> Self {
    let own_import_path = (!req.is_multi_package())
      .then(|| req.packages[0].import_path());

    BuildContext {
      build_version: 0,
      target: req.target,
      dev: req.dev,
      overrides: req.externals.clone(),
      true_peers: Vec::new(),
      own_import_path,
      externals: Vec::new(),
      peer_modules_for_commonjs: HashMap::new(),
      indirect_requires: HashSet::new(),
    }
  }

  pub fn with_build_version(mut self, build_version: u32) -> Self {
    self.build_version = build_version;
    self
  }

  pub fn with_true_peers(mut self, true_peers: Vec<PackageRef>) -> Self {
    self.true_peers = true_peers;
    self
  }

  /// Names a resolver match against: external overrides, true peers,
  /// built-ins, or any indirect require discovered so far (spec.md §4.7).
  pub fn matches(&self, name: &str) -> bool {
    let bare = name.split('/').next().unwrap_or(name);
    self.overrides.iter().any(|p| p.name.basename() == bare)
      || self.true_peers.iter().any(|p| p.name.basename() == bare)
      || PolyfillTable::is_node_builtin(name)
      || (self.target == Target::Deno && PolyfillTable::is_deno_std_bridged(name))
      || self.indirect_requires.contains(name)
  }

  /// `(version, ok)`, resolution order override -> peer -> unknown (spec.md
  /// §4.7 step 1; §9 Open Question decision: implemented literally in this
  /// order).
  pub fn resolve_version(&self, name: &str) -> (Option<String>, bool) {
    if let Some(o) = self.overrides.iter().find(|o| o.name.basename() == name) {
      return (Some(o.version.clone()), true);
    }
    if let Some(p) = self.true_peers.iter().find(|p| p.name.basename() == name) {
      return (Some(p.version.clone()), true);
    }
    (None, false)
  }

  /// Adds to the externals set, deduplicated by name (spec.md §9 Open
  /// Question 1: "the union as a set; implementations SHOULD deduplicate").
  pub fn add_external(&mut self, pkg: PackageRef) {
    if !self.externals.iter().any(|e| e.name == pkg.name) {
      self.externals.push(pkg);
    }
  }

  pub fn record_indirect_require(&mut self, name: String) -> bool {
    self.indirect_requires.insert(name)
  }
}

/// What the resolver tells the bundler to do with one matched import.
pub enum ResolveAction {
  /// The single-package special case: the import is the requested
  /// package's own path, inlined from `node_modules` instead of
  /// externalized (spec.md §4.7 "Single-package special case").
  Inline,
  /// Importer is ESM: the bundler marks the import `external=true` with
  /// this resolved path (spec.md §4.7 step 4).
  External { url: String },
  /// Importer is CJS: `require("<name>")` is left intact in the bundler's
  /// output; the URL is recorded in the side map for the Post-Processor.
  RecordForCjs { url: String },
}

/// Splits `name` ("preact", "react-dom/server") into `(pkgName, basename)`
/// for the known-package resolvePath shape (spec.md §4.7 step 3).
fn split_import_path(name: &str) -> (&str, &str) {
  match name.rsplit_once('/') {
    Some((pkg, sub)) if !name.starts_with('@') => (pkg, sub),
    _ => (name, name),
  }
}

pub struct ExternalResolver;

impl ExternalResolver {
  /// Resolves one matched import (spec.md §4.7 steps 1–4).
  pub fn resolve(ctx: &mut BuildContext, name: &str, importer_is_esm: bool) -> ResolveAction {
    if ctx.own_import_path.as_deref() == Some(name) {
      return ResolveAction::Inline;
    }

    let (pkg_name, basename) = split_import_path(name);
    let (version, ok) = ctx.resolve_version(pkg_name);

    let url = if ok {
      let version = version.expect("ok implies version present");
      if let Ok(parsed) = PackageName::parse(pkg_name) {
        ctx.add_external(PackageRef::new(parsed, version.clone(), ""));
      }
      paths::known_external_url_path(
        ctx.build_version,
        pkg_name,
        &version,
        ctx.target.as_segment(),
        basename,
        ctx.dev,
      )
    } else if ctx.target == Target::Deno && PolyfillTable::is_deno_std_bridged(name) {
      paths::deno_std_bridge_url_path(ctx.build_version, name)
    } else if PolyfillTable::is_node_builtin(name) {
      paths::node_builtin_polyfill_url_path(ctx.build_version, name)
    } else if let Some(polyfill_pkg) = PolyfillTable::registry_polyfill(name) {
      let version = "latest".to_string();
      if let Ok(parsed) = PackageName::parse(polyfill_pkg) {
        ctx.add_external(PackageRef::new(parsed, version.clone(), ""));
      }
      paths::known_external_url_path(
        ctx.build_version,
        polyfill_pkg,
        &version,
        ctx.target.as_segment(),
        polyfill_pkg,
        ctx.dev,
      )
    } else {
      paths::resolve_error_url_path(name)
    };

    if importer_is_esm {
      ResolveAction::External { url }
    } else {
      ctx.peer_modules_for_commonjs.insert(name.to_string(), url.clone());
      ResolveAction::RecordForCjs { url }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::PackageName;

  fn pkg(name: &str, version: &str) -> PackageRef {
    PackageRef::new(PackageName::parse(name).unwrap(), version, "")
  }

  fn base_req() -> BuildRequest {
    BuildRequest::single(pkg("react-dom", "17.0.2"), Target::Es2020, false)
  }

  #[test]
  fn own_import_path_resolves_inline() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req).with_build_version(1);
    let action = ExternalResolver::resolve(&mut ctx, "react-dom", true);
    assert!(matches!(action, ResolveAction::Inline));
  }

  #[test]
  fn true_peer_resolves_to_known_package_url_when_esm() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req)
      .with_build_version(1)
      .with_true_peers(vec![pkg("react", "17.0.2")]);

    let action = ExternalResolver::resolve(&mut ctx, "react", true);
    match action {
      ResolveAction::External { url } => {
        assert_eq!(url, "/v1/react@17.0.2/es2020/react.js");
      }
      _ => panic!("expected external"),
    }
    assert_eq!(ctx.externals.len(), 1);
  }

  #[test]
  fn cjs_importer_records_side_map_without_changing_require() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req)
      .with_build_version(1)
      .with_true_peers(vec![pkg("react", "17.0.2")]);

    let action = ExternalResolver::resolve(&mut ctx, "react", false);
    assert!(matches!(action, ResolveAction::RecordForCjs { .. }));
    assert_eq!(
      ctx.peer_modules_for_commonjs.get("react").unwrap(),
      "/v1/react@17.0.2/es2020/react.js"
    );
  }

  #[test]
  fn unknown_builtin_resolves_to_node_polyfill_url() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req).with_build_version(1);
    let action = ExternalResolver::resolve(&mut ctx, "fs", true);
    match action {
      ResolveAction::External { url } => assert_eq!(url, "/v1/_node_fs.js"),
      _ => panic!("expected external"),
    }
  }

  #[test]
  fn deno_target_bridges_std_names() {
    let req = BuildRequest::single(pkg("react-dom", "17.0.2"), Target::Deno, false);
    let mut ctx = BuildContext::new(&req).with_build_version(1);
    let action = ExternalResolver::resolve(&mut ctx, "fs", true);
    match action {
      ResolveAction::External { url } => assert_eq!(url, "/v1/_deno_std_node_fs.js"),
      _ => panic!("expected external"),
    }
  }

  #[test]
  fn unresolvable_name_gets_error_sentinel() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req).with_build_version(1);
    let action = ExternalResolver::resolve(&mut ctx, "totally-unknown-pkg", true);
    match action {
      ResolveAction::External { url } => {
        assert_eq!(url, "/_error.js?type=resolve&name=totally-unknown-pkg");
      }
      _ => panic!("expected external"),
    }
  }

  #[test]
  fn externals_deduped_by_name() {
    let req = base_req();
    let mut ctx = BuildContext::new(&req).with_build_version(1);
    ctx.add_external(pkg("react", "17.0.2"));
    ctx.add_external(pkg("react", "17.0.2"));
    assert_eq!(ctx.externals.len(), 1);
  }
}
