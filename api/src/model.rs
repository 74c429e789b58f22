// Copyright 2024 the registry authors. All rights reserved. MIT license.
use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::ids::PackageName;
use crate::ids::Target;

/// `(name, version, submodule?)`, spec.md §3. Fingerprinting and every
/// downstream lookup consumes only these three fields plus request-level
/// options — nothing else may leak into a [`PackageRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: PackageName,
  pub version: String,
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub submodule: String,
}

impl PackageRef {
  pub fn new(
    name: PackageName,
    version: impl Into<String>,
    submodule: impl Into<String>,
  ) -> Self {
    PackageRef {
      name,
      version: version.into(),
      submodule: submodule.into(),
    }
  }

  /// `<name>[/<submodule>]`, the import path clients and synthesized stubs
  /// use (GLOSSARY).
  pub fn import_path(&self) -> String {
    if self.submodule.is_empty() {
      self.name.to_string()
    } else {
      format!("{}/{}", self.name, self.submodule)
    }
  }

  /// The filename segment used in a single-package BuildID: the submodule
  /// if present, else the package's bare basename (spec.md §3).
  pub fn filename_segment(&self) -> &str {
    if self.submodule.is_empty() {
      self.name.basename()
    } else {
      &self.submodule
    }
  }

  fn sort_key(&self) -> (&str, &str, &str) {
    (self.name.basename(), self.version.as_str(), self.submodule.as_str())
  }
}

/// Total order by `(name, version, submodule)`, lexicographic — this is what
/// makes "sort before hash" (spec.md §3) deterministic by construction.
impl PartialOrd for PackageRef {
  fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for PackageRef {
  fn cmp(&self, other: &Self) -> std::cmp::Ordering {
    self.sort_key().cmp(&other.sort_key())
  }
}

/// A normalized request for one build, spec.md §3.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub packages: Vec<PackageRef>,
  pub externals: Vec<PackageRef>,
  pub target: Target,
  pub dev: bool,
}

impl BuildRequest {
  pub fn single(package: PackageRef, target: Target, dev: bool) -> Self {
    BuildRequest {
      packages: vec![package],
      externals: Vec::new(),
      target,
      dev,
    }
  }

  pub fn is_multi_package(&self) -> bool {
    self.packages.len() > 1
  }
}

/// Per-package manifest fields consumed downstream, plus the computed
/// `exports`/`dts` fields (spec.md §3). Kept as a flat struct rather than a
/// generic JSON value so every consumer (synthesizer, resolver,
/// post-processor) gets compile-time field access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportMeta {
  pub name: String,
  pub version: String,
  #[serde(default)]
  pub main: String,
  #[serde(default)]
  pub module: String,
  #[serde(default)]
  pub r#type: String,
  #[serde(default)]
  pub types: String,
  #[serde(default)]
  pub typings: String,
  #[serde(default)]
  pub dependencies: IndexMap<String, String>,
  #[serde(default)]
  pub peer_dependencies: IndexMap<String, String>,
  /// Export names enumerated by the Module Shape Prober (spec.md §4.5).
  #[serde(default)]
  pub exports: Vec<String>,
  /// Public path to the root `.d.ts`, or empty if none was discovered
  /// (spec.md §4.4 "Types discovery").
  #[serde(default)]
  pub dts: String,
  /// Shape classification from the last successful probe (spec.md §4.5).
  /// Defaults to `false`; the resolver/prober pipeline stage sets this once
  /// the entry has actually been probed.
  #[serde(default)]
  pub is_esm: bool,
}

impl ImportMeta {
  pub fn has_default_export(&self) -> bool {
    self.exports.iter().any(|e| e == "default")
  }

  pub fn non_default_exports(&self) -> impl Iterator<Item = &str> {
    self.exports.iter().filter(|e| e.as_str() != "default").map(String::as_str)
  }
}

/// Map of requested-package import path -> its [`ImportMeta`]. Shallow and
/// acyclic (spec.md §9 Design Notes): one record per requested package, no
/// ownership puzzle, so a plain map is sufficient.
pub type ImportMetaMap = HashMap<String, ImportMeta>;

#[cfg(test)]
mod tests {
  use super::*;

  fn pkg(name: &str, version: &str, submodule: &str) -> PackageRef {
    PackageRef::new(PackageName::parse(name).unwrap(), version, submodule)
  }

  #[test]
  fn sorts_by_name_then_version_then_submodule() {
    let mut refs = vec![
      pkg("lit-html", "2.0.0", ""),
      pkg("lit-element", "3.0.0", ""),
      pkg("lit-element", "1.0.0", ""),
    ];
    refs.sort();
    assert_eq!(
      refs.iter().map(|r| (r.name.to_string(), r.version.clone())).collect::<Vec<_>>(),
      vec![
        ("lit-element".to_string(), "1.0.0".to_string()),
        ("lit-element".to_string(), "3.0.0".to_string()),
        ("lit-html".to_string(), "2.0.0".to_string()),
      ]
    );
  }

  #[test]
  fn import_path_includes_submodule() {
    let r = pkg("react-dom", "17.0.2", "server");
    assert_eq!(r.import_path(), "react-dom/server");
    assert_eq!(r.filename_segment(), "server");
  }

  #[test]
  fn import_path_without_submodule_uses_basename() {
    let r = pkg("preact", "10.5.0", "");
    assert_eq!(r.import_path(), "preact");
    assert_eq!(r.filename_segment(), "preact");
  }
}
