// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Reads installed package manifests and computes [`ImportMeta`] per
//! requested package, including true-peer classification and types
//! discovery (spec.md §4.4).
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use tracing::instrument;

use crate::errors::BuildError;
use crate::ids::PackageName;
use crate::installer::RegistryInstaller;
use crate::model::ImportMeta;
use crate::model::ImportMetaMap;
use crate::model::PackageRef;

/// The subset of `package.json` the resolver consumes (spec.md §3
/// ImportMeta). `exports` is kept as raw JSON since it can be a string, a
/// conditions object, or a per-subpath map.
#[derive(Debug, Clone, Deserialize)]
struct RawManifest {
  #[serde(default)]
  name: String,
  #[serde(default)]
  version: String,
  #[serde(default)]
  main: String,
  #[serde(default)]
  module: String,
  #[serde(default)]
  r#type: String,
  #[serde(default)]
  types: String,
  #[serde(default)]
  typings: String,
  #[serde(default)]
  exports: Option<Value>,
  #[serde(default)]
  dependencies: IndexMap<String, String>,
  #[serde(default)]
  #[serde(rename = "peerDependencies")]
  peer_dependencies: IndexMap<String, String>,
}

impl RawManifest {
  /// `definedExports["import"]` (spec.md §4.4 rule 2): the `"import"`
  /// condition, either at the top of `exports` or under its `"."` subpath.
  fn defined_import_export(&self) -> String {
    let Some(exports) = &self.exports else {
      return String::new();
    };
    match exports {
      Value::String(s) => s.clone(),
      Value::Object(map) => {
        if let Some(Value::String(s)) = map.get("import") {
          return s.clone();
        }
        if let Some(Value::Object(dot)) = map.get(".") {
          if let Some(Value::String(s)) = dot.get("import") {
            return s.clone();
          }
        }
        String::new()
      }
      _ => String::new(),
    }
  }
}

async fn read_manifest(dir: &Path) -> Result<RawManifest, BuildError> {
  let raw = tokio::fs::read(dir.join("package.json"))
    .await
    .map_err(BuildError::IoFailed)?;
  serde_json::from_slice(&raw).map_err(|e| {
    BuildError::IoFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
  })
}

fn package_dir(node_modules: &Path, name: &PackageName) -> PathBuf {
  match name.scope() {
    Some(scope) => node_modules.join(format!("@{scope}")).join(name.basename()),
    None => node_modules.join(name.basename()),
  }
}

/// `Resolve` (spec.md §4.4): reads each requested package's manifest,
/// derives `ImportMeta`, applies submodule re-derivation, discovers true
/// peers (with the react-dom/react pinning special case), and attempts
/// types discovery. Returns the computed metas plus the true peers that
/// must additionally be present in `node_modules` for bundling.
pub struct MetadataResolver<'a> {
  node_modules: &'a Path,
  work_dir: &'a Path,
  installer: &'a RegistryInstaller,
  storage_root: &'a str,
  build_version: u32,
}

impl<'a> MetadataResolver<'a> {
  pub fn new(
    node_modules: &'a Path,
    work_dir: &'a Path,
    installer: &'a RegistryInstaller,
    storage_root: &'a str,
    build_version: u32,
  ) -> Self {
    MetadataResolver {
      node_modules,
      work_dir,
      installer,
      storage_root,
      build_version,
    }
  }

  #[instrument(skip(self, packages, externals), err)]
  pub async fn resolve(
    &self,
    packages: &[PackageRef],
    externals: &[PackageRef],
  ) -> Result<(ImportMetaMap, Vec<PackageRef>), BuildError> {
    let mut raw_manifests = Vec::with_capacity(packages.len());
    for pkg in packages {
      let dir = package_dir(self.node_modules, &pkg.name);
      let manifest = read_manifest(&dir).await?;
      raw_manifests.push((pkg.clone(), dir, manifest));
    }

    let true_peers = self.collect_true_peers(packages, &raw_manifests, externals);

    let mut metas = ImportMetaMap::new();
    for (pkg, dir, manifest) in &raw_manifests {
      let meta = self.build_import_meta(pkg, dir, manifest).await?;
      metas.insert(pkg.import_path(), meta);
    }

    Ok((metas, true_peers))
  }

  async fn build_import_meta(
    &self,
    pkg: &PackageRef,
    dir: &Path,
    manifest: &RawManifest,
  ) -> Result<ImportMeta, BuildError> {
    let mut module = manifest.module.clone();
    if module.is_empty() && manifest.r#type == "module" {
      module = manifest.main.clone();
    }
    if module.is_empty() {
      let defined_import = manifest.defined_import_export();
      if !defined_import.is_empty() {
        module = defined_import;
      }
    }

    let mut main = manifest.main.clone();
    let mut types = manifest.types.clone();
    let mut typings = manifest.typings.clone();

    if !pkg.submodule.is_empty() {
      main = pkg.submodule.clone();
      module = String::new();
      types = String::new();
      typings = String::new();

      let sub_dir = dir.join(&pkg.submodule);
      if let Ok(sub_manifest) = read_manifest(&sub_dir).await {
        main = format!("{}/{}", pkg.submodule, sub_manifest.main);
        if !sub_manifest.module.is_empty() {
          module = format!("{}/{}", pkg.submodule, sub_manifest.module);
        }
        if !sub_manifest.types.is_empty() {
          types = format!("{}/{}", pkg.submodule, sub_manifest.types);
        }
        if !sub_manifest.typings.is_empty() {
          typings = format!("{}/{}", pkg.submodule, sub_manifest.typings);
        }
      }
    }

    let dts = self.discover_types(pkg, dir, &types, &typings).await;

    Ok(ImportMeta {
      name: manifest.name.clone(),
      version: manifest.version.clone(),
      main,
      module,
      r#type: manifest.r#type.clone(),
      types,
      typings,
      dependencies: manifest.dependencies.clone(),
      peer_dependencies: manifest.peer_dependencies.clone(),
      exports: Vec::new(),
      dts,
      is_esm: false,
    })
  }

  /// Collects true peers: names in the union of every requested package's
  /// `peerDependencies`, excluding any name already present among the
  /// requested packages or any requested package's own `dependencies`
  /// (spec.md §4.4 "Peer handling", §8 property 4). Version is taken from
  /// the matching external override if present, else the peer's declared
  /// range is treated as a concrete version (the registry installer
  /// resolves ranges); `react-dom`'s peer on `react` is pinned to the
  /// resolved `react-dom` version per the special case.
  fn collect_true_peers(
    &self,
    packages: &[PackageRef],
    raw_manifests: &[(PackageRef, PathBuf, RawManifest)],
    externals: &[PackageRef],
  ) -> Vec<PackageRef> {
    let requested_names: HashSet<&str> =
      packages.iter().map(|p| p.name.basename()).collect();
    let declared_deps: HashSet<&str> = raw_manifests
      .iter()
      .flat_map(|(_, _, m)| m.dependencies.keys())
      .map(String::as_str)
      .collect();

    let mut seen = HashSet::new();
    let mut peers = Vec::new();

    for (pkg, _, manifest) in raw_manifests {
      for peer_name in manifest.peer_dependencies.keys() {
        if requested_names.contains(peer_name.as_str())
          || declared_deps.contains(peer_name.as_str())
          || !seen.insert(peer_name.clone())
        {
          continue;
        }

        let Ok(name) = PackageName::parse(peer_name) else {
          continue;
        };

        let version = if pkg.name.basename() == "react-dom" && peer_name == "react" {
          pkg.version.clone()
        } else if let Some(ov) = externals.iter().find(|e| e.name.basename() == peer_name) {
          ov.version.clone()
        } else {
          manifest.peer_dependencies[peer_name].clone()
        };

        peers.push(PackageRef::new(name, version, ""));
      }
    }

    peers
  }

  /// Types discovery (spec.md §4.4 "Types discovery"). Declared
  /// `types`/`typings` win outright; otherwise probes, in order, root
  /// `index.d.ts`, a sibling `@types/<name>` manifest, a submodule
  /// `index.d.ts`, a submodule `.d.ts` file, and the same under
  /// `@types/<name>`. The actual type-rewriting copy into
  /// `<storage>/types/v<BV>/` is an out-of-scope external collaborator
  /// (spec.md §1); here we perform a plain file copy, which is sufficient
  /// to exercise the path-computation contract `meta.dts` depends on.
  async fn discover_types(
    &self,
    pkg: &PackageRef,
    dir: &Path,
    declared_types: &str,
    declared_typings: &str,
  ) -> String {
    if !declared_types.is_empty() {
      return self.copy_types(pkg, &dir.join(declared_types)).await;
    }
    if !declared_typings.is_empty() {
      return self.copy_types(pkg, &dir.join(declared_typings)).await;
    }

    if pkg.name.scope().is_none() {
      self.ensure_types_package_installed(pkg).await;
    }

    let candidates: Vec<PathBuf> = vec![
      dir.join("index.d.ts"),
      self.types_package_dir(pkg).join("index.d.ts"),
      dir.join(&pkg.submodule).join("index.d.ts"),
      dir.join(format!("{}.d.ts", pkg.submodule)),
      self
        .types_package_dir(pkg)
        .join(&pkg.submodule)
        .join("index.d.ts"),
    ];

    for candidate in candidates {
      if pkg.name.scope().is_some() && candidate.starts_with(self.types_package_dir(pkg)) {
        continue;
      }
      if tokio::fs::metadata(&candidate).await.is_ok() {
        return self.copy_types(pkg, &candidate).await;
      }
    }

    String::new()
  }

  /// Installs the sibling `@types/<name>` package on demand when it isn't
  /// already present in `node_modules`, so the candidate scan below has
  /// something to find (spec.md §4.4 "a sibling `@types/<name>` package
  /// manifest"). Most packages have no types package at all, so a registry
  /// report of no such package is the expected case, not a build failure;
  /// the resulting [`BuildError::NotFound`] is swallowed here rather than
  /// propagated (spec.md §7 "@types/<x>" swallow rule).
  async fn ensure_types_package_installed(&self, pkg: &PackageRef) {
    if tokio::fs::metadata(self.types_package_dir(pkg)).await.is_ok() {
      return;
    }

    let types_name = format!("@types/{}", pkg.name.basename());
    let Ok(types_pkg_name) = PackageName::parse(&types_name) else {
      return;
    };

    let result = self
      .installer
      .install_into(
        self.work_dir,
        &[PackageRef::new(types_pkg_name, "latest", "")],
      )
      .await
      .map_err(|_| BuildError::NotFound(format!("no types package for {}", pkg.name)));

    if let Err(err) = result {
      debug!(pkg = %pkg.name, error = %err, "types package not found, swallowing");
    }
  }

  fn types_package_dir(&self, pkg: &PackageRef) -> PathBuf {
    self
      .node_modules
      .join("@types")
      .join(pkg.name.basename())
  }

  async fn copy_types(&self, pkg: &PackageRef, src: &Path) -> String {
    let dest_dir = format!(
      "{}/types/v{}/{}",
      self.storage_root,
      self.build_version,
      pkg.import_path()
    );
    let dest = format!("{dest_dir}/index.d.ts");
    if tokio::fs::create_dir_all(&dest_dir).await.is_err() {
      return String::new();
    }
    if tokio::fs::copy(src, &dest).await.is_err() {
      return String::new();
    }
    format!("/types/v{}/{}/index.d.ts", self.build_version, pkg.import_path())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn pkg(name: &str, version: &str) -> PackageRef {
    PackageRef::new(PackageName::parse(name).unwrap(), version, "")
  }

  fn manifest(json: &str) -> RawManifest {
    serde_json::from_str(json).unwrap()
  }

  fn test_installer() -> RegistryInstaller {
    RegistryInstaller::new("true", std::time::Duration::from_secs(5))
  }

  #[test]
  fn defined_import_export_reads_top_level_condition() {
    let m = manifest(r#"{"exports": {"import": "./esm/index.js"}}"#);
    assert_eq!(m.defined_import_export(), "./esm/index.js");
  }

  #[test]
  fn defined_import_export_reads_dot_subpath() {
    let m = manifest(r#"{"exports": {".": {"import": "./esm/index.js"}}}"#);
    assert_eq!(m.defined_import_export(), "./esm/index.js");
  }

  #[test]
  fn defined_import_export_empty_without_exports() {
    let m = manifest(r#"{"name": "x"}"#);
    assert_eq!(m.defined_import_export(), "");
  }

  #[tokio::test]
  async fn true_peer_excludes_requested_and_declared_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let installer = test_installer();
    let resolver = MetadataResolver::new(dir.path(), dir.path(), &installer, "/data", 1);

    let a = pkg("a", "1.0.0");
    let raw = vec![(
      a.clone(),
      dir.path().to_path_buf(),
      manifest(
        r#"{"name":"a","version":"1.0.0","dependencies":{"b":"1.0.0"},"peerDependencies":{"b":"1.0.0","c":"2.0.0"}}"#,
      ),
    )];
    let peers = resolver.collect_true_peers(&[a], &raw, &[]);
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].name.basename(), "c");
  }

  #[tokio::test]
  async fn react_dom_peer_on_react_is_pinned_to_react_dom_version() {
    let dir = tempfile::tempdir().unwrap();
    let installer = test_installer();
    let resolver = MetadataResolver::new(dir.path(), dir.path(), &installer, "/data", 1);

    let react_dom = pkg("react-dom", "17.0.2");
    let raw = vec![(
      react_dom.clone(),
      dir.path().to_path_buf(),
      manifest(r#"{"name":"react-dom","version":"17.0.2","peerDependencies":{"react":"^17.0.0"}}"#),
    )];
    let peers = resolver.collect_true_peers(&[react_dom], &raw, &[]);
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].name.basename(), "react");
    assert_eq!(peers[0].version, "17.0.2");
  }

  #[tokio::test]
  async fn external_override_pins_peer_version() {
    let dir = tempfile::tempdir().unwrap();
    let installer = test_installer();
    let resolver = MetadataResolver::new(dir.path(), dir.path(), &installer, "/data", 1);

    let a = pkg("a", "1.0.0");
    let raw = vec![(
      a.clone(),
      dir.path().to_path_buf(),
      manifest(r#"{"name":"a","version":"1.0.0","peerDependencies":{"c":"^2.0.0"}}"#),
    )];
    let externals = vec![pkg("c", "2.5.0")];
    let peers = resolver.collect_true_peers(&[a], &raw, &externals);
    assert_eq!(peers[0].version, "2.5.0");
  }
}
