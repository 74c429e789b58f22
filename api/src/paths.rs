// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Artifact URL/disk-path shapes, collected in one place for easy viewing
//! (spec.md §6 "Persisted state layout" / "Artifact URL shape").
use crate::fingerprint::BuildId;

/// Rooted under `builds/v<BV>/` (spec.md §6 "Persisted state layout") so a
/// BuildVersion bump namespaces every prior artifact away instead of
/// colliding with it.
pub fn js_sidecar_path(storage_root: &str, build_version: u32, build_id: &BuildId) -> String {
  format!("{storage_root}/builds/v{build_version}/{build_id}.js")
}

pub fn css_sidecar_path(storage_root: &str, build_version: u32, build_id: &BuildId) -> String {
  format!("{storage_root}/builds/v{build_version}/{build_id}.css")
}

pub fn polyfill_path(storage_root: &str, build_version: u32, name: &str) -> String {
  format!("{storage_root}/builds/v{build_version}/_{name}.js")
}

pub fn types_root(storage_root: &str, build_version: u32) -> String {
  format!("{storage_root}/types/v{build_version}")
}

/// The public URL path clients use to fetch the js artifact (spec.md §6).
pub fn js_url_path(build_id: &BuildId) -> String {
  format!("/{build_id}.js")
}

pub fn css_url_path(build_id: &BuildId) -> String {
  format!("/{build_id}.css")
}

/// `/v<BV>/<pkgName>@<version>/<target>/<basename>[.development].js`
/// (spec.md §4.7 "Known package" resolvePath shape).
pub fn known_external_url_path(
  build_version: u32,
  pkg_name: &str,
  version: &str,
  target: &str,
  basename: &str,
  dev: bool,
) -> String {
  let suffix = if dev { ".development" } else { "" };
  format!("/v{build_version}/{pkg_name}@{version}/{target}/{basename}{suffix}.js")
}

pub fn node_builtin_polyfill_url_path(build_version: u32, name: &str) -> String {
  format!("/v{build_version}/_node_{name}.js")
}

pub fn deno_std_bridge_url_path(build_version: u32, name: &str) -> String {
  format!("/v{build_version}/_deno_std_node_{name}.js")
}

pub fn resolve_error_url_path(name: &str) -> String {
  format!(
    "/_error.js?type=resolve&name={}",
    urlencoding::encode(name)
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn js_sidecar_path_is_rooted_under_build_version_directory() {
    assert_eq!(
      js_sidecar_path("/data", 1, &"v1/preact@10.5.0/es2020/preact".to_string()),
      "/data/builds/v1/v1/preact@10.5.0/es2020/preact.js"
    );
  }

  #[test]
  fn resolve_error_url_path_is_percent_encoded() {
    assert_eq!(
      resolve_error_url_path("node:fs"),
      "/_error.js?type=resolve&name=node%3Afs"
    );
  }
}
