// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Emits the virtual entry source handed to the bundler (spec.md §4.6).
use crate::model::BuildRequest;
use crate::model::ImportMeta;
use crate::model::PackageRef;

/// Maps a package import path to a safe JS identifier: `/`, `-`, `@`, `.`
/// become `_` (spec.md §4.6 `id(path)`).
pub fn safe_id(path: &str) -> String {
  path
    .chars()
    .map(|c| match c {
      '/' | '-' | '@' | '.' => '_',
      c => c,
    })
    .collect()
}

/// `Synthesize(BuildRequest, metas) -> entry source`. Dispatches to the
/// single- or multi-package form depending on `req.is_multi_package()`.
pub fn synthesize(req: &BuildRequest, metas: &[(&PackageRef, &ImportMeta)]) -> String {
  if req.is_multi_package() {
    synthesize_multi(metas)
  } else {
    let (pkg, meta) = metas[0];
    synthesize_single(pkg, meta)
  }
}

fn synthesize_single(pkg: &PackageRef, meta: &ImportMeta) -> String {
  let path = pkg.import_path();
  let has_default = meta.has_default_export();
  let non_default: Vec<&str> = meta.non_default_exports().collect();

  if meta.is_esm {
    let mut out = String::new();
    if !non_default.is_empty() {
      out.push_str(&format!("export * from \"{path}\"\n"));
    }
    if has_default {
      out.push_str(&format!("export {{ default }} from \"{path}\"\n"));
    }
    out
  } else {
    let id = safe_id(&path);
    let mut out = format!("import __{id}_default from \"{path}\"\n");
    if !non_default.is_empty() {
      out.push_str(&format!("import * as __{id}_star from \"{path}\"\n"));
      let list = non_default.join(", ");
      out.push_str(&format!("export const {{ {list} }} = __{id}_star\n"));
    }
    out.push_str(&format!("export default __{id}_default\n"));
    out
  }
}

fn synthesize_multi(metas: &[(&PackageRef, &ImportMeta)]) -> String {
  let mut out = String::new();
  for (pkg, meta) in metas {
    let path = pkg.import_path();
    let id = safe_id(&path);

    if meta.main.is_empty() {
      out.push_str(&format!("export const __{id}_default = null\n"));
      continue;
    }

    let has_default = meta.has_default_export();
    if meta.is_esm {
      out.push_str(&format!("export * as __{id}_star from \"{path}\"\n"));
      if has_default {
        out.push_str(&format!(
          "export {{default as __{id}_default}} from \"{path}\"\n"
        ));
      }
    } else {
      out.push_str(&format!("import __{id}_star from \"{path}\"\n"));
      out.push_str(&format!("export {{ __{id}_star }}\n"));
      if has_default {
        out.push_str(&format!(
          "export {{ default as __{id}_default }} from \"{path}\"\n"
        ));
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::PackageName;
  use indexmap::IndexMap;
  use pretty_assertions::assert_eq;

  fn pkg(name: &str) -> PackageRef {
    PackageRef::new(PackageName::parse(name).unwrap(), "1.0.0", "")
  }

  fn meta(is_esm: bool, exports: &[&str], main: &str) -> ImportMeta {
    ImportMeta {
      name: "x".to_string(),
      version: "1.0.0".to_string(),
      main: main.to_string(),
      module: String::new(),
      r#type: String::new(),
      types: String::new(),
      typings: String::new(),
      dependencies: IndexMap::new(),
      peer_dependencies: IndexMap::new(),
      exports: exports.iter().map(|s| s.to_string()).collect(),
      dts: String::new(),
      is_esm,
    }
  }

  #[test]
  fn safe_id_replaces_reserved_characters() {
    assert_eq!(safe_id("@scope/name"), "_scope_name");
    assert_eq!(safe_id("react-dom/server"), "react_dom_server");
  }

  #[test]
  fn single_esm_emits_star_and_default() {
    let p = pkg("preact");
    let m = meta(true, &["h", "default"], "index.js");
    let src = synthesize_single(&p, &m);
    assert!(src.contains("export * from \"preact\""));
    assert!(src.contains("export { default } from \"preact\""));
  }

  #[test]
  fn single_esm_without_default_omits_default_line() {
    let p = pkg("preact");
    let m = meta(true, &["h"], "index.js");
    let src = synthesize_single(&p, &m);
    assert!(src.contains("export * from"));
    assert!(!src.contains("export { default }"));
  }

  #[test]
  fn single_cjs_destructures_named_exports() {
    let p = pkg("react");
    let m = meta(false, &["Component", "default"], "index.js");
    let src = synthesize_single(&p, &m);
    assert!(src.contains("import __react_default from \"react\""));
    assert!(src.contains("import * as __react_star from \"react\""));
    assert!(src.contains("export const { Component } = __react_star"));
    assert!(src.contains("export default __react_default"));
  }

  #[test]
  fn multi_package_null_default_when_main_empty() {
    let p = pkg("empty-pkg");
    let m = meta(true, &[], "");
    let src = synthesize_multi(&[(&p, &m)]);
    assert_eq!(src, "export const __empty_pkg_default = null\n");
  }

  #[test]
  fn multi_package_esm_emits_star_and_default() {
    let p = pkg("lit-html");
    let m = meta(true, &["html", "default"], "index.js");
    let src = synthesize_multi(&[(&p, &m)]);
    assert!(src.contains("export * as __lit_html_star from \"lit-html\""));
    assert!(src.contains("export {default as __lit_html_default} from \"lit-html\""));
  }

  #[test]
  fn multi_package_cjs_without_default_still_exports_star() {
    let p = pkg("readable-stream");
    let m = meta(false, &["Readable"], "index.js");
    let src = synthesize_multi(&[(&p, &m)]);
    assert!(src.contains("import __readable_stream_star from \"readable-stream\""));
    assert!(src.contains("export { __readable_stream_star }"));
    assert!(!src.contains("__readable_stream_default"));
  }
}
