// Copyright 2024 the registry authors. All rights reserved. MIT license.
use data_encoding::BASE32_NOPAD;
use sha1::Digest;
use sha1::Sha1;

use crate::errors::BuildError;
use crate::model::BuildRequest;

/// A canonical string identifying one build request (spec.md §3, §4.1).
/// For a single-package request this is the human-readable path the
/// artifact is served from directly; for a multi-package request it is a
/// content hash, since the packages list itself has no natural path shape.
pub type BuildId = String;

/// `Fingerprint(BuildRequest) -> BuildID`. Deterministic, no I/O.
/// Permuting `packages` or `externals` must not change the output for the
/// multi-package form (spec.md §8 property 1), so both lists are sorted
/// before they are consulted.
pub fn fingerprint(
  build_version: u32,
  req: &BuildRequest,
) -> Result<BuildId, BuildError> {
  if req.packages.is_empty() {
    return Err(BuildError::BadRequest(
      "build request must contain at least one package".to_string(),
    ));
  }

  if req.is_multi_package() {
    Ok(multi_package_id(build_version, req))
  } else {
    Ok(single_package_id(build_version, req))
  }
}

fn single_package_id(build_version: u32, req: &BuildRequest) -> BuildId {
  let pkg = &req.packages[0];
  let target_segment = target_segment(req);
  let mut filename = pkg.filename_segment().to_string();
  if req.dev {
    filename.push_str(".development");
  }
  format!(
    "v{build_version}/{}@{}/{target_segment}/{filename}",
    pkg.name, pkg.version
  )
}

fn target_segment(req: &BuildRequest) -> String {
  if req.externals.is_empty() {
    req.target.to_string()
  } else {
    let mut sorted = req.externals.clone();
    sorted.sort();
    let joined = sorted
      .iter()
      .map(|e| format!("{}@{}{}", e.name, e.version, submodule_suffix(e)).replace('/', "_"))
      .collect::<Vec<_>>()
      .join("_");
    format!("external={joined}/{}", req.target)
  }
}

fn multi_package_id(build_version: u32, req: &BuildRequest) -> BuildId {
  let mut packages = req.packages.clone();
  packages.sort();
  let mut externals = req.externals.clone();
  externals.sort();

  let packages_str = packages
    .iter()
    .map(|p| format!("{}@{}{}", p.name, p.version, submodule_suffix(p)))
    .collect::<Vec<_>>()
    .join(",");
  let externals_str = externals
    .iter()
    .map(|p| format!("{}@{}{}", p.name, p.version, submodule_suffix(p)))
    .collect::<Vec<_>>()
    .join(",");

  let canonical = format!(
    "v{build_version}/{packages_str}/{externals_str}/{}/{}",
    req.target, req.dev
  );

  let digest = Sha1::digest(canonical.as_bytes());
  let b32 = BASE32_NOPAD.encode(&digest).to_ascii_lowercase();
  format!("bundle-{b32}")
}

fn submodule_suffix(pkg: &crate::model::PackageRef) -> String {
  if pkg.submodule.is_empty() {
    String::new()
  } else {
    format!("/{}", pkg.submodule)
  }
}
