// Copyright 2024 the registry authors. All rights reserved. MIT license.
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// A registry package name, e.g. `preact` or `@scope/name`. Stored already
/// split into an optional scope and the bare package name so downstream code
/// never has to re-parse the `@scope/name` shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName {
  scope: Option<String>,
  name: String,
}

impl PackageName {
  pub fn parse(raw: &str) -> Result<Self, PackageNameValidateError> {
    if raw.is_empty() {
      return Err(PackageNameValidateError::Empty);
    }

    let (scope, name) = if let Some(rest) = raw.strip_prefix('@') {
      let (scope, name) = rest
        .split_once('/')
        .ok_or(PackageNameValidateError::MissingScopeSeparator)?;
      (Some(scope), name)
    } else {
      (None, raw)
    };

    if name.is_empty() || scope.is_some_and(str::is_empty) {
      return Err(PackageNameValidateError::Empty);
    }

    let valid_segment = |s: &str| {
      s.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
    };
    if !valid_segment(name) {
      return Err(PackageNameValidateError::InvalidCharacters);
    }
    if let Some(scope) = scope {
      if !valid_segment(scope) {
        return Err(PackageNameValidateError::InvalidCharacters);
      }
    }

    Ok(PackageName {
      scope: scope.map(str::to_owned),
      name: name.to_owned(),
    })
  }

  pub fn scope(&self) -> Option<&str> {
    self.scope.as_deref()
  }

  /// The bare package name, without the `@scope/` prefix. Used as the
  /// filename basename for single-package build IDs (spec.md §3).
  pub fn basename(&self) -> &str {
    &self.name
  }
}

impl fmt::Display for PackageName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.scope {
      Some(scope) => write!(f, "@{scope}/{}", self.name),
      None => write!(f, "{}", self.name),
    }
  }
}

impl FromStr for PackageName {
  type Err = PackageNameValidateError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

impl Serialize for PackageName {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

impl<'de> Deserialize<'de> for PackageName {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    Self::parse(&s).map_err(serde::de::Error::custom)
  }
}

#[derive(Debug, Clone, Error)]
pub enum PackageNameValidateError {
  #[error("package name must not be empty")]
  Empty,
  #[error("scoped package name must contain a '/' after the scope")]
  MissingScopeSeparator,
  #[error("package name must contain only alphanumeric characters, '-', '.' and '_'")]
  InvalidCharacters,
}

/// The bundler target engine a build is compiled for. Closed set per
/// spec.md §6; unrecognized targets are rejected upstream of the build core
/// (by the HTTP front-end), so parsing here always succeeds for values that
/// reach the pipeline, but we keep `parse` fallible for defense at the
/// library boundary and for the CLI entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
  Deno,
  Es2015,
  Es2016,
  Es2017,
  Es2018,
  Es2019,
  Es2020,
}

impl Target {
  pub const ALL: [Target; 7] = [
    Target::Deno,
    Target::Es2015,
    Target::Es2016,
    Target::Es2017,
    Target::Es2018,
    Target::Es2019,
    Target::Es2020,
  ];

  /// The path/URL segment used for this target, matching spec.md §3/§6.
  pub fn as_segment(&self) -> &'static str {
    match self {
      Target::Deno => "deno",
      Target::Es2015 => "es2015",
      Target::Es2016 => "es2016",
      Target::Es2017 => "es2017",
      Target::Es2018 => "es2018",
      Target::Es2019 => "es2019",
      Target::Es2020 => "es2020",
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_segment())
  }
}

impl FromStr for Target {
  type Err = TargetParseError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Target::ALL
      .into_iter()
      .find(|t| t.as_segment() == s)
      .ok_or_else(|| TargetParseError(s.to_owned()))
  }
}

#[derive(Debug, Clone, Error)]
#[error("unrecognized build target '{0}'")]
pub struct TargetParseError(pub String);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_unscoped_name() {
    let n = PackageName::parse("preact").unwrap();
    assert_eq!(n.scope(), None);
    assert_eq!(n.basename(), "preact");
    assert_eq!(n.to_string(), "preact");
  }

  #[test]
  fn parses_scoped_name() {
    let n = PackageName::parse("@babel/core").unwrap();
    assert_eq!(n.scope(), Some("babel"));
    assert_eq!(n.basename(), "core");
    assert_eq!(n.to_string(), "@babel/core");
  }

  #[test]
  fn rejects_missing_scope_separator() {
    assert!(matches!(
      PackageName::parse("@babel"),
      Err(PackageNameValidateError::MissingScopeSeparator)
    ));
  }

  #[test]
  fn rejects_empty() {
    assert!(matches!(
      PackageName::parse(""),
      Err(PackageNameValidateError::Empty)
    ));
  }

  #[test]
  fn target_roundtrips_through_segment() {
    for t in Target::ALL {
      assert_eq!(Target::from_str(t.as_segment()).unwrap(), t);
    }
  }

  #[test]
  fn target_rejects_unknown() {
    assert!(Target::from_str("es2021").is_err());
  }
}
