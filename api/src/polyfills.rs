// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Static name tables the External Resolver classifies unknown imports
//! against (spec.md §4.7). spec.md treats "the static polyfill/type embed
//! set" as an out-of-scope external collaborator (§1); this module supplies
//! a minimal working table so the resolver is exercisable end-to-end. A
//! production deployment would swap this table for the externally-managed
//! embed set without touching the resolver's logic — callers take the
//! table by reference, never reach for these constants directly.

/// Platform built-in module names with a bundled polyfill (spec.md §4.7
/// "Unknown name that matches a built-in module polyfill name").
const NODE_BUILTINS: &[&str] = &[
  "assert", "buffer", "events", "fs", "path", "process", "stream", "string_decoder",
  "url", "util", "querystring", "os", "crypto", "http", "https", "net", "tty", "zlib",
];

/// Names bridged to `deno.land/std/node` when `target == deno` (spec.md
/// §4.7 "Target deno + name in the deno-std bridge set").
const DENO_STD_BRIDGE: &[&str] = &["fs", "path", "process", "util", "events"];

/// Registry-hosted polyfill mappings: an unknown import name that isn't a
/// Node builtin but has a published polyfill package, resolved "as a
/// newly-known package at latest" (spec.md §4.7).
const REGISTRY_POLYFILLS: &[(&str, &str)] = &[
  ("readable-stream", "readable-stream"),
  ("punycode", "punycode"),
  ("inherits", "inherits"),
];

pub struct PolyfillTable;

impl PolyfillTable {
  pub fn is_node_builtin(name: &str) -> bool {
    NODE_BUILTINS.contains(&name)
  }

  pub fn is_deno_std_bridged(name: &str) -> bool {
    DENO_STD_BRIDGE.contains(&name)
  }

  pub fn registry_polyfill(name: &str) -> Option<&'static str> {
    REGISTRY_POLYFILLS
      .iter()
      .find(|(n, _)| *n == name)
      .map(|(_, pkg)| *pkg)
  }
}
