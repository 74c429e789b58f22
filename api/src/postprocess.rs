// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Satisfies the bundler's sentinel substitutions and prepends the
//! service banner (spec.md §4.9).
use std::collections::HashMap;

use crate::external_resolver::BuildContext;
use crate::fingerprint::BuildId;
use crate::ids::Target;
use crate::model::ImportMetaMap;
use crate::model::PackageRef;
use crate::paths;
use crate::synth::safe_id;

pub struct PostProcessor;

impl PostProcessor {
  /// `js` is the bundler's rewritten output (after [`crate::bundler`]'s
  /// specifier pass). Returns the final artifact bytes.
  #[allow(clippy::too_many_arguments)]
  pub fn process(
    js: &str,
    ctx: &BuildContext,
    build_id: &BuildId,
    service_hostname: &str,
    requested: &[PackageRef],
    target: Target,
    dev: bool,
    metas: &ImportMetaMap,
  ) -> String {
    let mut prelude = String::new();

    if js.contains("__process$") {
      prelude.push_str(&format!(
        "import __process$ from \"/v{}/_node_process.js\"\n",
        ctx.build_version
      ));
    }

    // `__filename`/`__dirname` need the final artifact's own absolute URL,
    // which only exists once the BuildID is known (spec.md §4.8, §4.9).
    if js.contains("__filename") {
      let url = format!("https://{service_hostname}{}", paths::js_url_path(build_id));
      prelude.push_str(&format!("const __filename = \"{url}\"\n"));
    }

    if js.contains("__dirname") {
      let url = format!("https://{service_hostname}{}", paths::js_url_path(build_id));
      let dir = url.rsplit_once('/').map_or(url.as_str(), |(dir, _)| dir);
      prelude.push_str(&format!("const __dirname = \"{dir}\"\n"));
    }

    if js.contains("__Buffer$") {
      prelude.push_str(&format!(
        "import {{ Buffer as __Buffer$ }} from \"/v{}/_node_buffer.js\"\n",
        ctx.build_version
      ));
    }

    let mut body = js.to_string();
    for (name, url) in ordered_peer_entries(&ctx.peer_modules_for_commonjs) {
      if url.is_empty() {
        // dangling entry: the signaled resolve failure (spec.md §4.9);
        // the require() call is left as-is and throws at runtime.
        continue;
      }
      let id = safe_id(name);
      prelude.push_str(&format!("import __{id}$ from \"{url}\"\n"));
      body = body.replace(&format!("require(\"{name}\")"), &format!("__{id}$"));
    }

    if js.contains("__global$") {
      prelude.push_str(
        "const __global$ = typeof window !== \"undefined\" ? window : globalThis\n",
      );
    }

    // spec.md §9 Open Question: the bundler only ever emits the
    // single-dollar `__setImmediate$`, but this check looks for the
    // doubled `__setImmediate$$` the source used — preserved verbatim, so
    // this shim never actually fires.
    if js.contains("__setImmediate$$") {
      prelude.push_str(
        "const __setImmediate$$ = (cb, ...args) => setTimeout(cb, 0, ...args)\n",
      );
    }

    if js.contains("__rResolve$") {
      prelude.push_str("const __rResolve$ = (v) => v\n");
    }

    let banner = build_banner(requested, target, dev, metas);

    format!("{banner}{prelude}{body}")
  }
}

fn ordered_peer_entries(map: &HashMap<String, String>) -> Vec<(&String, &String)> {
  let mut entries: Vec<_> = map.iter().collect();
  entries.sort_by(|a, b| a.0.cmp(b.0));
  entries
}

fn build_banner(
  requested: &[PackageRef],
  target: Target,
  dev: bool,
  metas: &ImportMetaMap,
) -> String {
  let names = requested
    .iter()
    .map(|p| format!("{}@{}", p.name, p.version))
    .collect::<Vec<_>>()
    .join(", ");
  let env = if dev { "development" } else { "production" };
  let mut banner = format!("/* esm.sh - {names} - {target} - {env} */\n");

  if dev {
    banner.push_str("/* bundled dependencies:\n");
    let mut deps: Vec<(&str, &str)> = metas
      .values()
      .flat_map(|m| {
        m.dependencies
          .iter()
          .map(|(name, version)| (name.as_str(), version.as_str()))
      })
      .collect();
    deps.sort();
    deps.dedup();
    for (name, version) in deps {
      banner.push_str(&format!(" * {name}: {version}\n"));
    }
    banner.push_str(" */\n");
  }

  banner
}
