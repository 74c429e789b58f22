// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! Wires the ten components into the control flow from spec.md §2:
//! Fingerprinter -> Artifact Store (hit returns) -> on miss, Build
//! Serializer gates entry to Installer -> Resolver -> Shape Prober ->
//! Synthesizer -> Bundler Driver (External Resolver as its plugin) ->
//! Post-Processor -> Artifact Store.
use std::sync::Arc;

use tracing::instrument;

use crate::artifact_store::ArtifactStore;
use crate::artifact_store::KvStore;
use crate::artifact_store::LookupOutcome;
use crate::bundler::BundlerDriver;
use crate::config::BuildConfig;
use crate::errors::BuildError;
use crate::external_resolver::BuildContext;
use crate::fingerprint::fingerprint;
use crate::fingerprint::BuildId;
use crate::ids::PackageName;
use crate::installer::RegistryInstaller;
use crate::metadata_resolver::MetadataResolver;
use crate::model::BuildRequest;
use crate::model::ImportMetaMap;
use crate::model::PackageRef;
use crate::paths;
use crate::postprocess::PostProcessor;
use crate::probe::ModuleShapeProber;
use crate::serializer::BuildSerializer;
use crate::synth;

/// What a successful build (whether fresh or served from cache) produces.
pub struct BuildOutput {
  pub build_id: BuildId,
  pub js: Vec<u8>,
  pub css: Option<Vec<u8>>,
  pub import_meta: ImportMetaMap,
}

pub struct Pipeline<K: KvStore> {
  config: Arc<BuildConfig>,
  store: Arc<ArtifactStore<K>>,
  serializer: BuildSerializer<BuildOutput, BuildError>,
}

impl<K: KvStore + 'static> Pipeline<K> {
  pub fn new(config: BuildConfig, kv: K) -> Self {
    let storage_root = config.storage_root.clone();
    let build_version = config.build_version;
    Pipeline {
      config: Arc::new(config),
      store: Arc::new(ArtifactStore::new(kv, storage_root, build_version)),
      serializer: BuildSerializer::new(),
    }
  }

  /// `Fingerprint -> Lookup` on the calling task (cache lookups happen
  /// outside the serializer and may proceed in parallel, spec.md §5); on a
  /// miss the rest of the pipeline runs under the per-fingerprint
  /// coalescing gate.
  #[instrument(skip(self, req), err)]
  pub async fn build(&self, req: BuildRequest) -> Result<Arc<BuildOutput>, Arc<BuildError>> {
    let build_id = fingerprint(self.config.build_version, &req).map_err(Arc::new)?;

    if let LookupOutcome::Hit { import_meta, has_css } =
      self.store.lookup(&build_id).await.map_err(Arc::new)?
    {
      let js = tokio::fs::read(paths::js_sidecar_path(
        &self.config.storage_root,
        self.config.build_version,
        &build_id,
      ))
      .await
      .map_err(BuildError::IoFailed)
      .map_err(Arc::new)?;
      let css = if has_css {
        Some(
          tokio::fs::read(paths::css_sidecar_path(
            &self.config.storage_root,
            self.config.build_version,
            &build_id,
          ))
          .await
          .map_err(BuildError::IoFailed)
          .map_err(Arc::new)?,
        )
      } else {
        None
      };
      return Ok(Arc::new(BuildOutput {
        build_id,
        js,
        css,
        import_meta,
      }));
    }

    let config = self.config.clone();
    let store = self.store.clone();
    let build_id_for_run = build_id.clone();

    self
      .serializer
      .run(build_id.clone(), move || async move {
        run_build(&config, &store, &build_id_for_run, req).await
      })
      .await
  }
}

async fn run_build<K: KvStore>(
  config: &BuildConfig,
  store: &ArtifactStore<K>,
  build_id: &BuildId,
  req: BuildRequest,
) -> Result<BuildOutput, BuildError> {
  let installer = RegistryInstaller::new(&config.installer_bin, config.installer_timeout());
  let work_dir = installer.install(&req.packages).await?;

  let node_modules = work_dir.node_modules();
  let resolver = MetadataResolver::new(
    &node_modules,
    work_dir.path(),
    &installer,
    &config.storage_root,
    config.build_version,
  );
  let (mut metas, true_peers) = resolver.resolve(&req.packages, &req.externals).await?;

  if !true_peers.is_empty() {
    installer
      .install_into(work_dir.path(), &true_peers)
      .await?;
  }

  let prober = ModuleShapeProber::new(&config.cjs_lexer_bin, config.probe_timeout());
  for pkg in &req.packages {
    let meta = metas
      .get_mut(&pkg.import_path())
      .expect("resolver populates one meta per requested package");
    probe_package(&prober, work_dir.path(), pkg, meta).await?;
  }

  let mut ctx = BuildContext::new(&req)
    .with_build_version(config.build_version)
    .with_true_peers(true_peers);

  let ordered: Vec<(&PackageRef, &crate::model::ImportMeta)> = req
    .packages
    .iter()
    .map(|p| (p, metas.get(&p.import_path()).unwrap()))
    .collect();
  let entry_source = synth::synthesize(&req, &ordered);

  let bundler = BundlerDriver::new(
    &config.bundler_bin,
    config.bundle_timeout(),
    config.max_bundle_retries,
  );
  let bundled = bundler.build(&entry_source, &mut ctx).await?;

  let final_js = PostProcessor::process(
    &String::from_utf8_lossy(&bundled.js),
    &ctx,
    build_id,
    &config.service_hostname,
    &req.packages,
    req.target,
    req.dev,
    &metas,
  );

  store
    .commit(build_id, final_js.as_bytes(), None, metas.clone())
    .await?;

  Ok(BuildOutput {
    build_id: build_id.clone(),
    js: final_js.into_bytes(),
    css: None,
    import_meta: metas,
  })
}

/// Resolves the entry file to probe (`module` if set, else `main`, else
/// `index.js`) and re-probes as CJS if a declared `module` turns out not to
/// be ESM (spec.md §4.5).
async fn probe_package(
  prober: &ModuleShapeProber,
  work_dir: &std::path::Path,
  pkg: &PackageRef,
  meta: &mut crate::model::ImportMeta,
) -> Result<(), BuildError> {
  let segment = pkg_segment(&pkg.name);

  if !meta.module.is_empty() {
    let rel = format!("node_modules/{segment}/{}", meta.module);
    let (exports, is_esm) = prober.probe(work_dir, &rel).await?;
    if is_esm {
      meta.exports = exports;
      meta.is_esm = true;
      return Ok(());
    }
    meta.module = String::new();
  }

  let main = if meta.main.is_empty() { "index.js" } else { &meta.main };
  let rel = format!("node_modules/{segment}/{main}");
  let (exports, is_esm) = prober.probe(work_dir, &rel).await?;
  meta.exports = exports;
  meta.is_esm = is_esm;
  Ok(())
}

fn pkg_segment(name: &PackageName) -> String {
  match name.scope() {
    Some(scope) => format!("@{scope}/{}", name.basename()),
    None => name.basename().to_string(),
  }
}
