// Copyright 2024 the registry authors. All rights reserved. MIT license.
//! The Build Serializer (spec.md §4.10), implemented as the refinement
//! recommended in spec.md §9 rather than the specified single global
//! mutex: a per-fingerprint coalescing map of in-flight build futures.
//! Identical concurrent requests for the same BuildID share one build;
//! distinct BuildIDs proceed in parallel (installer/FS safety comes from
//! each build using its own temp working directory, spec.md §5).
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::future::Shared;
use futures::FutureExt;

use crate::fingerprint::BuildId;

type Coalesced<T, E> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<E>>>>;

pub struct BuildSerializer<T, E> {
  inflight: Mutex<HashMap<BuildId, Coalesced<T, E>>>,
}

impl<T, E> Default for BuildSerializer<T, E> {
  fn default() -> Self {
    BuildSerializer {
      inflight: Mutex::new(HashMap::new()),
    }
  }
}

impl<T, E> BuildSerializer<T, E>
where
  T: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Runs `make` to completion for `build_id`, or joins an already-running
  /// build for the same id if one exists. The entry is removed once the
  /// build finishes (success or failure) so a subsequent request for the
  /// same id — e.g. after a failed build — starts fresh rather than
  /// replaying a stale error.
  pub async fn run<F, Fut>(&self, build_id: BuildId, make: F) -> Result<Arc<T>, Arc<E>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let shared = {
      let mut inflight = self.inflight.lock().unwrap();
      if let Some(existing) = inflight.get(&build_id) {
        existing.clone()
      } else {
        let fut = make().map(|r| r.map(Arc::new).map_err(Arc::new)).boxed();
        let shared: Coalesced<T, E> = fut.shared();
        inflight.insert(build_id.clone(), shared.clone());
        shared
      }
    };

    let result = shared.await;

    self.inflight.lock().unwrap().remove(&build_id);

    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;

  #[tokio::test]
  async fn concurrent_identical_requests_share_one_build() {
    let serializer: Arc<BuildSerializer<u32, String>> = Arc::new(BuildSerializer::new());
    let call_count = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
      let serializer = serializer.clone();
      let call_count = call_count.clone();
      handles.push(tokio::spawn(async move {
        serializer
          .run("same-id".to_string(), move || async move {
            call_count.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok::<u32, String>(42)
          })
          .await
      }));
    }

    for h in handles {
      assert_eq!(*h.await.unwrap().unwrap(), 42);
    }
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn distinct_build_ids_run_independently() {
    let serializer: BuildSerializer<u32, String> = BuildSerializer::new();
    let a = serializer.run("a".to_string(), || async { Ok::<u32, String>(1) });
    let b = serializer.run("b".to_string(), || async { Ok::<u32, String>(2) });
    let (a, b) = tokio::join!(a, b);
    assert_eq!(*a.unwrap(), 1);
    assert_eq!(*b.unwrap(), 2);
  }

  #[tokio::test]
  async fn failed_build_does_not_poison_subsequent_requests() {
    let serializer: BuildSerializer<u32, String> = BuildSerializer::new();
    let first = serializer
      .run("id".to_string(), || async { Err::<u32, String>("boom".to_string()) })
      .await;
    assert!(first.is_err());

    let second = serializer
      .run("id".to_string(), || async { Ok::<u32, String>(7) })
      .await;
    assert_eq!(*second.unwrap(), 7);
  }
}
