//! Dataset loader. Loads a member dataset by path, reusing the host's own
//! request pipeline to read a nested dataset rather than opening it through
//! a second, independent code path. The temporary context swap this needs
//! is made explicit as a *context handle*: `ContextState` plus a scoped
//! [`ContextGuard`] that restores it on every exit path, including an early
//! return via `?`.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::model::DatasetTree;
use crate::{AggError, AggResult};

/// Which response the loader should produce: metadata only (DDX-style) or
/// the full data tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Metadata,
    Data,
}

/// The fields the loader snapshots and restores around a nested load:
/// current container binding, action, and action name. Modelled as an
/// explicit struct rather than any implicit/global state.
#[derive(Debug, Clone, Default)]
struct ContextState {
    container: Option<String>,
    action: Option<String>,
    action_name: Option<String>,
}

/// The host's catalog/container registry. Out of scope to *implement* (the
/// host owns the real one), but the core needs something to register a
/// synthesised symbol against while a nested load is in flight, so this is
/// the seam the host would plug its own registry into.
#[derive(Default)]
pub struct CatalogStorage {
    containers: Mutex<HashSet<String>>,
}

impl CatalogStorage {
    pub fn new() -> CatalogStorage {
        CatalogStorage::default()
    }

    pub fn register(&self, symbol: &str) {
        self.containers.lock().unwrap().insert(symbol.to_string());
    }

    pub fn unregister(&self, symbol: &str) {
        self.containers.lock().unwrap().remove(symbol);
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.containers.lock().unwrap().contains(symbol)
    }
}

/// The host's request-handler pipeline: given a bound container and a load
/// kind, produce a typed tree. The host's own request runtime is out of
/// scope here; this trait is the interface the core consumes from it.
#[async_trait]
pub trait RequestPipeline: Send + Sync {
    async fn execute(&self, path: &str, kind: LoadKind) -> AggResult<DatasetTree>;
}

/// Scoped guard: on construction nothing happens (the caller already
/// installed the new state); on `Drop` the previous context is restored and
/// the synthesised container symbol is unregistered. This is a scoped
/// acquisition of the hijacked context with guaranteed release, running on
/// every exit path.
struct ContextGuard<'a> {
    context: &'a Mutex<ContextState>,
    catalog: &'a CatalogStorage,
    snapshot: ContextState,
    symbol: String,
}

impl<'a> Drop for ContextGuard<'a> {
    fn drop(&mut self) {
        *self.context.lock().unwrap() = self.snapshot.clone();
        self.catalog.unregister(&self.symbol);
    }
}

pub struct DatasetLoader {
    catalog: Arc<CatalogStorage>,
    context: Arc<Mutex<ContextState>>,
    pipeline: Arc<dyn RequestPipeline>,
    counter: AtomicU64,
}

impl DatasetLoader {
    pub fn new(pipeline: Arc<dyn RequestPipeline>) -> DatasetLoader {
        DatasetLoader {
            catalog: Arc::new(CatalogStorage::new()),
            context: Arc::new(Mutex::new(ContextState::default())),
            pipeline,
            counter: AtomicU64::new(0),
        }
    }

    /// `load(path, kind)`: snapshot -> install -> execute -> restore.
    pub async fn load(&self, path: &str, kind: LoadKind) -> AggResult<DatasetTree> {
        if !std::path::Path::new(path).exists() {
            return Err(AggError::not_found(format!("dataset not found: {}", path)));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let symbol = format!("__Loader_{}__{}", n, path);

        let snapshot = self.context.lock().unwrap().clone();
        self.catalog.register(&symbol);

        {
            let mut ctx = self.context.lock().unwrap();
            ctx.container = Some(symbol.clone());
            ctx.action = Some(
                match kind {
                    LoadKind::Metadata => "ddx",
                    LoadKind::Data => "dods",
                }
                .to_string(),
            );
            ctx.action_name = Some(symbol.clone());
        }

        let _guard = ContextGuard {
            context: &self.context,
            catalog: &self.catalog,
            snapshot,
            symbol: symbol.clone(),
        };

        trace!("loader: executing pipeline for {} ({:?})", path, kind);
        self.pipeline.execute(path, kind).await
        // _guard drops here on every exit path, including `?` above.
    }

    pub async fn load_into(
        &self,
        path: &str,
        kind: LoadKind,
        into: &mut DatasetTree,
    ) -> AggResult<()> {
        *into = self.load(path, kind).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingPipeline {
        failed_once: AtomicBool,
    }

    #[async_trait]
    impl RequestPipeline for FailingPipeline {
        async fn execute(&self, _path: &str, _kind: LoadKind) -> AggResult<DatasetTree> {
            self.failed_once.store(true, Ordering::SeqCst);
            Err(AggError::internal("boom"))
        }
    }

    #[tokio::test]
    async fn restores_context_even_on_pipeline_failure() {
        let pipeline = Arc::new(FailingPipeline {
            failed_once: AtomicBool::new(false),
        });
        let loader = DatasetLoader::new(pipeline.clone());

        let f = tempfile::NamedTempFile::new().unwrap();
        let path = f.path().to_str().unwrap();

        let before = loader.context.lock().unwrap().clone();
        let res = loader.load(path, LoadKind::Data).await;

        assert!(res.is_err());
        assert!(pipeline.failed_once.load(Ordering::SeqCst));

        let after = loader.context.lock().unwrap().clone();
        assert_eq!(before.container, after.container);
        assert_eq!(loader.catalog.containers.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        struct Unused;
        #[async_trait]
        impl RequestPipeline for Unused {
            async fn execute(&self, _path: &str, _kind: LoadKind) -> AggResult<DatasetTree> {
                unreachable!()
            }
        }
        let loader = DatasetLoader::new(Arc::new(Unused));
        let err = loader.load("/no/such/file.nc", LoadKind::Data).await.unwrap_err();
        assert!(matches!(err, AggError::NotFound { .. }));
    }
}
