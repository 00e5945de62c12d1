//! Member-dataset handle: identifies one dataset participating in an
//! aggregation, either a lazily-loaded file location or an already
//! in-memory tree for a nested/virtual aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::dimcache::CacheStore;
use crate::loader::{DatasetLoader, LoadKind};
use crate::model::{DatasetTree, Dimension};
use crate::{AggError, AggResult};

enum MemberSource {
    /// Lazy-loads through the host's dataset loader on first data-bearing
    /// access.
    Location {
        loader: Arc<DatasetLoader>,
        tree: tokio::sync::Mutex<Option<Arc<DatasetTree>>>,
    },
    /// Already-materialised tree, shared with whoever built it. Used for
    /// virtual/nested aggregations.
    InMemory(Arc<DatasetTree>),
}

/// A ref-counted record identifying one dataset participating in an
/// aggregation. Outlives any single request — it is held by the
/// `aggregation` node and by every virtual array/grid built over it.
pub struct MemberHandle {
    location: String,
    /// Raw `coordValue` from the `<netcdf>` element, if present. Consumed by
    /// the coordinate synthesiser.
    pub coord_value: Option<String>,
    source: MemberSource,
    dim_cache: Mutex<HashMap<String, u64>>,
}

impl MemberHandle {
    pub fn from_location(
        location: impl Into<String>,
        coord_value: Option<String>,
        loader: Arc<DatasetLoader>,
    ) -> MemberHandle {
        MemberHandle {
            location: location.into(),
            coord_value,
            source: MemberSource::Location {
                loader,
                tree: tokio::sync::Mutex::new(None),
            },
            dim_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_tree(
        location: impl Into<String>,
        coord_value: Option<String>,
        tree: Arc<DatasetTree>,
    ) -> MemberHandle {
        MemberHandle {
            location: location.into(),
            coord_value,
            source: MemberSource::InMemory(tree),
            dim_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_location(&self) -> &str {
        &self.location
    }

    /// Returns the loaded typed tree, triggering a load through the dataset
    /// loader if this is the first data-bearing access.
    pub async fn get_data_tree(&self) -> AggResult<Arc<DatasetTree>> {
        match &self.source {
            MemberSource::InMemory(tree) => Ok(tree.clone()),
            MemberSource::Location { loader, tree } => {
                let mut guard = tree.lock().await;
                if let Some(t) = &*guard {
                    return Ok(t.clone());
                }
                debug!("loading member dataset: {}", self.location);
                let loaded = loader.load(&self.location, LoadKind::Data).await?;
                let arc = Arc::new(loaded);
                *guard = Some(arc.clone());

                // Invariant: after a successful first load, the dimension
                // cache reflects every dimension in the tree.
                let mut cache = self.dim_cache.lock().unwrap();
                for (name, size) in arc.all_dimension_sizes() {
                    cache.entry(name).or_insert(size);
                }

                Ok(arc)
            }
        }
    }

    /// Bound memory by dropping a lazily-loaded tree. No-op for in-memory
    /// members, which don't own their tree.
    pub async fn clear_data_tree(&self) {
        if let MemberSource::Location { tree, .. } = &self.source {
            *tree.lock().await = None;
        }
    }

    pub fn is_dimension_cached(&self, name: &str) -> bool {
        self.dim_cache.lock().unwrap().contains_key(name)
    }

    pub fn get_cached_dimension_size(&self, name: &str) -> AggResult<u64> {
        self.dim_cache
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| AggError::dimension_not_found(name, &self.location))
    }

    pub fn set_dimension_cache_for(&self, dim: &Dimension, unique_only: bool) {
        let mut cache = self.dim_cache.lock().unwrap();
        if unique_only && cache.contains_key(&dim.name) {
            return;
        }
        cache.insert(dim.name.clone(), dim.size);
    }

    /// Walk every variable in the already-loaded tree and insert
    /// `name -> size` for each of its dimensions.
    pub async fn fill_dimension_cache_by_using_data_tree(&self) -> AggResult<()> {
        let tree = self.get_data_tree().await?;
        let mut cache = self.dim_cache.lock().unwrap();
        for (name, size) in tree.all_dimension_sizes() {
            cache.insert(name, size);
        }
        Ok(())
    }

    /// Resolve this member's `mtime`, for cache-freshness comparisons. Only
    /// `Location`-backed members have one; in-memory members don't live on
    /// disk at all.
    fn source_mtime(&self) -> Option<std::time::SystemTime> {
        std::fs::metadata(&self.location).and_then(|m| m.modified()).ok()
    }

    /// Make sure `name` is present in the dimension cache, consulting the
    /// on-disk store first when one is configured and this member resolves
    /// to a real file, rather than always reading the member's full data
    /// tree.
    pub async fn ensure_dimension_cached(&self, name: &str, store: Option<&Arc<CacheStore>>) -> AggResult<()> {
        if self.is_dimension_cached(name) {
            return Ok(());
        }
        if let Some(store) = store {
            if let Some(mtime) = self.source_mtime() {
                return store.load_or_compute(self, mtime).await;
            }
        }
        self.fill_dimension_cache_by_using_data_tree().await
    }

    /// Text format: one `name<SPACE>size` pair per line.
    pub fn save_dimension_cache<W: std::io::Write>(&self, mut w: W) -> std::io::Result<()> {
        let cache = self.dim_cache.lock().unwrap();
        let mut entries: Vec<_> = cache.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, size) in entries {
            writeln!(w, "{} {}", name, size)?;
        }
        Ok(())
    }

    pub fn load_dimension_cache<R: std::io::BufRead>(&self, r: R) -> AggResult<()> {
        let mut cache = self.dim_cache.lock().unwrap();
        for line in r.lines() {
            let line = line.map_err(|e| AggError::cache(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let name = parts
                .next()
                .ok_or_else(|| AggError::cache(format!("malformed cache line: {}", line)))?;
            let size: u64 = parts
                .next()
                .ok_or_else(|| AggError::cache(format!("malformed cache line: {}", line)))?
                .trim()
                .parse()
                .map_err(|_| AggError::cache(format!("malformed cache line: {}", line)))?;
            cache.insert(name.to_string(), size);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatasetTree;

    fn handle_with_tree() -> MemberHandle {
        MemberHandle::from_tree("m0.nc", Some("0".to_string()), Arc::new(DatasetTree::default()))
    }

    #[test]
    fn dimension_cache_round_trips_through_text() {
        let h = handle_with_tree();
        h.set_dimension_cache_for(&Dimension::new("time", 31), false);
        h.set_dimension_cache_for(&Dimension::new("lat", 10), false);

        let mut buf = Vec::new();
        h.save_dimension_cache(&mut buf).unwrap();

        let h2 = handle_with_tree();
        h2.load_dimension_cache(std::io::Cursor::new(buf)).unwrap();

        assert_eq!(h2.get_cached_dimension_size("time").unwrap(), 31);
        assert_eq!(h2.get_cached_dimension_size("lat").unwrap(), 10);
    }

    #[test]
    fn missing_dimension_is_an_error() {
        let h = handle_with_tree();
        assert!(matches!(
            h.get_cached_dimension_size("nope"),
            Err(AggError::DimensionNotFound { .. })
        ));
    }

    #[test]
    fn unique_only_does_not_overwrite() {
        let h = handle_with_tree();
        h.set_dimension_cache_for(&Dimension::new("time", 31), false);
        h.set_dimension_cache_for(&Dimension::new("time", 99), true);
        assert_eq!(h.get_cached_dimension_size("time").unwrap(), 31);
    }
}
