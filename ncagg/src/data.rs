//! Ambient dataset registry and request logging: tracks the set of paths
//! currently served and wraps `warp`'s access log with an optional-field
//! formatter for values a request may not have (e.g. no query string).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use catalog::Catalog;
use tokio::sync::RwLock;

use crate::loader::DatasetLoader;
use crate::planner::AggregationSpec;
use crate::tree::MemberSpec;

/// One registered aggregation: its NcML-derived plan plus the loader used
/// to resolve its members. Re-planned on demand rather than cached eagerly,
/// matching the member dimension cache's own lazy-fill behaviour.
pub struct AggregationEntry {
    pub path: String,
    pub spec: AggregationSpec,
    pub member_specs: Vec<MemberSpec>,
}

/// Everything the HTTP surface needs: the registered aggregations plus the
/// shared loader they resolve members through.
pub struct Datasets {
    entries: RwLock<HashMap<String, Arc<AggregationEntry>>>,
    pub loader: Arc<DatasetLoader>,
}

impl Datasets {
    pub fn new(loader: Arc<DatasetLoader>) -> Datasets {
        Datasets {
            entries: RwLock::new(HashMap::new()),
            loader,
        }
    }

    pub async fn insert(&self, entry: AggregationEntry) {
        self.entries.write().await.insert(entry.path.clone(), Arc::new(entry));
    }

    pub async fn get(&self, path: &str) -> Option<Arc<AggregationEntry>> {
        self.entries.read().await.get(path).cloned()
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut p: Vec<String> = self.entries.read().await.keys().cloned().collect();
        p.sort();
        p
    }
}

/// Adapter so the `catalog` crate's `warp` filters can list what's
/// registered without depending on `ncagg` internals beyond this trait.
pub struct CatalogView(pub Vec<String>);

impl Catalog for CatalogView {
    fn paths(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.0.iter().cloned())
    }
}

/// `Option<T>: Display` wrapper so a warp log line can print an absent
/// constraint query as `-` instead of needing a branch at every call site.
pub struct OptFmt<T>(pub Option<T>);

impl<T: fmt::Display> fmt::Display for OptFmt<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(t) => t.fmt(f),
            None => f.write_str("-"),
        }
    }
}

pub fn request_log(info: warp::log::Info) {
    info!(
        "{} {} {} {} {:?}",
        info.remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string()),
        info.method(),
        info.path(),
        info.status(),
        info.elapsed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_fmt_renders_dash_for_none() {
        let v: OptFmt<u32> = OptFmt(None);
        assert_eq!(format!("{}", v), "-");
        let v: OptFmt<u32> = OptFmt(Some(7));
        assert_eq!(format!("{}", v), "7");
    }
}
