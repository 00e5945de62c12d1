//! HTTP server binary wiring the aggregation core to a DAP2 surface over
//! `warp`.

#[macro_use]
extern crate log;

use std::convert::Infallible;
use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use warp::Filter;

use dap2::constraint::{Constraint, Hyperslab};
use ncagg::config::Config;
use ncagg::data::{request_log, CatalogView, Datasets};
use ncagg::dimcache::CacheStore;
use ncagg::loader::{DatasetLoader, LoadKind, RequestPipeline};
use ncagg::model::{DatasetTree, Dimension, VarData, Variable, VariableShape};
use ncagg::netcdf_source;
use ncagg::planner;
use ncagg::tree;
use ncagg::varray::ReadRequest;
use ncagg::{AggError, AggResult};

/// The end-to-end pipeline `DatasetLoader` hands a bound path+kind to: a
/// plain `.nc` file is opened directly through the `netcdf` crate; an NcML
/// document is parsed, and if it declares an `<aggregation>`, planned
/// (resolving its members relative to the document's own directory).
struct NcmlPipeline {
    cache_store: Arc<CacheStore>,
}

#[async_trait]
impl RequestPipeline for NcmlPipeline {
    async fn execute(&self, path: &str, kind: LoadKind) -> AggResult<DatasetTree> {
        let file_path = std::path::Path::new(path);
        if netcdf_source::is_netcdf_path(file_path) {
            return match kind {
                LoadKind::Metadata => netcdf_source::open_metadata(file_path),
                LoadKind::Data => netcdf_source::open_with_data(file_path),
            };
        }

        let doc = tree::parse_document(file_path)?;

        let agg = match doc.aggregation {
            Some(agg) => agg,
            None => return Ok(doc.tree),
        };

        let base_dir = std::path::Path::new(path).parent().map(|p| p.to_path_buf());
        let loader = Arc::new(DatasetLoader::new(Arc::new(NcmlPipeline {
            cache_store: self.cache_store.clone(),
        })));

        let mut members = Vec::new();
        for member in &agg.members {
            let location = member
                .location
                .as_ref()
                .ok_or_else(|| AggError::syntax("joinNew member without a location is not yet supported"))?;
            let resolved = ncagg::location::Location::parse(location, base_dir.as_deref());
            members.push(Arc::new(ncagg::member::MemberHandle::from_location(
                resolved.display(),
                member.coord_value.clone(),
                loader.clone(),
            )));
        }
        for scan in &agg.scans {
            for found in ncagg::scan::resolve(scan)? {
                members.push(Arc::new(ncagg::member::MemberHandle::from_location(
                    found.path.to_string_lossy().into_owned(),
                    found.coord_value,
                    loader.clone(),
                )));
            }
        }

        let spec = planner::AggregationSpec {
            agg_type: agg.agg_type,
            dim_name: agg.dim_name,
            date_format_mark: agg.date_format_mark,
            strict_union_dimensions: false,
        };
        let plan = planner::plan(&spec, &members, Some(&self.cache_store)).await?;
        Ok(plan.tree)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::from_env(env_logger::Env::default().default_filter_or("ncagg=info")).init();

    let config_path = env::args().nth(1).unwrap_or_else(|| "ncagg.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::from_file(&config_path)?.with_env_overrides()
    } else {
        warn!("no config file at {}, using defaults + environment", config_path);
        Config::default().with_env_overrides()
    };

    let cache_store = Arc::new(CacheStore::new(
        config.cache_directory.clone(),
        config.cache_prefix.clone(),
        config.cache_size_bytes(),
    ));
    let loader = Arc::new(DatasetLoader::new(Arc::new(NcmlPipeline { cache_store })));
    let datasets = Arc::new(Datasets::new(loader));

    let with_datasets = warp::any().map({
        let datasets = datasets.clone();
        move || datasets.clone()
    });

    let das_route = warp::path!(String / "das")
        .and(with_datasets.clone())
        .and_then(|path: String, datasets: Arc<Datasets>| async move { das_handler(path, datasets).await });

    let raw_query = warp::filters::query::raw().or(warp::any().map(String::new)).unify();

    let dds_route = warp::path!(String / "dds")
        .and(raw_query.clone())
        .and(with_datasets.clone())
        .and_then(|path: String, query: String, datasets: Arc<Datasets>| async move {
            dds_handler(path, query, datasets).await
        });

    let dods_route = warp::path!(String / "dods")
        .and(raw_query)
        .and(with_datasets.clone())
        .and_then(|path: String, query: String, datasets: Arc<Datasets>| async move {
            dods_handler(path, query, datasets).await
        });

    let catalog_route = warp::path("catalog").and_then({
        let datasets = datasets.clone();
        move || {
            let datasets = datasets.clone();
            async move {
                let view = CatalogView(datasets.paths().await);
                Ok::<_, Infallible>(warp::reply::json(&view.0))
            }
        }
    });

    let routes = das_route
        .or(dds_route)
        .or(dods_route)
        .or(catalog_route)
        .with(warp::log::custom(request_log));

    let bind: std::net::SocketAddr = config.bind.parse()?;
    info!("ncaggd listening on {}", bind);
    warp::serve(routes).run(bind).await;
    Ok(())
}

async fn das_handler(path: String, datasets: Arc<Datasets>) -> Result<impl warp::Reply, Infallible> {
    match datasets.loader.load(&path, LoadKind::Metadata).await {
        Ok(tree) => Ok(warp::reply::with_status(dap2::Das::from(tree).0, warp::http::StatusCode::OK)),
        Err(e) => Ok(warp::reply::with_status(e.to_string(), warp::http::StatusCode::NOT_FOUND)),
    }
}

async fn dds_handler(path: String, query: String, datasets: Arc<Datasets>) -> Result<impl warp::Reply, Infallible> {
    match datasets.loader.load(&path, LoadKind::Metadata).await {
        Ok(tree) => {
            let dds = dap2::Dds::build(&tree);
            match Constraint::parse(&query).and_then(|c| dds.dds_constrained(&c)) {
                Ok(text) => Ok(warp::reply::with_status(text, warp::http::StatusCode::OK)),
                Err(e) => Ok(warp::reply::with_status(e.to_string(), warp::http::StatusCode::BAD_REQUEST)),
            }
        }
        Err(e) => Ok(warp::reply::with_status(e.to_string(), warp::http::StatusCode::NOT_FOUND)),
    }
}

/// The per-dimension hyperslab a variable should be read under: the
/// request's own slab entries where present, `Hyperslab::whole` for every
/// dimension the constraint left unconstrained.
fn dims_slab(var: &Variable, projection_slab: &[Hyperslab]) -> Vec<Hyperslab> {
    let dims: &[Dimension] = var.shape.dims();
    if dims.is_empty() {
        return vec![Hyperslab::whole(1)];
    }
    dims.iter()
        .enumerate()
        .map(|(i, d)| projection_slab.get(i).copied().unwrap_or_else(|| Hyperslab::whole(d.size as usize)))
        .collect()
}

fn read_request_for(var: &Variable, projection_slab: &[Hyperslab]) -> ReadRequest {
    let slabs = dims_slab(var, projection_slab);
    let outer = slabs[0];
    let inner = slabs[1..].to_vec();
    ReadRequest { outer, inner }
}

/// Resolve one variable's values for this request: through its virtual
/// grid/array if the aggregation plan installed one, falling back to the
/// tree's own already-materialised data (union-merged or plain-NetCDF
/// variables never get a virtual reader).
async fn resolve_data(tree: &DatasetTree, name: &str, projection_slab: &[Hyperslab]) -> AggResult<VarData> {
    let var = tree.variable(name).ok_or_else(|| AggError::not_found(format!("variable not found: {}", name)))?;
    let req = read_request_for(var, projection_slab);

    if let Some(grid) = tree.virtual_grids.get(name) {
        return grid.read_data(&req).await;
    }
    if let Some(array) = tree.virtual_arrays.get(name) {
        return array.read(&req).await;
    }
    var.data
        .clone()
        .ok_or_else(|| AggError::unimplemented(format!("{} has no data loaded for this request", name)))
}

fn encode_data(data: &VarData) -> AggResult<Vec<u8>> {
    match data {
        VarData::Bytes(v) => dap2::dods::encode_array(v.clone()).map_err(|e| AggError::internal(e.to_string())),
        VarData::Int16(v) => dap2::dods::encode_array(v.clone()).map_err(|e| AggError::internal(e.to_string())),
        VarData::Int32(v) => dap2::dods::encode_array(v.clone()).map_err(|e| AggError::internal(e.to_string())),
        VarData::Float32(v) => dap2::dods::encode_array(v.clone()).map_err(|e| AggError::internal(e.to_string())),
        VarData::Float64(v) => dap2::dods::encode_array(v.clone()).map_err(|e| AggError::internal(e.to_string())),
        VarData::Strings(v) => {
            let mut out = dap2::dods::xdr_length(v.len() as u32).to_vec();
            for s in v {
                out.extend(dap2::dods::encode_string(s));
            }
            Ok(out)
        }
    }
}

/// XDR-encode one variable's values, appending its maps' values too if it's
/// a Grid — mirroring the Dataset/Data layout DAP2's DODS response lays its
/// variables out in. A Grid's maps share the array's own per-dimension
/// slab, one entry per map in dimension order, just as the DDS renderer
/// does.
async fn encode_variable(tree: &DatasetTree, name: &str, projection_slab: &[Hyperslab]) -> AggResult<Vec<u8>> {
    let var = tree.variable(name).ok_or_else(|| AggError::not_found(format!("variable not found: {}", name)))?;
    let array_slab = dims_slab(var, projection_slab);
    let mut out = encode_data(&resolve_data(tree, name, projection_slab).await?)?;

    if let VariableShape::Grid { maps, .. } = &var.shape {
        for (i, map_name) in maps.iter().enumerate() {
            let map_slab = array_slab.get(i).copied().into_iter().collect::<Vec<_>>();
            out.extend(encode_data(&resolve_data(tree, map_name, &map_slab).await?)?);
        }
    }
    Ok(out)
}

async fn dods_handler(path: String, query: String, datasets: Arc<Datasets>) -> Result<impl warp::Reply, Infallible> {
    let tree = match datasets.loader.load(&path, LoadKind::Data).await {
        Ok(tree) => tree,
        Err(e) => return Ok(warp::reply::with_status(e.to_string().into_bytes(), warp::http::StatusCode::NOT_FOUND)),
    };

    let constraint = match Constraint::parse(&query) {
        Ok(c) => c,
        Err(e) => return Ok(warp::reply::with_status(e.to_string().into_bytes(), warp::http::StatusCode::BAD_REQUEST)),
    };

    let dds = dap2::Dds::build(&tree);
    let dds_text = match dds.dds_constrained(&constraint) {
        Ok(text) => text,
        Err(e) => return Ok(warp::reply::with_status(e.to_string().into_bytes(), warp::http::StatusCode::BAD_REQUEST)),
    };

    let empty_slab: Vec<Hyperslab> = Vec::new();
    let names: Vec<(String, &[Hyperslab])> = if constraint.is_empty() {
        tree.variables.iter().map(|v| (v.name.clone(), empty_slab.as_slice())).collect()
    } else {
        constraint.projection.iter().map(|p| (p.name.clone(), p.slab.as_slice())).collect()
    };

    let mut body = dds_text.into_bytes();
    body.extend_from_slice(b"\nData:\r\n");
    for (name, slab) in &names {
        match encode_variable(&tree, name, slab).await {
            Ok(bytes) => body.extend(bytes),
            Err(e) => return Ok(warp::reply::with_status(e.to_string().into_bytes(), warp::http::StatusCode::NOT_IMPLEMENTED)),
        }
    }

    Ok(warp::reply::with_status(body, warp::http::StatusCode::OK))
}
