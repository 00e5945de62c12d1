//! Aggregation planner: a single dispatch point covering `union`, `joinNew`,
//! and `joinExisting`, plus the two forecast-collection variants left
//! unimplemented.

use std::sync::Arc;

use crate::coord::synthesize_coordinates;
use crate::dimcache::CacheStore;
use crate::member::MemberHandle;
use crate::model::{AttrValue, Attribute, DatasetTree, Dimension, Kind, VariableShape};
use crate::varray::{Mode, VirtualArray};
use crate::vgrid::VirtualGrid;
use crate::{AggError, AggResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationType {
    Union,
    JoinNew,
    JoinExisting,
    ForecastModelRunCollection,
    ForecastModelSingleRunCollection,
}

#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub agg_type: AggregationType,
    /// The outer dimension name for `joinNew`/`joinExisting`.
    pub dim_name: Option<String>,
    /// `dateFormatMark`, used by `joinNew` coordinate synthesis when no
    /// member carries an explicit `coordValue`.
    pub date_format_mark: Option<String>,
    /// Union's default is to warn on a dimension-size mismatch across
    /// members and keep the first writer's value; set to promote that to a
    /// hard error (see DESIGN.md).
    pub strict_union_dimensions: bool,
}

/// The merged/prototype tree an aggregation presents to its clients, plus
/// enough bookkeeping for the virtual array/grid types to route a read to
/// the right member.
pub struct Plan {
    pub agg_type: AggregationType,
    pub tree: DatasetTree,
    pub outer_dim: Option<String>,
}

pub async fn plan(
    spec: &AggregationSpec,
    members: &[Arc<MemberHandle>],
    cache_store: Option<&Arc<CacheStore>>,
) -> AggResult<Plan> {
    if members.is_empty() {
        return Err(AggError::aggregation("aggregation has no members"));
    }

    match spec.agg_type {
        AggregationType::Union => plan_union(spec, members).await,
        AggregationType::JoinNew => plan_join_new(spec, members, cache_store).await,
        AggregationType::JoinExisting => plan_join_existing(spec, members, cache_store).await,
        AggregationType::ForecastModelRunCollection
        | AggregationType::ForecastModelSingleRunCollection => Err(AggError::unimplemented(
            "forecastModelRunCollection aggregation types are not supported",
        )),
    }
}

/// First-writer-wins merge of attributes/dimensions/variables across every
/// member.
async fn plan_union(spec: &AggregationSpec, members: &[Arc<MemberHandle>]) -> AggResult<Plan> {
    let mut merged = DatasetTree::default();

    for member in members {
        let tree = member.get_data_tree().await?;

        merged.global_attributes.union_from(&tree.global_attributes);

        for dim in &tree.dimensions {
            match merged.dimension(&dim.name) {
                None => merged.add_dimension(dim.clone())?,
                Some(existing) if existing.size != dim.size => {
                    let message = format!(
                        "union: dimension {} has size {} in {} but {} already fixed it at {}",
                        dim.name,
                        dim.size,
                        member.get_location(),
                        dim.name,
                        existing.size
                    );
                    if spec.strict_union_dimensions {
                        return Err(AggError::aggregation(message));
                    }
                    warn!("{}", message);
                }
                Some(_) => {}
            }
        }

        for var in &tree.variables {
            if merged.variable(&var.name).is_none() {
                merged.variables.push(var.clone());
            }
        }
    }

    Ok(Plan {
        agg_type: AggregationType::Union,
        tree: merged,
        outer_dim: None,
    })
}

/// Introduce a brand-new outer dimension sized to the member count, and
/// prepend it to every array/grid variable's shape. A reshaped variable's
/// values are no longer a single clone of the prototype's own data: each
/// member contributes exactly one outer slot, read lazily through a
/// [`VirtualArray`]/[`VirtualGrid`] rather than materialised up front.
async fn plan_join_new(
    spec: &AggregationSpec,
    members: &[Arc<MemberHandle>],
    cache_store: Option<&Arc<CacheStore>>,
) -> AggResult<Plan> {
    let dim_name = spec
        .dim_name
        .as_ref()
        .ok_or_else(|| AggError::syntax("joinNew aggregation requires a dimension name"))?;

    let prototype = members[0].get_data_tree().await?;
    let outer = Dimension::new(dim_name.clone(), members.len() as u64);

    let mut tree = (*prototype).clone();
    tree.add_dimension(outer.clone())?;

    let cache_store = cache_store.cloned();
    for var in &mut tree.variables {
        let reshaped = match &mut var.shape {
            VariableShape::Array { dims } => {
                dims.insert(0, outer.clone());
                true
            }
            VariableShape::Grid { dims, maps } => {
                dims.insert(0, outer.clone());
                maps.insert(0, dim_name.clone());
                true
            }
            _ => false,
        };
        if !reshaped {
            continue;
        }

        var.data = None;
        let array = VirtualArray::new(var.name.clone(), members.to_vec(), Mode::JoinNew, cache_store.clone());
        if var.is_grid() {
            let grid = VirtualGrid::new(array, dim_name.clone(), members[0].clone());
            tree.virtual_grids.insert(var.name.clone(), Arc::new(grid));
        } else {
            tree.virtual_arrays.insert(var.name.clone(), Arc::new(array));
        }
    }

    let member_refs: Vec<&MemberHandle> = members.iter().map(|m| m.as_ref()).collect();
    let coord_data = synthesize_coordinates(&member_refs, spec.date_format_mark.as_deref())?;
    let coord_kind = match &coord_data {
        crate::model::VarData::Float64(_) => Kind::Float64,
        _ => Kind::String,
    };

    tree.variables.push(crate::model::Variable {
        name: dim_name.clone(),
        kind: coord_kind,
        shape: VariableShape::Array { dims: vec![outer.clone()] },
        attributes: {
            let mut t = crate::model::AttributeTable::default();
            t.add(Attribute {
                name: "_CoordinateAxisType".to_string(),
                value: AttrValue::Atomic {
                    kind: Kind::String,
                    values: vec!["Time".to_string()],
                },
            })
            .ok();
            t
        },
        data: Some(coord_data),
    });

    Ok(Plan {
        agg_type: AggregationType::JoinNew,
        tree,
        outer_dim: Some(dim_name.clone()),
    })
}

/// Extend an existing shared dimension across members, summing its size
/// from the member dimension cache (via the on-disk cache store when one is
/// configured) rather than loading every member's full data tree. Every
/// variable carrying the shared dimension is backed by a
/// [`VirtualArray`]/[`VirtualGrid`] that concatenates each member's own
/// slice at read time.
async fn plan_join_existing(
    spec: &AggregationSpec,
    members: &[Arc<MemberHandle>],
    cache_store: Option<&Arc<CacheStore>>,
) -> AggResult<Plan> {
    let dim_name = spec
        .dim_name
        .as_ref()
        .ok_or_else(|| AggError::syntax("joinExisting aggregation requires a dimension name"))?;

    let prototype = members[0].get_data_tree().await?;
    if prototype.dimension(dim_name).is_none() {
        return Err(AggError::aggregation(format!(
            "joinExisting: dimension {} not found in first member",
            dim_name
        )));
    }

    let mut total: u64 = 0;
    for member in members {
        member.ensure_dimension_cached(dim_name, cache_store).await?;
        total += member.get_cached_dimension_size(dim_name)?;
    }

    let mut tree = (*prototype).clone();
    let summed = Dimension::new(dim_name.clone(), total);
    for dim in &mut tree.dimensions {
        if dim.name == *dim_name {
            *dim = summed.clone();
        }
    }

    let cache_store = cache_store.cloned();
    for var in &mut tree.variables {
        let dims: &mut Vec<Dimension> = match &mut var.shape {
            VariableShape::Array { dims } => dims,
            VariableShape::Grid { dims, .. } => dims,
            _ => continue,
        };
        if !dims.iter().any(|d| d.name == *dim_name) {
            continue;
        }
        for d in dims.iter_mut() {
            if d.name == *dim_name {
                *d = summed.clone();
            }
        }

        var.data = None;
        let array = VirtualArray::new(
            var.name.clone(),
            members.to_vec(),
            Mode::JoinExisting { dim_name: dim_name.clone() },
            cache_store.clone(),
        );
        if var.is_grid() {
            let grid = VirtualGrid::new(array, dim_name.clone(), members[0].clone());
            tree.virtual_grids.insert(var.name.clone(), Arc::new(grid));
        } else {
            tree.virtual_arrays.insert(var.name.clone(), Arc::new(array));
        }
    }

    Ok(Plan {
        agg_type: AggregationType::JoinExisting,
        tree,
        outer_dim: Some(dim_name.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dimension, Variable};

    fn tree_with_dim(name: &str, size: u64) -> DatasetTree {
        let mut t = DatasetTree::default();
        t.add_dimension(Dimension::new(name, size)).unwrap();
        t.variables.push(Variable {
            name: "temp".to_string(),
            kind: Kind::Float32,
            shape: VariableShape::Array {
                dims: vec![Dimension::new(name, size)],
            },
            attributes: Default::default(),
            data: None,
        });
        t
    }

    #[tokio::test]
    async fn join_new_prepends_outer_dimension_and_synthesizes_coordinate() {
        let m0 = Arc::new(MemberHandle::from_tree("m0.nc", Some("0".into()), Arc::new(tree_with_dim("z", 4))));
        let m1 = Arc::new(MemberHandle::from_tree("m1.nc", Some("1".into()), Arc::new(tree_with_dim("z", 4))));

        let spec = AggregationSpec {
            agg_type: AggregationType::JoinNew,
            dim_name: Some("time".to_string()),
            date_format_mark: None,
            strict_union_dimensions: false,
        };
        let plan = plan(&spec, &[m0, m1], None).await.unwrap();

        let temp = plan.tree.variable("temp").unwrap();
        assert_eq!(temp.shape.dims()[0].name, "time");
        assert_eq!(temp.shape.dims()[0].size, 2);

        let time = plan.tree.variable("time").unwrap();
        assert!(matches!(&time.data, Some(crate::model::VarData::Float64(v)) if v == &vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn join_existing_sums_member_dimension_sizes() {
        let m0 = Arc::new(MemberHandle::from_tree("m0.nc", None, Arc::new(tree_with_dim("time", 3))));
        let m1 = Arc::new(MemberHandle::from_tree("m1.nc", None, Arc::new(tree_with_dim("time", 5))));

        let spec = AggregationSpec {
            agg_type: AggregationType::JoinExisting,
            dim_name: Some("time".to_string()),
            date_format_mark: None,
            strict_union_dimensions: false,
        };
        let plan = plan(&spec, &[m0, m1], None).await.unwrap();

        assert_eq!(plan.tree.dimension("time").unwrap().size, 8);
        assert_eq!(plan.tree.variable("temp").unwrap().shape.dims()[0].size, 8);
    }

    #[tokio::test]
    async fn forecast_model_collection_is_unimplemented() {
        let m0 = Arc::new(MemberHandle::from_tree("m0.nc", None, Arc::new(DatasetTree::default())));
        let spec = AggregationSpec {
            agg_type: AggregationType::ForecastModelRunCollection,
            dim_name: None,
            date_format_mark: None,
            strict_union_dimensions: false,
        };
        assert!(matches!(plan(&spec, &[m0], None).await, Err(AggError::Unimplemented { .. })));
    }
}
