//! Virtual aggregated array: a read over a constrained outer hyperslab is
//! planned per-member by computing each member's own offset along the
//! outer dimension before dispatching inner reads.

use std::sync::Arc;

use dap2::constraint::Hyperslab;

use crate::dimcache::CacheStore;
use crate::member::MemberHandle;
use crate::model::VarData;
use crate::{AggError, AggResult};

/// A read request against the aggregated outer dimension, plus whatever
/// constraint applies to the remaining (inner) dimensions — those pass
/// through to each member unchanged.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub outer: Hyperslab,
    pub inner: Vec<Hyperslab>,
}

/// One variable built by concatenating (joinExisting) or selecting
/// (joinNew) the same-named variable across every member.
pub struct VirtualArray {
    pub variable_name: String,
    pub members: Vec<Arc<MemberHandle>>,
    pub mode: Mode,
    pub cache_store: Option<Arc<CacheStore>>,
}

impl std::fmt::Debug for VirtualArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualArray")
            .field("variable_name", &self.variable_name)
            .field("members", &self.members.len())
            .field("mode", &self.mode)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Each member contributes exactly one outer-dimension slot.
    JoinNew,
    /// Each member contributes `N` outer-dimension slots, `N` possibly
    /// differing across members; offsets come from the dimension cache.
    JoinExisting { dim_name: String },
}

/// Flatten a per-dimension hyperslab selection (row-major) into a list of
/// offsets into the block those dimensions describe.
fn inner_offsets(dim_sizes: &[u64], slabs: &[Hyperslab]) -> Vec<usize> {
    if dim_sizes.is_empty() {
        return vec![0];
    }
    let mut strides = vec![1usize; dim_sizes.len()];
    for i in (0..dim_sizes.len() - 1).rev() {
        strides[i] = strides[i + 1] * dim_sizes[i + 1] as usize;
    }
    let selected: Vec<Vec<usize>> = dim_sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            slabs
                .get(i)
                .copied()
                .unwrap_or_else(|| Hyperslab::whole(size as usize))
                .indices()
                .collect()
        })
        .collect();

    let mut out = vec![0usize];
    for (dim_idx, idxs) in selected.iter().enumerate() {
        let mut next = Vec::with_capacity(out.len() * idxs.len().max(1));
        for &base in &out {
            for &i in idxs {
                next.push(base + i * strides[dim_idx]);
            }
        }
        out = next;
    }
    out
}

impl VirtualArray {
    pub fn new(
        variable_name: impl Into<String>,
        members: Vec<Arc<MemberHandle>>,
        mode: Mode,
        cache_store: Option<Arc<CacheStore>>,
    ) -> VirtualArray {
        VirtualArray {
            variable_name: variable_name.into(),
            members,
            mode,
            cache_store,
        }
    }

    /// Resolve the ordered list of (member, local-outer-indices) pairs a
    /// request touches, without reading any data yet.
    async fn plan_members(&self, req: &ReadRequest) -> AggResult<Vec<(Arc<MemberHandle>, Vec<usize>)>> {
        let wanted: Vec<usize> = req.outer.indices().collect();
        let mut out = Vec::new();

        match &self.mode {
            Mode::JoinNew => {
                for &idx in &wanted {
                    let member = self
                        .members
                        .get(idx)
                        .ok_or_else(|| AggError::aggregation(format!("outer index {} out of range", idx)))?
                        .clone();
                    out.push((member, vec![0]));
                }
            }
            Mode::JoinExisting { dim_name } => {
                let mut head = 0usize;
                for member in &self.members {
                    member.ensure_dimension_cached(dim_name, self.cache_store.as_ref()).await?;
                    let size = member.get_cached_dimension_size(dim_name)? as usize;
                    let local: Vec<usize> = wanted
                        .iter()
                        .copied()
                        .filter(|&g| g >= head && g < head + size)
                        .map(|g| g - head)
                        .collect();
                    if !local.is_empty() {
                        out.push((member.clone(), local));
                    }
                    head += size;
                }
            }
        }

        Ok(out)
    }

    /// Stream the requested slice, reading only the members the request
    /// actually overlaps and concatenating their contributions in outer
    /// order.
    pub async fn read(&self, req: &ReadRequest) -> AggResult<VarData> {
        let plan = self.plan_members(req).await?;
        if plan.is_empty() {
            return Err(AggError::aggregation("read request selects no members"));
        }

        let mut out: Option<VarData> = None;
        for (member, local_indices) in plan {
            let tree = member.get_data_tree().await?;
            let var = tree.variable(&self.variable_name).ok_or_else(|| {
                AggError::not_found(format!(
                    "{}: variable {} missing from member",
                    member.get_location(),
                    self.variable_name
                ))
            })?;
            let data = var
                .data
                .as_ref()
                .ok_or_else(|| AggError::internal(format!("{} has no data loaded", self.variable_name)))?;

            let contribution = match &self.mode {
                // joinNew: this member contributes its whole variable as a
                // single outer slot, sliced only by the inner constraint.
                Mode::JoinNew => {
                    let dim_sizes: Vec<u64> = var.shape.dims().iter().map(|d| d.size).collect();
                    let offsets = inner_offsets(&dim_sizes, &req.inner);
                    data.stride_select(&offsets)
                }
                // joinExisting: the member's own first dimension is the
                // shared outer dimension; the rest are inner.
                Mode::JoinExisting { .. } => {
                    let dims = var.shape.dims();
                    let inner_sizes: Vec<u64> = if dims.len() > 1 { dims[1..].iter().map(|d| d.size).collect() } else { Vec::new() };
                    let inner_block = inner_sizes.iter().product::<u64>().max(1) as usize;
                    let inner_idx = inner_offsets(&inner_sizes, &req.inner);
                    let indices: Vec<usize> = local_indices
                        .iter()
                        .flat_map(|&i| {
                            let base = i * inner_block;
                            inner_idx.iter().map(move |&o| base + o)
                        })
                        .collect();
                    data.stride_select(&indices)
                }
            };

            match &mut out {
                None => out = Some(contribution),
                Some(existing) => existing.extend(contribution)?,
            }
        }

        out.ok_or_else(|| AggError::internal("virtual array produced no data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dimension, Kind, Variable, VariableShape};
    use crate::model::DatasetTree;

    fn member_with_var(location: &str, values: Vec<f32>) -> Arc<MemberHandle> {
        let mut tree = DatasetTree::default();
        let dim = Dimension::new("time", values.len() as u64);
        tree.add_dimension(dim.clone()).unwrap();
        tree.variables.push(Variable {
            name: "temp".to_string(),
            kind: Kind::Float32,
            shape: VariableShape::Array { dims: vec![dim] },
            attributes: Default::default(),
            data: Some(VarData::Float32(values)),
        });
        Arc::new(MemberHandle::from_tree(location, None, Arc::new(tree)))
    }

    fn scalar_member(location: &str, value: f32) -> Arc<MemberHandle> {
        let mut tree = DatasetTree::default();
        tree.variables.push(Variable {
            name: "temp".to_string(),
            kind: Kind::Float32,
            shape: VariableShape::Scalar,
            attributes: Default::default(),
            data: Some(VarData::Float32(vec![value])),
        });
        Arc::new(MemberHandle::from_tree(location, None, Arc::new(tree)))
    }

    #[tokio::test]
    async fn join_existing_concatenates_across_members_with_offsets() {
        let m0 = member_with_var("m0.nc", vec![1.0, 2.0, 3.0]);
        let m1 = member_with_var("m1.nc", vec![4.0, 5.0]);
        let arr = VirtualArray::new("temp", vec![m0, m1], Mode::JoinExisting { dim_name: "time".to_string() }, None);

        let req = ReadRequest {
            outer: Hyperslab::whole(5),
            inner: vec![],
        };
        let data = arr.read(&req).await.unwrap();
        assert!(matches!(data, VarData::Float32(v) if v == vec![1.0, 2.0, 3.0, 4.0, 5.0]));
    }

    #[tokio::test]
    async fn join_existing_respects_a_constrained_outer_slab() {
        let m0 = member_with_var("m0.nc", vec![1.0, 2.0, 3.0]);
        let m1 = member_with_var("m1.nc", vec![4.0, 5.0]);
        let arr = VirtualArray::new("temp", vec![m0, m1], Mode::JoinExisting { dim_name: "time".to_string() }, None);

        let req = ReadRequest {
            outer: Hyperslab {
                start: 2,
                stride: 1,
                stop: 3,
            },
            inner: vec![],
        };
        let data = arr.read(&req).await.unwrap();
        assert!(matches!(data, VarData::Float32(v) if v == vec![3.0, 4.0]));
    }

    #[tokio::test]
    async fn join_new_selects_one_slot_per_member() {
        let m0 = scalar_member("m0.nc", 10.0);
        let m1 = scalar_member("m1.nc", 20.0);
        let m2 = scalar_member("m2.nc", 30.0);
        let arr = VirtualArray::new("temp", vec![m0, m1, m2], Mode::JoinNew, None);

        let req = ReadRequest {
            outer: Hyperslab::whole(3),
            inner: vec![],
        };
        let data = arr.read(&req).await.unwrap();
        assert!(matches!(data, VarData::Float32(v) if v == vec![10.0, 20.0, 30.0]));
    }

    #[tokio::test]
    async fn join_new_respects_a_constrained_outer_slab() {
        let m0 = scalar_member("m0.nc", 10.0);
        let m1 = scalar_member("m1.nc", 20.0);
        let m2 = scalar_member("m2.nc", 30.0);
        let arr = VirtualArray::new("temp", vec![m0, m1, m2], Mode::JoinNew, None);

        let req = ReadRequest {
            outer: Hyperslab { start: 1, stride: 1, stop: 2 },
            inner: vec![],
        };
        let data = arr.read(&req).await.unwrap();
        assert!(matches!(data, VarData::Float32(v) if v == vec![20.0, 30.0]));
    }
}
