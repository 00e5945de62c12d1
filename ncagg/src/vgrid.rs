//! Virtual aggregated grid: a Grid is its data array plus one coordinate
//! map per dimension. The inner maps come straight from the prototype
//! member; only the outer map is itself aggregated.

use std::sync::Arc;

use crate::member::MemberHandle;
use crate::model::VarData;
use crate::varray::{Mode, ReadRequest, VirtualArray};
use crate::{AggError, AggResult};

/// A Grid variable's aggregated form: the underlying data array plus the
/// outer map, which is either the synthesised `joinNew` coordinate or the
/// concatenation of each member's own outer map.
pub struct VirtualGrid {
    pub data: VirtualArray,
    outer_map_name: String,
    prototype: Arc<MemberHandle>,
}

impl VirtualGrid {
    pub fn new(data: VirtualArray, outer_map_name: impl Into<String>, prototype: Arc<MemberHandle>) -> VirtualGrid {
        VirtualGrid {
            data,
            outer_map_name: outer_map_name.into(),
            prototype,
        }
    }

    pub async fn read_data(&self, req: &ReadRequest) -> AggResult<VarData> {
        self.data.read(req).await
    }

    /// A non-outer ("inner") map is identical across every member by
    /// construction, so it's read straight from the prototype with no
    /// aggregation at all.
    pub async fn read_inner_map(&self, map_name: &str, slab: dap2::constraint::Hyperslab) -> AggResult<VarData> {
        let tree = self.prototype.get_data_tree().await?;
        let var = tree.variable(map_name).ok_or_else(|| {
            AggError::not_found(format!("map variable {} missing from prototype member", map_name))
        })?;
        let data = var
            .data
            .as_ref()
            .ok_or_else(|| AggError::internal(format!("{} has no data loaded", map_name)))?;
        Ok(data.slice(slab.start, slab.count()))
    }

    /// The outer map is read exactly like the data array: either
    /// per-member-one-slot (`joinNew`, already concatenated when the
    /// coordinate was synthesised) or offset-concatenated (`joinExisting`,
    /// where every member supplies its own slice of the shared dimension).
    pub async fn read_outer_map(&self, req: &ReadRequest) -> AggResult<VarData> {
        match &self.data.mode {
            Mode::JoinNew => self.read_inner_map(&self.outer_map_name, req.outer).await,
            Mode::JoinExisting { .. } => {
                let map_array = VirtualArray::new(
                    self.outer_map_name.clone(),
                    self.data.members.clone(),
                    self.data.mode.clone(),
                    self.data.cache_store.clone(),
                );
                map_array.read(req).await
            }
        }
    }
}

impl std::fmt::Debug for VirtualGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualGrid")
            .field("data", &self.data)
            .field("outer_map_name", &self.outer_map_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DatasetTree, Dimension, Kind, Variable, VariableShape};
    use dap2::constraint::Hyperslab;

    fn member_with_grid(location: &str, temps: Vec<f32>, times: Vec<f64>) -> Arc<MemberHandle> {
        let mut tree = DatasetTree::default();
        let dim = Dimension::new("time", temps.len() as u64);
        tree.add_dimension(dim.clone()).unwrap();
        tree.variables.push(Variable {
            name: "temp".to_string(),
            kind: Kind::Float32,
            shape: VariableShape::Grid {
                dims: vec![dim.clone()],
                maps: vec!["time".to_string()],
            },
            attributes: Default::default(),
            data: Some(VarData::Float32(temps)),
        });
        tree.variables.push(Variable {
            name: "time".to_string(),
            kind: Kind::Float64,
            shape: VariableShape::Array { dims: vec![dim] },
            attributes: Default::default(),
            data: Some(VarData::Float64(times)),
        });
        Arc::new(MemberHandle::from_tree(location, None, Arc::new(tree)))
    }

    #[tokio::test]
    async fn join_existing_outer_map_concatenates_like_the_data_array() {
        let m0 = member_with_grid("m0.nc", vec![1.0, 2.0], vec![0.0, 1.0]);
        let m1 = member_with_grid("m1.nc", vec![3.0], vec![2.0]);

        let data_array = VirtualArray::new(
            "temp",
            vec![m0.clone(), m1.clone()],
            Mode::JoinExisting { dim_name: "time".to_string() },
            None,
        );
        let grid = VirtualGrid::new(data_array, "time", m0);

        let req = ReadRequest {
            outer: Hyperslab::whole(3),
            inner: vec![],
        };
        let outer = grid.read_outer_map(&req).await.unwrap();
        assert!(matches!(outer, VarData::Float64(v) if v == vec![0.0, 1.0, 2.0]));
    }
}
