//! Opens a literal NetCDF file through the `netcdf` crate and maps it onto
//! this crate's own metadata/variable model: global attributes from
//! `nc.attributes()`, one entry per `nc.variables()`, and a Grid shape only
//! when every one of a variable's dimensions has a matching coordinate
//! variable.

use std::path::Path;

use crate::model::{AttrValue, Attribute, AttributeTable, DatasetTree, Dimension, Kind, VarData, Variable, VariableShape};
use crate::{AggError, AggResult};

fn kind_of(var: &netcdf::Variable) -> Kind {
    match var.vartype() {
        netcdf_sys::NC_BYTE | netcdf_sys::NC_CHAR => Kind::Byte,
        netcdf_sys::NC_SHORT => Kind::Int16,
        netcdf_sys::NC_INT => Kind::Int32,
        netcdf_sys::NC_FLOAT => Kind::Float32,
        netcdf_sys::NC_DOUBLE => Kind::Float64,
        netcdf_sys::NC_STRING => Kind::String,
        _ => Kind::Unknown,
    }
}

fn attr_value(attr: &netcdf::Attribute) -> AttrValue {
    use netcdf::attribute::AttrValue::*;
    match attr.value() {
        Ok(Str(s)) => AttrValue::Atomic {
            kind: Kind::String,
            values: vec![s],
        },
        Ok(Float(f)) => AttrValue::Atomic {
            kind: Kind::Float32,
            values: vec![f.to_string()],
        },
        Ok(Double(f)) => AttrValue::Atomic {
            kind: Kind::Float64,
            values: vec![f.to_string()],
        },
        Ok(Short(v)) => AttrValue::Atomic {
            kind: Kind::Int16,
            values: vec![v.to_string()],
        },
        Ok(Int(v)) => AttrValue::Atomic {
            kind: Kind::Int32,
            values: vec![v.to_string()],
        },
        Ok(Uchar(v)) => AttrValue::Atomic {
            kind: Kind::Byte,
            values: vec![v.to_string()],
        },
        Ok(other) => AttrValue::Atomic {
            kind: Kind::String,
            values: vec![format!("{:?}", other)],
        },
        Err(_) => AttrValue::Atomic {
            kind: Kind::String,
            values: vec![String::new()],
        },
    }
}

fn attribute_table<'a>(attrs: impl Iterator<Item = &'a netcdf::Attribute>) -> AttributeTable {
    let mut table = AttributeTable::default();
    for a in attrs {
        let attr = Attribute {
            name: a.name().to_string(),
            value: attr_value(a),
        };
        table.add(attr).ok();
    }
    table
}

fn variable_shape(nc: &netcdf::File, var: &netcdf::Variable) -> VariableShape {
    let dims: Vec<Dimension> = var.dimensions().iter().map(|d| Dimension::new(d.name(), d.len() as u64)).collect();
    if dims.is_empty() {
        return VariableShape::Scalar;
    }
    let maps: Vec<String> = dims
        .iter()
        .filter(|d| nc.variable(&d.name).is_some())
        .map(|d| d.name.clone())
        .collect();
    if dims.len() >= 2 && maps.len() == dims.len() {
        VariableShape::Grid { dims, maps }
    } else {
        VariableShape::Array { dims }
    }
}

fn read_data(var: &netcdf::Variable, kind: Kind) -> AggResult<VarData> {
    let len = var.len();
    match kind {
        Kind::Byte => {
            let mut buf = vec![0u8; len];
            var.values_to(&mut buf, None, None).map_err(|e| AggError::internal(e.to_string()))?;
            Ok(VarData::Bytes(buf))
        }
        Kind::Int16 => {
            let mut buf = vec![0i16; len];
            var.values_to(&mut buf, None, None).map_err(|e| AggError::internal(e.to_string()))?;
            Ok(VarData::Int16(buf))
        }
        Kind::Int32 => {
            let mut buf = vec![0i32; len];
            var.values_to(&mut buf, None, None).map_err(|e| AggError::internal(e.to_string()))?;
            Ok(VarData::Int32(buf))
        }
        Kind::Float32 => {
            let mut buf = vec![0f32; len];
            var.values_to(&mut buf, None, None).map_err(|e| AggError::internal(e.to_string()))?;
            Ok(VarData::Float32(buf))
        }
        Kind::Float64 => {
            let mut buf = vec![0f64; len];
            var.values_to(&mut buf, None, None).map_err(|e| AggError::internal(e.to_string()))?;
            Ok(VarData::Float64(buf))
        }
        other => Err(AggError::unimplemented(format!("reading {} variable data from a NetCDF file", other))),
    }
}

/// Build a `DatasetTree` holding only dimensions, attributes, and shapes —
/// enough for a DAS/DDS response and for filling a member's dimension
/// cache.
pub fn open_metadata(path: &Path) -> AggResult<DatasetTree> {
    build(path, false)
}

/// Build a `DatasetTree` with every simple-typed variable's values loaded
/// too, for a DODS/data response.
pub fn open_with_data(path: &Path) -> AggResult<DatasetTree> {
    build(path, true)
}

fn build(path: &Path, with_data: bool) -> AggResult<DatasetTree> {
    let nc = netcdf::open(path).map_err(|e| AggError::not_found(format!("{}: {}", path.display(), e)))?;

    let mut tree = DatasetTree {
        global_attributes: attribute_table(nc.attributes()),
        dimensions: nc.dimensions().map(|d| Dimension::new(d.name(), d.len() as u64)).collect(),
        variables: Vec::new(),
        virtual_arrays: std::collections::HashMap::new(),
        virtual_grids: std::collections::HashMap::new(),
    };

    for var in nc.variables() {
        let kind = kind_of(var);
        let shape = variable_shape(&nc, var);
        let data = if with_data && matches!(kind, Kind::Byte | Kind::Int16 | Kind::Int32 | Kind::Float32 | Kind::Float64) {
            Some(read_data(var, kind)?)
        } else {
            None
        };
        tree.variables.push(Variable {
            name: var.name().to_string(),
            kind,
            shape,
            attributes: attribute_table(var.attributes()),
            data,
        });
    }

    Ok(tree)
}

/// `.nc`/`.nc4`/`.cdf` and anything without the NcML document extensions
/// are treated as a plain NetCDF file rather than an aggregation document.
pub fn is_netcdf_path(path: &Path) -> bool {
    !matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ncml") | Some("xml")
    )
}
