//! Bridges the aggregation core's [`crate::model::DatasetTree`] onto the
//! DAP2 presentation traits in the `dap2` crate, the same seam a plain
//! NetCDF file's DAS/DDS presentation fills for a single-file dataset.

use dap2::das::{self, ToDas};
use dap2::dds::{self, ToDds};

use crate::model::{AttrValue, DatasetTree, Kind, Variable};

fn dap_type(kind: Kind) -> dds::DapType {
    match kind {
        Kind::Byte => dds::DapType::Byte,
        Kind::Int16 => dds::DapType::Int16,
        Kind::UInt16 => dds::DapType::UInt16,
        Kind::Int32 => dds::DapType::Int32,
        Kind::UInt32 => dds::DapType::UInt32,
        Kind::Float32 => dds::DapType::Float32,
        Kind::Float64 => dds::DapType::Float64,
        Kind::String => dds::DapType::String,
        Kind::Url => dds::DapType::Url,
        Kind::Structure | Kind::Sequence => dds::DapType::Structure,
        Kind::Grid => dds::DapType::Grid,
        Kind::Array | Kind::Unknown => dds::DapType::Byte,
    }
}

fn variable_shape(v: &Variable) -> dds::VariableShape {
    let dims = v.shape.dims().iter().map(|d| (d.name.clone(), d.size as usize)).collect();
    dds::VariableShape {
        name: v.name.clone(),
        dtype: dap_type(v.kind),
        dims,
        has_maps: v.is_grid(),
    }
}

impl ToDds for DatasetTree {
    fn dataset_name(&self) -> String {
        "aggregation".to_string()
    }

    fn variable_shapes(&self) -> Vec<dds::VariableShape> {
        self.variables.iter().map(variable_shape).collect()
    }

    fn shape_of(&self, name: &str) -> Option<dds::VariableShape> {
        self.variable(name).map(variable_shape)
    }
}

fn das_attribute(name: &str, value: &AttrValue) -> das::Attribute {
    let value = match value {
        AttrValue::OtherXml(xml) => das::AttrValue::Unimplemented(xml.clone()),
        AttrValue::Container(_) => das::AttrValue::Ignored(name.to_string()),
        AttrValue::Atomic { kind, values } => match kind {
            Kind::Float32 if values.len() == 1 => {
                das::AttrValue::Float(values[0].parse().unwrap_or_default())
            }
            Kind::Float32 => das::AttrValue::Floats(values.iter().map(|v| v.parse().unwrap_or_default()).collect()),
            Kind::Float64 if values.len() == 1 => {
                das::AttrValue::Double(values[0].parse().unwrap_or_default())
            }
            Kind::Float64 => das::AttrValue::Doubles(values.iter().map(|v| v.parse().unwrap_or_default()).collect()),
            Kind::Int16 if values.len() == 1 => das::AttrValue::Short(values[0].parse().unwrap_or_default()),
            Kind::Int16 => das::AttrValue::Shorts(values.iter().map(|v| v.parse().unwrap_or_default()).collect()),
            Kind::Int32 | Kind::UInt32 | Kind::UInt16 if values.len() == 1 => {
                das::AttrValue::Int(values[0].parse().unwrap_or_default())
            }
            Kind::Int32 | Kind::UInt32 | Kind::UInt16 => {
                das::AttrValue::Ints(values.iter().map(|v| v.parse().unwrap_or_default()).collect())
            }
            Kind::Byte if values.len() == 1 => das::AttrValue::Uchar(values[0].parse().unwrap_or_default()),
            _ if values.len() == 1 => das::AttrValue::Str(values[0].clone()),
            _ => das::AttrValue::Strs(values.clone()),
        },
    };
    das::Attribute {
        name: name.to_string(),
        value,
    }
}

impl ToDas for DatasetTree {
    fn has_global_attributes(&self) -> bool {
        !self.global_attributes.is_empty()
    }

    fn global_attributes(&self) -> Box<dyn Iterator<Item = das::Attribute>> {
        let attrs: Vec<_> = self
            .global_attributes
            .iter()
            .map(|a| das_attribute(&a.name, &a.value))
            .collect();
        Box::new(attrs.into_iter())
    }

    fn variables(&self) -> Box<dyn Iterator<Item = String>> {
        Box::new(self.variables.iter().map(|v| v.name.clone()).collect::<Vec<_>>().into_iter())
    }

    fn variable_attributes(&self, variable: &str) -> Box<dyn Iterator<Item = das::Attribute>> {
        let attrs: Vec<_> = self
            .variable(variable)
            .map(|v| v.attributes.iter().map(|a| das_attribute(&a.name, &a.value)).collect())
            .unwrap_or_default();
        Box::new(attrs.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeTable, Dimension, VariableShape};

    #[test]
    fn renders_full_dds_for_a_grid_variable() {
        let mut tree = DatasetTree::default();
        let dim = Dimension::new("time", 3);
        tree.add_dimension(dim.clone()).unwrap();
        tree.variables.push(Variable {
            name: "temp".to_string(),
            kind: Kind::Float32,
            shape: VariableShape::Grid {
                dims: vec![dim],
                maps: vec!["time".to_string()],
            },
            attributes: AttributeTable::default(),
            data: None,
        });

        let dds = dds::Dds::build(&tree);
        let s = dds.dds_full();
        assert!(s.contains("Grid {"));
        assert!(s.contains("[time = 3]"));
    }
}
