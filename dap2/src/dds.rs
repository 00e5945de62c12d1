//! # Data Descriptor Structure
//!
//! DDS responses describe the shape and type of a dataset's variables, and
//! are re-rendered per-request since a constraint expression narrows the
//! dimensions that are reported.

use crate::constraint::{Constraint, Hyperslab};

/// The DAP2 type names we render, named independently of any particular
/// backend's native type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DapType {
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
    String,
    Url,
    Structure,
    Grid,
}

impl DapType {
    pub fn as_str(&self) -> &'static str {
        use DapType::*;
        match self {
            Byte => "Byte",
            Int16 => "Int16",
            UInt16 => "UInt16",
            Int32 => "Int32",
            UInt32 => "UInt32",
            Float32 => "Float32",
            Float64 => "Float64",
            String => "String",
            Url => "Url",
            Structure => "Structure",
            Grid => "Grid",
        }
    }
}

/// A variable's shape as seen by the DDS renderer: its dap type, and its
/// dimensions as `(name, length)` in order (outer-to-inner).
#[derive(Debug, Clone)]
pub struct VariableShape {
    pub name: String,
    pub dtype: DapType,
    pub dims: Vec<(String, usize)>,
    /// Present for `Grid`-typed variables: one inner map per dimension,
    /// `None` if the dataset has no coordinate variable for that dimension
    /// (in which case the variable degrades to a bare array in the DDS).
    pub has_maps: bool,
}

impl VariableShape {
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }
}

/// Types implementing this can be rendered as a DAP2 DDS. Handlers for a
/// concrete backing format (the "typed-data library" the core wraps)
/// implement it once and get both the full and the constrained-per-variable
/// text form for free.
pub trait ToDds {
    fn dataset_name(&self) -> String;
    fn variable_shapes(&self) -> Vec<VariableShape>;
    fn shape_of(&self, name: &str) -> Option<VariableShape>;
}

const INDENT: usize = 4;

fn format_var(indent: usize, v: &VariableShape, slab: Option<&[Hyperslab]>) -> String {
    if v.is_scalar() {
        return format!("{}{} {};", " ".repeat(indent), v.dtype.as_str(), v.name);
    }

    let dims = v
        .dims
        .iter()
        .enumerate()
        .map(|(i, (name, len))| {
            let n = slab
                .and_then(|s| s.get(i))
                .map(|h| h.count())
                .unwrap_or(*len);
            format!("[{} = {}]", name, n)
        })
        .collect::<String>();

    format!("{}{} {}{};", " ".repeat(indent), v.dtype.as_str(), v.name, dims)
}

fn format_grid(indent: usize, v: &VariableShape, slab: Option<&[Hyperslab]>) -> String {
    if !v.has_maps {
        return format_var(indent, v, slab);
    }

    let mut out = Vec::new();
    out.push(format!("{}Grid {{", " ".repeat(indent)));
    out.push(format!("{} ARRAY:", " ".repeat(indent)));
    out.push(format_var(2 * indent, v, slab));
    out.push(format!("{} MAPS:", " ".repeat(indent)));
    for (i, (name, len)) in v.dims.iter().enumerate() {
        let map = VariableShape {
            name: name.clone(),
            dtype: v.dtype,
            dims: vec![(name.clone(), *len)],
            has_maps: false,
        };
        let map_slab = slab.and_then(|s| s.get(i)).map(std::slice::from_ref);
        out.push(format_var(2 * indent, &map, map_slab));
    }
    out.push(format!("{}}} {};", " ".repeat(indent), v.name));
    out.join("\n")
}

/// Rendered DDS text, keyed so per-variable / per-projection fragments can
/// be looked up without re-walking the whole dataset for every request.
pub struct Dds {
    name: String,
    shapes: Vec<VariableShape>,
}

impl Dds {
    pub fn build<T: ToDds>(source: &T) -> Dds {
        Dds {
            name: source.dataset_name(),
            shapes: source.variable_shapes(),
        }
    }

    /// Full, unconstrained DDS text.
    pub fn dds_full(&self) -> String {
        let body = self
            .shapes
            .iter()
            .map(|v| {
                let mut s = format_grid(INDENT, v, None);
                s.push('\n');
                s
            })
            .collect::<String>();
        format!("Dataset {{\n{}}} {};", body, self.name)
    }

    /// DDS text narrowed by a constraint expression's projection list.
    pub fn dds_constrained(&self, c: &Constraint) -> anyhow::Result<String> {
        if c.is_empty() {
            return Ok(self.dds_full());
        }

        let body = c
            .projection
            .iter()
            .map(|p| {
                let shape = self
                    .shapes
                    .iter()
                    .find(|s| s.name == p.name)
                    .ok_or_else(|| anyhow!("variable not found: {}", p.name))?;
                let slab = if p.slab.is_empty() { None } else { Some(p.slab.as_slice()) };
                Ok(format!("{}\n", format_grid(INDENT, shape, slab)))
            })
            .collect::<anyhow::Result<String>>()?;

        Ok(format!("Dataset {{\n{}}} {};", body, self.name))
    }

    pub fn shape_of(&self, name: &str) -> Option<&VariableShape> {
        self.shapes.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture;

    impl ToDds for Fixture {
        fn dataset_name(&self) -> String {
            "fixture.nc".to_string()
        }
        fn variable_shapes(&self) -> Vec<VariableShape> {
            vec![
                VariableShape {
                    name: "time".to_string(),
                    dtype: DapType::Float64,
                    dims: vec![("time".to_string(), 3)],
                    has_maps: false,
                },
                VariableShape {
                    name: "temp".to_string(),
                    dtype: DapType::Float32,
                    dims: vec![("time".to_string(), 3)],
                    has_maps: true,
                },
            ]
        }
        fn shape_of(&self, name: &str) -> Option<VariableShape> {
            self.variable_shapes().into_iter().find(|s| s.name == name)
        }
    }

    #[test]
    fn renders_full_dds() {
        let dds = Dds::build(&Fixture);
        let s = dds.dds_full();
        assert!(s.starts_with("Dataset {\n"));
        assert!(s.contains("Grid {"));
        assert!(s.ends_with("} fixture.nc;"));
    }

    #[test]
    fn renders_constrained_dds() {
        let dds = Dds::build(&Fixture);
        let c = Constraint::parse("temp[0:1]").unwrap();
        let s = dds.dds_constrained(&c).unwrap();
        assert!(s.contains("[time = 2]"));
    }
}
