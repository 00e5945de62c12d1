//! The metadata/variable overlay model: a typed-data factory adapter sitting
//! over the real typed-data library (the `netcdf` crate, wired up in
//! [`crate::member`]). Rewriting that library is out of scope, so
//! `DatasetTree` is populated *from* a `netcdf::File` rather than replacing
//! one.

use std::fmt;

/// The canonical type kinds the factory adapter classifies names into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
    String,
    Url,
    Array,
    Structure,
    Sequence,
    Grid,
    Unknown,
}

impl Kind {
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Kind::Byte
                | Kind::Int16
                | Kind::UInt16
                | Kind::Int32
                | Kind::UInt32
                | Kind::Float32
                | Kind::Float64
                | Kind::String
                | Kind::Url
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Kind::Structure | Kind::Sequence)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::Byte => "Byte",
            Kind::Int16 => "Int16",
            Kind::UInt16 => "UInt16",
            Kind::Int32 => "Int32",
            Kind::UInt32 => "UInt32",
            Kind::Float32 => "Float32",
            Kind::Float64 => "Float64",
            Kind::String => "String",
            Kind::Url => "Url",
            Kind::Array => "Array",
            Kind::Structure => "Structure",
            Kind::Sequence => "Sequence",
            Kind::Grid => "Grid",
            Kind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Classify names and build variables by canonical kind.
pub struct TypedDataFactory;

impl TypedDataFactory {
    /// Classify a canonical (already-mapped) type name.
    pub fn classify(name: &str) -> Kind {
        match name {
            "Byte" | "byte" => Kind::Byte,
            "Int16" | "int16" | "Short" | "short" => Kind::Int16,
            "UInt16" | "uint16" => Kind::UInt16,
            "Int32" | "int32" | "Int" | "int" => Kind::Int32,
            "UInt32" | "uint32" => Kind::UInt32,
            "Float32" | "float32" | "Float" | "float" => Kind::Float32,
            "Float64" | "float64" | "Double" | "double" => Kind::Float64,
            "String" | "string" => Kind::String,
            "Url" | "url" | "URL" => Kind::Url,
            "Array" | "array" => Kind::Array,
            "Structure" | "structure" => Kind::Structure,
            "Sequence" | "sequence" => Kind::Sequence,
            "Grid" | "grid" => Kind::Grid,
            _ => Kind::Unknown,
        }
    }

    pub fn is_simple(name: &str) -> bool {
        TypedDataFactory::classify(name).is_simple()
    }

    /// `mapExternalTypeName`: NcML's legacy C type aliases. An empty name
    /// is an error; callers that allow "same as existing" must
    /// special-case the empty string themselves before
    /// calling this.
    pub fn map_external_type_name(name: &str) -> crate::AggResult<Kind> {
        if name.is_empty() {
            return Err(crate::AggError::parse("empty type name"));
        }
        let kind = match name {
            "char" => Kind::Byte,
            "byte" => Kind::Byte,
            "short" => Kind::Int16,
            "int" | "long" => Kind::Int32,
            "float" => Kind::Float32,
            "double" => Kind::Float64,
            "Structure" | "structure" => Kind::Structure,
            other => TypedDataFactory::classify(other),
        };
        Ok(kind)
    }

    pub fn make_variable(kind: Kind, name: &str) -> Variable {
        Variable {
            name: name.to_string(),
            kind,
            shape: VariableShape::Scalar,
            attributes: AttributeTable::default(),
            data: None,
        }
    }
}

/// An ordered, vectorised attribute value. `String`/`Url`/`OtherXml` are
/// never tokenised regardless of the `separator` argument.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Atomic { kind: Kind, values: Vec<String> },
    OtherXml(String),
    Container(Box<AttributeTable>),
}

impl AttrValue {
    pub fn is_vector(&self) -> bool {
        matches!(self, AttrValue::Atomic { values, .. } if values.len() > 1)
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

/// An ordered collection of attributes. Order is preserved because rename
/// and modify are "delete then re-add" operations whose visible effect
/// depends on where the new entry lands.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    entries: Vec<Attribute>,
}

impl AttributeTable {
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.entries.iter().find(|a| a.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.entries.iter_mut().find(|a| a.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add semantics: error if `name` already exists at this scope.
    pub fn add(&mut self, attr: Attribute) -> crate::AggResult<()> {
        if self.contains(&attr.name) {
            return Err(crate::AggError::syntax(format!(
                "attribute already exists: {}",
                attr.name
            )));
        }
        self.entries.push(attr);
        Ok(())
    }

    /// Modify semantics: delete then re-add, so the entry's position
    /// reflects the write.
    pub fn modify(&mut self, attr: Attribute) -> crate::AggResult<()> {
        self.remove(&attr.name)?;
        self.entries.push(attr);
        Ok(())
    }

    /// Remove and return the named attribute.
    pub fn remove(&mut self, name: &str) -> crate::AggResult<Attribute> {
        let idx = self
            .entries
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| attribute_not_found(name))?;
        Ok(self.entries.remove(idx))
    }

    /// Rename semantics: copy original values under the new name, remove
    /// the original. Always delete-then-readd, never in-place mutation.
    pub fn rename(&mut self, org_name: &str, new_name: &str) -> crate::AggResult<()> {
        if !self.contains(org_name) {
            return Err(crate::AggError::syntax(format!(
                "rename: orgName does not exist: {}",
                org_name
            )));
        }
        if self.contains(new_name) {
            return Err(crate::AggError::syntax(format!(
                "rename: name already exists: {}",
                new_name
            )));
        }
        let mut attr = self.remove(org_name)?;
        attr.name = new_name.to_string();
        self.entries.push(attr);
        Ok(())
    }

    /// Recursively erase all values, used by `<explicit/>`.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// First-writer-wins union, recursively deep-copying containers.
    pub fn union_from(&mut self, other: &AttributeTable) {
        for attr in other.iter() {
            if !self.contains(&attr.name) {
                self.entries.push(attr.clone());
            }
        }
    }
}

fn attribute_not_found(name: &str) -> crate::AggError {
    crate::AggError::syntax(format!("attribute does not exist: {}", name))
}

/// `{name, size, isShared, isSizeConstant}`. Equality is name+size only.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub size: u64,
    pub is_shared: bool,
    pub is_size_constant: bool,
}

impl Dimension {
    pub fn new(name: impl Into<String>, size: u64) -> Dimension {
        Dimension {
            name: name.into(),
            size,
            is_shared: true,
            is_size_constant: true,
        }
    }
}

impl PartialEq for Dimension {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.size == other.size
    }
}

/// The structural shape of a variable: scalar, n-d array, grid (array +
/// coordinate maps), structure (named members), or sequence.
#[derive(Debug, Clone)]
pub enum VariableShape {
    Scalar,
    Array { dims: Vec<Dimension> },
    Grid { dims: Vec<Dimension>, maps: Vec<String> },
    Structure { members: Vec<Variable> },
    Sequence,
}

impl VariableShape {
    pub fn dims(&self) -> &[Dimension] {
        match self {
            VariableShape::Array { dims } => dims,
            VariableShape::Grid { dims, .. } => dims,
            _ => &[],
        }
    }

    pub fn rank(&self) -> usize {
        self.dims().len()
    }
}

/// In-memory values for a variable once read or synthesised. Kept as
/// typed vectors rather than raw bytes so the virtual array/grid types
/// can slice and concatenate them directly.
#[derive(Debug, Clone)]
pub enum VarData {
    Bytes(Vec<u8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Strings(Vec<String>),
}

impl VarData {
    pub fn len(&self) -> usize {
        match self {
            VarData::Bytes(v) => v.len(),
            VarData::Int16(v) => v.len(),
            VarData::Int32(v) => v.len(),
            VarData::Float32(v) => v.len(),
            VarData::Float64(v) => v.len(),
            VarData::Strings(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate `other` onto the end of `self`, failing if the variants
    /// don't match: aggregation never mixes element kinds across members.
    pub fn extend(&mut self, other: VarData) -> crate::AggResult<()> {
        match (self, other) {
            (VarData::Bytes(a), VarData::Bytes(b)) => {
                a.extend(b);
                Ok(())
            }
            (VarData::Int16(a), VarData::Int16(b)) => {
                a.extend(b);
                Ok(())
            }
            (VarData::Int32(a), VarData::Int32(b)) => {
                a.extend(b);
                Ok(())
            }
            (VarData::Float32(a), VarData::Float32(b)) => {
                a.extend(b);
                Ok(())
            }
            (VarData::Float64(a), VarData::Float64(b)) => {
                a.extend(b);
                Ok(())
            }
            (VarData::Strings(a), VarData::Strings(b)) => {
                a.extend(b);
                Ok(())
            }
            _ => Err(crate::AggError::internal("mismatched VarData kinds in extend")),
        }
    }

    /// Slice `[start, start+len)` out as a fresh `VarData` of the same kind.
    pub fn slice(&self, start: usize, len: usize) -> VarData {
        match self {
            VarData::Bytes(v) => VarData::Bytes(v[start..start + len].to_vec()),
            VarData::Int16(v) => VarData::Int16(v[start..start + len].to_vec()),
            VarData::Int32(v) => VarData::Int32(v[start..start + len].to_vec()),
            VarData::Float32(v) => VarData::Float32(v[start..start + len].to_vec()),
            VarData::Float64(v) => VarData::Float64(v[start..start + len].to_vec()),
            VarData::Strings(v) => VarData::Strings(v[start..start + len].to_vec()),
        }
    }

    /// Pick every `stride`-th element starting at `start_offset` (local
    /// indices, already offset into this buffer).
    pub fn stride_select(&self, indices: &[usize]) -> VarData {
        match self {
            VarData::Bytes(v) => VarData::Bytes(indices.iter().map(|&i| v[i]).collect()),
            VarData::Int16(v) => VarData::Int16(indices.iter().map(|&i| v[i]).collect()),
            VarData::Int32(v) => VarData::Int32(indices.iter().map(|&i| v[i]).collect()),
            VarData::Float32(v) => VarData::Float32(indices.iter().map(|&i| v[i]).collect()),
            VarData::Float64(v) => VarData::Float64(indices.iter().map(|&i| v[i]).collect()),
            VarData::Strings(v) => VarData::Strings(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: Kind,
    pub shape: VariableShape,
    pub attributes: AttributeTable,
    pub data: Option<VarData>,
}

impl Variable {
    pub fn is_scalar(&self) -> bool {
        matches!(self.shape, VariableShape::Scalar)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.shape, VariableShape::Array { .. })
    }

    pub fn is_grid(&self) -> bool {
        matches!(self.shape, VariableShape::Grid { .. })
    }

    pub fn len(&self) -> u64 {
        self.shape.dims().iter().map(|d| d.size).product::<u64>().max(1)
    }
}

/// The loaded typed tree for one dataset: global attributes, dimensions,
/// and variables.
///
/// `virtual_arrays`/`virtual_grids` hold the streaming readers an
/// aggregation plan installs for a reshaped variable, keyed by variable
/// name; a variable present there has its own `data` left `None`, since the
/// real values live scattered across the member trees instead of in the
/// prototype.
#[derive(Debug, Clone, Default)]
pub struct DatasetTree {
    pub global_attributes: AttributeTable,
    pub dimensions: Vec<Dimension>,
    pub variables: Vec<Variable>,
    pub virtual_arrays: std::collections::HashMap<String, std::sync::Arc<crate::varray::VirtualArray>>,
    pub virtual_grids: std::collections::HashMap<String, std::sync::Arc<crate::vgrid::VirtualGrid>>,
}

impl DatasetTree {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn add_dimension(&mut self, dim: Dimension) -> crate::AggResult<()> {
        if self.dimensions.iter().any(|d| d.name == dim.name) {
            return Err(crate::AggError::parse(format!(
                "dimension already exists: {}",
                dim.name
            )));
        }
        self.dimensions.push(dim);
        Ok(())
    }

    /// Walk every array/grid dimension in the tree and return `name -> size`
    /// pairs, used to populate a member handle's dimension cache.
    pub fn all_dimension_sizes(&self) -> std::collections::HashMap<String, u64> {
        let mut out = std::collections::HashMap::new();
        for d in &self.dimensions {
            out.insert(d.name.clone(), d.size);
        }
        for v in &self.variables {
            for d in v.shape.dims() {
                out.entry(d.name.clone()).or_insert(d.size);
            }
        }
        out
    }

    /// `<explicit/>` semantics: recursively clear every attribute table.
    pub fn clear_all_metadata(&mut self) {
        self.global_attributes.clear();
        for v in &mut self.variables {
            clear_variable_metadata(v);
        }
    }
}

fn clear_variable_metadata(v: &mut Variable) {
    v.attributes.clear();
    if let VariableShape::Structure { members } = &mut v.shape {
        for m in members {
            clear_variable_metadata(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_external_type_name_special_cases() {
        assert_eq!(TypedDataFactory::map_external_type_name("char").unwrap(), Kind::Byte);
        assert_eq!(TypedDataFactory::map_external_type_name("long").unwrap(), Kind::Int32);
        assert_eq!(
            TypedDataFactory::map_external_type_name("Structure").unwrap(),
            Kind::Structure
        );
        assert!(TypedDataFactory::map_external_type_name("").is_err());
    }

    #[test]
    fn attribute_table_add_modify_rename() {
        let mut t = AttributeTable::default();
        t.add(Attribute {
            name: "title".into(),
            value: AttrValue::Atomic {
                kind: Kind::String,
                values: vec!["A".into()],
            },
        })
        .unwrap();

        t.modify(Attribute {
            name: "title".into(),
            value: AttrValue::Atomic {
                kind: Kind::String,
                values: vec!["B".into()],
            },
        })
        .unwrap();

        t.rename("title", "longTitle").unwrap();

        assert!(!t.contains("title"));
        let a = t.get("longTitle").unwrap();
        if let AttrValue::Atomic { values, .. } = &a.value {
            assert_eq!(values, &vec!["B".to_string()]);
        } else {
            panic!("expected atomic value");
        }
    }

    #[test]
    fn dimension_equality_ignores_flags() {
        let a = Dimension {
            name: "time".into(),
            size: 3,
            is_shared: true,
            is_size_constant: true,
        };
        let b = Dimension {
            name: "time".into(),
            size: 3,
            is_shared: false,
            is_size_constant: false,
        };
        assert_eq!(a, b);
    }
}
