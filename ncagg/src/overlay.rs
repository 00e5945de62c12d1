//! Attribute/variable overlay engine. The document element tree drives a
//! [`Cursor`] through nested `<attribute type="Structure">` containers and
//! variable scopes; this module owns what happens to the underlying
//! [`AttributeTable`] at each step.

use crate::model::{AttrValue, Attribute, AttributeTable, Kind, TypedDataFactory};
use crate::{AggError, AggResult};

/// Where the cursor currently is in the nesting, tracked as a scope stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    AttributeContainer,
    AtomicAttribute,
    VariableScalar,
    VariableComposite,
}

/// Split a raw `values`/`value` string into tokens. `String`, `Url`, and
/// `OtherXml` are never tokenised regardless of `separator`: the whole
/// string is always a single token for those kinds. An
/// explicit empty `separator` (`separator=""`) also disables tokenisation
/// for any kind, matching `<values separator="">` meaning "this is one
/// value, not a list".
pub fn tokenize_values(raw: &str, kind: Kind, separator: Option<&str>) -> Vec<String> {
    if matches!(kind, Kind::String | Kind::Url) {
        return vec![raw.to_string()];
    }
    match separator {
        Some("") => vec![raw.to_string()],
        Some(sep) => raw.split(sep).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => raw.split_whitespace().map(|s| s.to_string()).collect(),
    }
}

/// Build an atomic attribute from its external type name and raw value
/// text.
pub fn build_atomic_attribute(
    name: &str,
    external_type: &str,
    raw_values: &str,
    separator: Option<&str>,
) -> AggResult<Attribute> {
    let kind = TypedDataFactory::map_external_type_name(external_type)?;
    if kind.is_composite() {
        return Err(AggError::syntax(format!(
            "attribute {} cannot have composite type {}",
            name, kind
        )));
    }
    let values = tokenize_values(raw_values, kind, separator);
    Ok(Attribute {
        name: name.to_string(),
        value: AttrValue::Atomic { kind, values },
    })
}

/// Navigates a stack of nested attribute containers rooted at one
/// [`AttributeTable`] (a dataset's globals, or one variable's). Mirrors the
/// original parser's single mutable "current attribute table" pointer, but
/// expressed as an explicit owned stack instead of raw pointer juggling.
pub struct Cursor<'a> {
    root: &'a mut AttributeTable,
    path: Vec<String>,
    scopes: Vec<Scope>,
}

impl<'a> Cursor<'a> {
    pub fn new(root: &'a mut AttributeTable, scope: Scope) -> Cursor<'a> {
        Cursor {
            root,
            path: Vec::new(),
            scopes: vec![scope],
        }
    }

    pub fn scope(&self) -> Scope {
        *self.scopes.last().unwrap()
    }

    fn current_table_mut(&mut self) -> AggResult<&mut AttributeTable> {
        let mut table = &mut *self.root;
        for name in &self.path {
            let attr = table
                .get_mut(name)
                .ok_or_else(|| AggError::internal(format!("overlay cursor lost container {}", name)))?;
            match &mut attr.value {
                AttrValue::Container(inner) => table = inner,
                _ => return Err(AggError::internal(format!("{} is not a container", name))),
            }
        }
        Ok(table)
    }

    /// Enter (creating if necessary) a nested `Structure`-typed container
    /// attribute, for a `<attribute type="Structure">` holding its own
    /// nested `<attribute>` children.
    pub fn push_container(&mut self, name: &str) -> AggResult<()> {
        let table = self.current_table_mut()?;
        if !table.contains(name) {
            table.add(Attribute {
                name: name.to_string(),
                value: AttrValue::Container(Box::new(AttributeTable::default())),
            })?;
        }
        match &table.get(name).unwrap().value {
            AttrValue::Container(_) => {}
            _ => return Err(AggError::syntax(format!("{} is not a Structure attribute", name))),
        }
        self.path.push(name.to_string());
        self.scopes.push(Scope::AttributeContainer);
        Ok(())
    }

    pub fn pop_container(&mut self) -> AggResult<()> {
        if self.path.pop().is_none() {
            return Err(AggError::internal("overlay cursor: pop with empty path"));
        }
        self.scopes.pop();
        Ok(())
    }

    pub fn contains(&mut self, name: &str) -> AggResult<bool> {
        Ok(self.current_table_mut()?.contains(name))
    }

    pub fn add(&mut self, attr: Attribute) -> AggResult<()> {
        self.current_table_mut()?.add(attr)
    }

    pub fn modify(&mut self, attr: Attribute) -> AggResult<()> {
        self.current_table_mut()?.modify(attr)
    }

    pub fn remove(&mut self, name: &str) -> AggResult<Attribute> {
        self.current_table_mut()?.remove(name)
    }

    /// Rename is always delete-then-readd, never in-place mutation, so the
    /// entry lands at the end of iteration order just like a freshly-added
    /// one.
    pub fn rename(&mut self, org_name: &str, new_name: &str) -> AggResult<()> {
        self.current_table_mut()?.rename(org_name, new_name)
    }

    /// `otherXML` attributes are always scalar: one opaque XML fragment,
    /// never a vector.
    pub fn set_other_xml(&mut self, name: &str, xml: String) -> AggResult<()> {
        let table = self.current_table_mut()?;
        let attr = Attribute {
            name: name.to_string(),
            value: AttrValue::OtherXml(xml),
        };
        if table.contains(name) {
            table.modify(attr)
        } else {
            table.add(attr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_on_whitespace_by_default() {
        let toks = tokenize_values("1 2   3", Kind::Int32, None);
        assert_eq!(toks, vec!["1", "2", "3"]);
    }

    #[test]
    fn string_kind_is_never_tokenised() {
        let toks = tokenize_values("a b c", Kind::String, None);
        assert_eq!(toks, vec!["a b c"]);
    }

    #[test]
    fn explicit_empty_separator_disables_tokenising() {
        let toks = tokenize_values("1 2 3", Kind::Int32, Some(""));
        assert_eq!(toks, vec!["1 2 3"]);
    }

    #[test]
    fn cursor_add_then_rename_inside_nested_container() {
        let mut root = AttributeTable::default();
        {
            let mut cursor = Cursor::new(&mut root, Scope::Global);
            cursor.push_container("provenance").unwrap();
            cursor
                .add(build_atomic_attribute("source", "string", "buoy-12", None).unwrap())
                .unwrap();
            cursor.rename("source", "origin").unwrap();
            cursor.pop_container().unwrap();
        }

        let container = root.get("provenance").unwrap();
        if let AttrValue::Container(inner) = &container.value {
            assert!(inner.contains("origin"));
            assert!(!inner.contains("source"));
        } else {
            panic!("expected container");
        }
    }

    #[test]
    fn composite_type_name_is_rejected_for_attributes() {
        assert!(build_atomic_attribute("x", "Structure", "1", None).is_err());
    }
}
