//! Document element tree: `onStartElement` builds a typed node and pushes
//! scope, `onEndElement` commits it and pops scope. Built on top of the
//! event-driven interpreter in [`crate::xml`] and the attribute/variable
//! overlay in [`crate::overlay`].

use std::path::{Path, PathBuf};

use crate::model::{AttrValue, Attribute, DatasetTree, Dimension, Kind, TypedDataFactory, VarData, Variable, VariableShape};
use crate::overlay::{tokenize_values, Cursor, Scope};
use crate::planner::AggregationType;
use crate::scan::ScanSpec;
use crate::xml::otherxml::OtherXmlCapture;
use crate::xml::{Attr, Sink};
use crate::{AggError, AggResult};

/// One `<netcdf>` child of an `<aggregation>`: either a real file location
/// or (for `joinNew`) an inline member with no location at all.
#[derive(Debug, Clone, Default)]
pub struct MemberSpec {
    pub location: Option<String>,
    pub coord_value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregationSpecNode {
    pub agg_type: AggregationType,
    pub dim_name: Option<String>,
    pub date_format_mark: Option<String>,
    pub members: Vec<MemberSpec>,
    pub scans: Vec<ScanSpec>,
}

/// The parsed form of one NcML document: its own metadata/variable tree
/// (for `union`, or for decorating an aggregation's prototype) plus an
/// optional nested `<aggregation>`.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    pub tree: DatasetTree,
    pub aggregation: Option<AggregationSpecNode>,
    pub explicit: bool,
}

enum Frame {
    Netcdf,
    Variable {
        name: String,
    },
    Attribute {
        name: String,
        kind: Kind,
        separator: Option<String>,
        container: bool,
        pending: Option<Vec<String>>,
        org_name: Option<String>,
    },
    Values {
        text: String,
    },
    Dimension,
    Remove,
    Aggregation,
    ScanElem,
}

/// Drives one parse of an NcML document into a [`ParsedDocument`].
/// Implements [`Sink`] so [`crate::xml::parse`] can push events at it.
pub struct DocumentBuilder {
    base_dir: Option<PathBuf>,
    doc: ParsedDocument,
    stack: Vec<Frame>,
    /// Names of `Structure`-typed attribute containers currently entered,
    /// from the root attribute table down to the innermost.
    container_path: Vec<String>,
    current_variable: Option<String>,
    pending_aggregation: Option<AggregationSpecNode>,
    other_xml: Option<(OtherXmlCapture, u32)>,
}

impl DocumentBuilder {
    pub fn new(base_dir: Option<PathBuf>) -> DocumentBuilder {
        DocumentBuilder {
            base_dir,
            doc: ParsedDocument::default(),
            stack: Vec::new(),
            container_path: Vec::new(),
            current_variable: None,
            pending_aggregation: None,
            other_xml: None,
        }
    }

    pub fn into_document(self) -> ParsedDocument {
        self.doc
    }

    fn attr<'a>(attrs: &'a [Attr], name: &str) -> Option<&'a str> {
        attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Build a [`Cursor`] scoped to the currently-open attribute table
    /// (globals, or the in-scope variable's), walked down to wherever
    /// `container_path` currently sits. Rebuilt fresh on every call rather
    /// than held as a field, since a `Cursor<'a>` borrows its root table.
    fn attribute_cursor(&mut self) -> AggResult<Cursor<'_>> {
        let (root, scope) = match &self.current_variable {
            None => (&mut self.doc.tree.global_attributes, Scope::Global),
            Some(name) => (
                &mut self
                    .doc
                    .tree
                    .variable_mut(name)
                    .ok_or_else(|| AggError::internal(format!("variable {} left scope", name)))?
                    .attributes,
                Scope::VariableScalar,
            ),
        };
        let mut cursor = Cursor::new(root, scope);
        for seg in &self.container_path {
            cursor.push_container(seg)?;
        }
        Ok(cursor)
    }

    fn start_netcdf(&mut self, attrs: &[Attr]) -> AggResult<()> {
        if self.stack.iter().any(|f| matches!(f, Frame::Aggregation)) {
            let location = Self::attr(attrs, "location").map(|s| s.to_string());
            let coord_value = Self::attr(attrs, "coordValue").map(|s| s.to_string());
            let agg = self
                .pending_aggregation
                .as_mut()
                .ok_or_else(|| AggError::internal("netcdf member seen outside aggregation"))?;
            agg.members.push(MemberSpec { location, coord_value });
        }
        self.stack.push(Frame::Netcdf);
        Ok(())
    }

    fn start_variable(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let name = Self::attr(attrs, "name")
            .ok_or_else(|| AggError::syntax("<variable> requires a name"))?
            .to_string();
        let org_name = Self::attr(attrs, "orgName");
        let type_name = Self::attr(attrs, "type");

        if let Some(org) = org_name {
            let var = self
                .doc
                .tree
                .variables
                .iter_mut()
                .find(|v| v.name == org)
                .ok_or_else(|| AggError::syntax(format!("variable rename: orgName does not exist: {}", org)))?;
            if self.doc.tree.variable(&name).is_some() {
                return Err(AggError::syntax(format!("variable rename: name already exists: {}", name)));
            }
            var.name = name.clone();
        } else if self.doc.tree.variable(&name).is_none() {
            let kind = match type_name {
                Some(t) => TypedDataFactory::map_external_type_name(t)?,
                None => Kind::Unknown,
            };
            self.doc.tree.variables.push(TypedDataFactory::make_variable(kind, &name));
        }

        self.current_variable = Some(name.clone());
        self.stack.push(Frame::Variable { name });
        Ok(())
    }

    fn start_attribute(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let name = Self::attr(attrs, "name")
            .ok_or_else(|| AggError::syntax("<attribute> requires a name"))?
            .to_string();
        let org_name = Self::attr(attrs, "orgName").map(|s| s.to_string());
        let type_name = Self::attr(attrs, "type").unwrap_or("String");
        let separator = Self::attr(attrs, "separator").map(|s| s.to_string());
        let value = Self::attr(attrs, "value");

        if type_name == "OtherXML" {
            self.other_xml = Some((OtherXmlCapture::new(), 0));
            self.stack.push(Frame::Attribute {
                name,
                kind: Kind::String,
                separator,
                container: false,
                pending: None,
                org_name,
            });
            return Ok(());
        }

        let kind = TypedDataFactory::map_external_type_name(type_name)?;

        if kind.is_composite() {
            self.attribute_cursor()?.push_container(&name)?;
            self.container_path.push(name.clone());
            self.stack.push(Frame::Attribute {
                name,
                kind,
                separator,
                container: true,
                pending: None,
                org_name,
            });
            return Ok(());
        }

        let pending = value.map(|v| tokenize_values(v, kind, separator.as_deref()));
        self.stack.push(Frame::Attribute {
            name,
            kind,
            separator,
            container: false,
            pending,
            org_name,
        });
        Ok(())
    }

    fn commit_attribute(&mut self, name: &str, kind: Kind, values: Vec<String>, org_name: Option<String>) -> AggResult<()> {
        let attribute = Attribute {
            name: name.to_string(),
            value: AttrValue::Atomic { kind, values },
        };
        let mut cursor = self.attribute_cursor()?;
        if let Some(org) = org_name {
            cursor.rename(&org, name)?;
            cursor.modify(attribute)
        } else if cursor.contains(name)? {
            cursor.modify(attribute)
        } else {
            cursor.add(attribute)
        }
    }

    /// Auto-generated `<values start=".." increment="..">`: when nested
    /// directly under `<variable>`, the point count comes from the
    /// variable's own constrained length rather than a separately-specified
    /// count, and `npts` (if given at all) is only an override.
    fn start_values(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let start = Self::attr(attrs, "start");
        let increment = Self::attr(attrs, "increment");
        let npts: Option<usize> = Self::attr(attrs, "npts")
            .map(|n| n.parse().map_err(|_| AggError::syntax("bad npts")))
            .transpose()?;

        if let (Some(start), Some(incr)) = (start, increment) {
            let start: f64 = start.parse().map_err(|_| AggError::syntax("bad start"))?;
            let incr: f64 = incr.parse().map_err(|_| AggError::syntax("bad increment"))?;

            match self.stack.last() {
                Some(Frame::Attribute { .. }) => {
                    let npts = npts.ok_or_else(|| AggError::syntax("<values> inside <attribute> requires npts"))?;
                    let generated: Vec<String> = (0..npts).map(|i| (start + incr * i as f64).to_string()).collect();
                    if let Some(Frame::Attribute { pending, .. }) = self.stack.last_mut() {
                        *pending = Some(generated);
                    }
                }
                Some(Frame::Variable { name }) => {
                    let name = name.clone();
                    let var = self
                        .doc
                        .tree
                        .variable_mut(&name)
                        .ok_or_else(|| AggError::internal(format!("variable {} left scope", name)))?;
                    let count = npts.unwrap_or(var.len() as usize);
                    var.data = Some(generate_sequence(var.kind, start, incr, count));
                }
                _ => {}
            }
        }

        self.stack.push(Frame::Values { text: String::new() });
        Ok(())
    }

    fn end_values(&mut self) -> AggResult<()> {
        if let Some(Frame::Values { text }) = self.stack.pop() {
            if text.trim().is_empty() {
                return Ok(());
            }
            match self.stack.last_mut() {
                Some(Frame::Attribute { kind, separator, pending, .. }) => {
                    *pending = Some(tokenize_values(text.trim(), *kind, separator.as_deref()));
                }
                Some(Frame::Variable { name }) => {
                    let name = name.clone();
                    let var = self
                        .doc
                        .tree
                        .variable_mut(&name)
                        .ok_or_else(|| AggError::internal(format!("variable {} left scope", name)))?;
                    let tokens = tokenize_values(text.trim(), var.kind, None);
                    var.data = Some(values_to_vardata(var.kind, &tokens)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn start_dimension(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let name = Self::attr(attrs, "name")
            .ok_or_else(|| AggError::syntax("<dimension> requires a name"))?
            .to_string();
        let length: u64 = Self::attr(attrs, "length")
            .ok_or_else(|| AggError::syntax("<dimension> requires a length"))?
            .parse()
            .map_err(|_| AggError::syntax("dimension length must be an integer"))?;
        let is_unlimited = Self::attr(attrs, "isUnlimited").map(|v| v == "true").unwrap_or(false);

        self.doc.tree.add_dimension(Dimension {
            name,
            size: length,
            is_shared: true,
            is_size_constant: !is_unlimited,
        })?;
        self.stack.push(Frame::Dimension);
        Ok(())
    }

    fn start_remove(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let kind = Self::attr(attrs, "type").unwrap_or("attribute");
        let name = Self::attr(attrs, "name")
            .ok_or_else(|| AggError::syntax("<remove> requires a name"))?;

        match kind {
            "attribute" => {
                self.attribute_cursor()?.remove(name)?;
            }
            "variable" => {
                let before = self.doc.tree.variables.len();
                self.doc.tree.variables.retain(|v| v.name != name);
                if self.doc.tree.variables.len() == before {
                    return Err(AggError::syntax(format!("remove: variable does not exist: {}", name)));
                }
            }
            "dimension" => {
                let before = self.doc.tree.dimensions.len();
                self.doc.tree.dimensions.retain(|d| d.name != name);
                if self.doc.tree.dimensions.len() == before {
                    return Err(AggError::syntax(format!("remove: dimension does not exist: {}", name)));
                }
            }
            other => return Err(AggError::syntax(format!("remove: unknown type {}", other))),
        }

        self.stack.push(Frame::Remove);
        Ok(())
    }

    fn start_aggregation(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let type_name = Self::attr(attrs, "type").unwrap_or("union");
        let agg_type = match type_name {
            "union" => AggregationType::Union,
            "joinNew" => AggregationType::JoinNew,
            "joinExisting" => AggregationType::JoinExisting,
            "forecastModelRunCollection" => AggregationType::ForecastModelRunCollection,
            "forecastModelSingleRunCollection" => AggregationType::ForecastModelSingleRunCollection,
            other => return Err(AggError::syntax(format!("unknown aggregation type: {}", other))),
        };

        self.pending_aggregation = Some(AggregationSpecNode {
            agg_type,
            dim_name: Self::attr(attrs, "dimName").map(|s| s.to_string()),
            date_format_mark: None,
            members: Vec::new(),
            scans: Vec::new(),
        });
        self.stack.push(Frame::Aggregation);
        Ok(())
    }

    fn start_scan(&mut self, attrs: &[Attr]) -> AggResult<()> {
        let location = Self::attr(attrs, "location")
            .ok_or_else(|| AggError::syntax("<scan> requires a location"))?;
        let location = match &self.base_dir {
            Some(base) if Path::new(location).is_relative() => base.join(location),
            _ => PathBuf::from(location),
        };
        let date_format_mark = Self::attr(attrs, "dateFormatMark").map(|s| s.to_string());

        let spec = ScanSpec {
            location,
            suffix: Self::attr(attrs, "suffix").map(|s| s.to_string()),
            reg_exp: Self::attr(attrs, "regExp").map(|s| s.to_string()),
            subdirs: Self::attr(attrs, "subdirs").map(|v| v == "true").unwrap_or(true),
            older_than_secs: Self::attr(attrs, "olderThan").and_then(parse_older_than),
            date_format_mark: date_format_mark.clone(),
        };

        if let Some(agg) = self.pending_aggregation.as_mut() {
            if agg.date_format_mark.is_none() {
                agg.date_format_mark = date_format_mark;
            }
            agg.scans.push(spec);
        }
        self.stack.push(Frame::ScanElem);
        Ok(())
    }
}

/// Build `count` values of `kind` from an arithmetic progression, the way
/// `<values start=".." increment="..">` generates a coordinate axis.
fn generate_sequence(kind: Kind, start: f64, increment: f64, count: usize) -> VarData {
    match kind {
        Kind::Byte => VarData::Bytes((0..count).map(|i| (start + increment * i as f64) as u8).collect()),
        Kind::Int16 | Kind::UInt16 => VarData::Int16((0..count).map(|i| (start + increment * i as f64) as i16).collect()),
        Kind::Int32 | Kind::UInt32 => VarData::Int32((0..count).map(|i| (start + increment * i as f64) as i32).collect()),
        Kind::Float32 => VarData::Float32((0..count).map(|i| (start + increment * i as f64) as f32).collect()),
        _ => VarData::Float64((0..count).map(|i| start + increment * i as f64).collect()),
    }
}

/// Parse whitespace/separator-tokenised text into a typed `VarData` matching
/// a variable's element kind.
fn values_to_vardata(kind: Kind, tokens: &[String]) -> AggResult<VarData> {
    fn parse_all<T: std::str::FromStr>(tokens: &[String], kind: Kind) -> AggResult<Vec<T>> {
        tokens
            .iter()
            .map(|t| t.parse::<T>().map_err(|_| AggError::syntax(format!("bad {} value: {}", kind, t))))
            .collect()
    }

    match kind {
        Kind::Byte => Ok(VarData::Bytes(parse_all(tokens, kind)?)),
        Kind::Int16 | Kind::UInt16 => Ok(VarData::Int16(parse_all(tokens, kind)?)),
        Kind::Int32 | Kind::UInt32 => Ok(VarData::Int32(parse_all(tokens, kind)?)),
        Kind::Float32 => Ok(VarData::Float32(parse_all(tokens, kind)?)),
        Kind::Float64 => Ok(VarData::Float64(parse_all(tokens, kind)?)),
        _ => Ok(VarData::Strings(tokens.to_vec())),
    }
}

/// Parse a duration like `"10 min"`/`"1 day"` (NcML's `olderThan` syntax)
/// into seconds.
fn parse_older_than(raw: &str) -> Option<u64> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let (n, unit) = match parts.as_slice() {
        [n, unit] => (n.parse::<u64>().ok()?, *unit),
        [n] => (n.parse::<u64>().ok()?, "sec"),
        _ => return None,
    };
    let factor = match unit {
        "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => 60,
        "hour" | "hours" => 3600,
        "day" | "days" => 86400,
        _ => return None,
    };
    Some(n * factor)
}

impl Sink for DocumentBuilder {
    fn on_start_element(&mut self, name: &str, attrs: &[Attr], _line: u64) -> AggResult<()> {
        if let Some((capture, depth)) = &mut self.other_xml {
            capture.on_start_element(name, attrs, _line)?;
            *depth += 1;
            return Ok(());
        }

        match name {
            "netcdf" => self.start_netcdf(attrs),
            "variable" => self.start_variable(attrs),
            "attribute" => self.start_attribute(attrs),
            "values" => self.start_values(attrs),
            "dimension" => self.start_dimension(attrs),
            "remove" => self.start_remove(attrs),
            "aggregation" => self.start_aggregation(attrs),
            "scan" => self.start_scan(attrs),
            "explicit" => {
                self.doc.tree.clear_all_metadata();
                self.doc.explicit = true;
                Ok(())
            }
            "readMetadata" => Ok(()),
            _ => Ok(()),
        }
    }

    fn on_end_element(&mut self, name: &str, _line: u64) -> AggResult<()> {
        if let Some((capture, depth)) = &mut self.other_xml {
            if *depth == 0 {
                let xml = std::mem::replace(capture, OtherXmlCapture::new()).finish();
                self.other_xml = None;
                if let Some(Frame::Attribute { name, org_name, .. }) = self.stack.pop() {
                    let mut cursor = self.attribute_cursor()?;
                    if let Some(org) = org_name {
                        cursor.rename(&org, &name)?;
                    }
                    cursor.set_other_xml(&name, xml)?;
                }
                return Ok(());
            }
            capture.on_end_element(name, _line)?;
            *depth -= 1;
            return Ok(());
        }

        match name {
            "netcdf" => {
                self.stack.pop();
            }
            "variable" => {
                self.stack.pop();
                self.current_variable = None;
            }
            "attribute" => {
                if let Some(Frame::Attribute {
                    name,
                    kind,
                    container,
                    pending,
                    org_name,
                    ..
                }) = self.stack.pop()
                {
                    if container {
                        self.container_path.pop();
                    } else if let Some(values) = pending {
                        self.commit_attribute(&name, kind, values, org_name)?;
                    } else {
                        return Err(AggError::syntax(format!("attribute {} has no value", name)));
                    }
                }
            }
            "values" => self.end_values()?,
            "dimension" | "remove" | "scan" => {
                self.stack.pop();
            }
            "aggregation" => {
                self.stack.pop();
                self.doc.aggregation = self.pending_aggregation.take();
            }
            _ => {}
        }
        Ok(())
    }

    fn on_characters(&mut self, text: &str, line: u64) -> AggResult<()> {
        if let Some((capture, _)) = &mut self.other_xml {
            return capture.on_characters(text, line);
        }
        if let Some(Frame::Values { text: buf }) = self.stack.last_mut() {
            buf.push_str(text);
        }
        Ok(())
    }
}

/// Parse one NcML file into its document tree and (if present) aggregation
/// node. `base_dir` anchors relative `<scan location="...">` paths.
pub fn parse_document(path: &Path) -> AggResult<ParsedDocument> {
    let base_dir = path.parent().map(|p| p.to_path_buf());
    let mut builder = DocumentBuilder::new(base_dir);
    crate::xml::parse(path, &mut builder)?;
    Ok(builder.into_document())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ncml(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_global_attributes_and_dimension() {
        let f = write_ncml(
            r#"<netcdf>
                 <attribute name="title" value="test dataset"/>
                 <dimension name="time" length="4"/>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        assert_eq!(doc.tree.dimension("time").unwrap().size, 4);
        let title = doc.tree.global_attributes.get("title").unwrap();
        assert!(matches!(&title.value, AttrValue::Atomic { values, .. } if values == &vec!["test dataset".to_string()]));
    }

    #[test]
    fn renames_variable_via_org_name() {
        let f = write_ncml(
            r#"<netcdf>
                 <variable name="temp" type="float"/>
                 <variable name="temperature" orgName="temp"/>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        assert!(doc.tree.variable("temp").is_none());
        assert!(doc.tree.variable("temperature").is_some());
    }

    #[test]
    fn values_element_populates_pending_attribute() {
        let f = write_ncml(
            r#"<netcdf>
                 <variable name="lat" type="float">
                   <attribute name="units" type="string">
                     <values>degrees_north</values>
                   </attribute>
                 </variable>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        let var = doc.tree.variable("lat").unwrap();
        let units = var.attributes.get("units").unwrap();
        assert!(matches!(&units.value, AttrValue::Atomic { values, .. } if values == &vec!["degrees_north".to_string()]));
    }

    #[test]
    fn values_element_populates_variable_data_directly() {
        let f = write_ncml(
            r#"<netcdf>
                 <variable name="flag" type="int">
                   <values>1 2 3</values>
                 </variable>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        let var = doc.tree.variable("flag").unwrap();
        assert!(matches!(&var.data, Some(VarData::Int32(v)) if v == &vec![1, 2, 3]));
    }

    #[test]
    fn generated_values_derive_count_from_variable_shape_without_npts() {
        let mut builder = DocumentBuilder::new(None);
        builder.doc.tree.add_dimension(Dimension::new("time", 3)).unwrap();
        builder.doc.tree.variables.push(Variable {
            name: "time".to_string(),
            kind: Kind::Float64,
            shape: VariableShape::Array {
                dims: vec![Dimension::new("time", 3)],
            },
            attributes: Default::default(),
            data: None,
        });
        builder.current_variable = Some("time".to_string());
        builder.stack.push(Frame::Variable { name: "time".to_string() });

        builder
            .start_values(&[("start".to_string(), "0".to_string()), ("increment".to_string(), "6".to_string())])
            .unwrap();

        let var = builder.doc.tree.variable("time").unwrap();
        assert!(matches!(&var.data, Some(VarData::Float64(v)) if v == &vec![0.0, 6.0, 12.0]));
    }

    #[test]
    fn other_xml_type_name_is_recognised() {
        let f = write_ncml(
            r#"<netcdf>
                 <attribute name="metadata" type="OtherXML"><foo><bar/></foo></attribute>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        let attr = doc.tree.global_attributes.get("metadata").unwrap();
        assert!(matches!(&attr.value, AttrValue::OtherXml(xml) if xml.contains("<foo>")));
    }

    #[test]
    fn explicit_clears_inherited_metadata() {
        let f = write_ncml(
            r#"<netcdf>
                 <attribute name="title" value="will be cleared"/>
                 <explicit/>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        assert!(doc.explicit);
        assert!(doc.tree.global_attributes.is_empty());
    }

    #[test]
    fn aggregation_collects_members_and_scans() {
        let f = write_ncml(
            r#"<netcdf>
                 <aggregation type="joinExisting" dimName="time">
                   <netcdf location="m0.nc"/>
                   <netcdf location="m1.nc"/>
                   <scan location="." suffix=".nc"/>
                 </aggregation>
               </netcdf>"#,
        );
        let doc = parse_document(f.path()).unwrap();
        let agg = doc.aggregation.unwrap();
        assert_eq!(agg.agg_type, AggregationType::JoinExisting);
        assert_eq!(agg.members.len(), 2);
        assert_eq!(agg.scans.len(), 1);
    }
}
