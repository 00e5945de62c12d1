//! Event-driven XML interpreter, wrapping `quick-xml`'s pull-based `Reader`
//! in the onStart/onEnd/onCharacters callback shape a SAX handler presents
//! to its element tree. `quick-xml` fits here over a DOM parser because the
//! document tree builder wants push-style callbacks as elements stream
//! past, not a materialised tree to walk afterwards.
//!
//! Deferred-error semantics: once a callback returns `Err`, that error is
//! stashed and every subsequent callback is skipped (not merely the
//! remainder of the current element) until the document ends, at which
//! point the stashed error is returned. This mirrors the original parser's
//! habit of finishing the SAX pass even after the first semantic error, so
//! a single malformed `<netcdf>` can't leave file handles or XML parser
//! state half-consumed.

pub mod otherxml;

use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{AggError, AggResult};

/// One attribute as it appeared on the start tag, in document order.
pub type Attr = (String, String);

/// The callback surface the document element tree implements. Default
/// methods make "I don't care about characters" the
/// common case, matching how little text content NcML's own elements
/// actually carry.
pub trait Sink {
    fn on_start_document(&mut self) {}
    fn on_end_document(&mut self) {}
    fn on_start_element(&mut self, name: &str, attrs: &[Attr], line: u64) -> AggResult<()>;
    fn on_end_element(&mut self, name: &str, line: u64) -> AggResult<()>;
    fn on_characters(&mut self, _text: &str, _line: u64) -> AggResult<()> {
        Ok(())
    }
    fn on_warning(&mut self, _message: &str, _line: u64) {}
}

fn line_at(content: &str, byte_pos: usize) -> u64 {
    1 + content.as_bytes()[..byte_pos.min(content.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count() as u64
}

/// Parse `path` against `sink`, dispatching every element/text event in
/// document order. On the first callback error, dispatch is suppressed for
/// the rest of the document but the scan continues to completion so the
/// reader's own buffers are fully drained; the stashed error is what this
/// function ultimately returns.
pub fn parse<S: Sink>(path: &Path, sink: &mut S) -> AggResult<()> {
    let content = fs::read_to_string(path)
        .map_err(|e| AggError::parse(format!("cannot read {}: {}", path.display(), e)))?;

    let mut reader = Reader::from_str(&content);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut deferred: Option<AggError> = None;

    sink.on_start_document();

    loop {
        let pos = reader.buffer_position();
        let line = line_at(&content, pos);

        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                if deferred.is_some() {
                    continue;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = Vec::new();
                for a in e.attributes() {
                    let a = match a {
                        Ok(a) => a,
                        Err(err) => {
                            deferred = Some(AggError::parse_at(err.to_string(), path, line));
                            break;
                        }
                    };
                    let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                    let value = a
                        .decode_and_unescape_value(&reader)
                        .unwrap_or_default()
                        .into_owned();
                    attrs.push((key, value));
                }
                if deferred.is_none() {
                    if let Err(e) = sink.on_start_element(&name, &attrs, line) {
                        deferred = Some(e);
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if deferred.is_some() {
                    continue;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = Vec::new();
                for a in e.attributes().flatten() {
                    let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                    let value = a
                        .decode_and_unescape_value(&reader)
                        .unwrap_or_default()
                        .into_owned();
                    attrs.push((key, value));
                }
                if let Err(e) = sink.on_start_element(&name, &attrs, line) {
                    deferred = Some(e);
                } else if let Err(e) = sink.on_end_element(&name, line) {
                    deferred = Some(e);
                }
            }
            Ok(Event::End(e)) => {
                if deferred.is_some() {
                    continue;
                }
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if let Err(e) = sink.on_end_element(&name, line) {
                    deferred = Some(e);
                }
            }
            Ok(Event::Text(e)) => {
                if deferred.is_some() {
                    continue;
                }
                let text = e.unescape().unwrap_or_default().into_owned();
                if !text.trim().is_empty() {
                    if let Err(e) = sink.on_characters(&text, line) {
                        deferred = Some(e);
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                deferred = Some(AggError::parse_at(err.to_string(), path, line));
                break;
            }
        }

        buf.clear();
    }

    sink.on_end_document();

    match deferred {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        starts: RefCell<Vec<String>>,
        ends: RefCell<Vec<String>>,
        fail_on: Option<String>,
    }

    impl Sink for Recorder {
        fn on_start_element(&mut self, name: &str, _attrs: &[Attr], _line: u64) -> AggResult<()> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(AggError::parse(format!("refusing {}", name)));
            }
            self.starts.borrow_mut().push(name.to_string());
            Ok(())
        }

        fn on_end_element(&mut self, name: &str, _line: u64) -> AggResult<()> {
            self.ends.borrow_mut().push(name.to_string());
            Ok(())
        }
    }

    fn write_fixture(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn dispatches_nested_elements_in_order() {
        let f = write_fixture(
            r#"<netcdf><variable name="time"><attribute name="units" value="s"/></variable></netcdf>"#,
        );
        let mut sink = Recorder::default();
        parse(f.path(), &mut sink).unwrap();
        assert_eq!(
            *sink.starts.borrow(),
            vec!["netcdf", "variable", "attribute"]
        );
        assert_eq!(*sink.ends.borrow(), vec!["attribute", "variable", "netcdf"]);
    }

    #[test]
    fn error_is_deferred_until_document_ends() {
        let f = write_fixture(
            r#"<netcdf><variable name="bad"><attribute name="units" value="s"/></variable><dimension name="time" length="3"/></netcdf>"#,
        );
        let mut sink = Recorder {
            fail_on: Some("attribute".to_string()),
            ..Default::default()
        };
        let err = parse(f.path(), &mut sink).unwrap_err();
        assert!(matches!(err, AggError::Parse { .. }));
        // nothing after the failing element's siblings got dispatched
        assert_eq!(*sink.starts.borrow(), vec!["netcdf", "variable"]);
    }
}
