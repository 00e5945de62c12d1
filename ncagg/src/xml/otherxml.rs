//! Transient sink that reconstructs the raw XML of an `otherXML` attribute
//! value. Installed as the active sink the moment an `<attribute>` element
//! declares itself `otherXML`, and torn back down once its matching end tag
//! is seen.

use crate::xml::{Attr, Sink};
use crate::{AggError, AggResult};

/// Buffers every event between an `otherXML` attribute's start tag and its
/// matching end tag, re-serialising them into the attribute's string value.
pub struct OtherXmlCapture {
    depth: u32,
    buf: String,
}

impl OtherXmlCapture {
    pub fn new() -> OtherXmlCapture {
        OtherXmlCapture {
            depth: 0,
            buf: String::new(),
        }
    }

    /// Call once the capture is no longer needed, consuming it into the
    /// captured (already well-formed) XML fragment.
    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for OtherXmlCapture {
    fn default() -> OtherXmlCapture {
        OtherXmlCapture::new()
    }
}

impl Sink for OtherXmlCapture {
    fn on_start_element(&mut self, name: &str, attrs: &[Attr], _line: u64) -> AggResult<()> {
        self.depth += 1;
        self.buf.push('<');
        self.buf.push_str(name);
        for (k, v) in attrs {
            self.buf.push(' ');
            self.buf.push_str(k);
            self.buf.push_str("=\"");
            self.buf.push_str(&v.replace('"', "&quot;"));
            self.buf.push('"');
        }
        self.buf.push('>');
        Ok(())
    }

    fn on_end_element(&mut self, name: &str, _line: u64) -> AggResult<()> {
        if self.depth == 0 {
            // The host's dispatcher should never let this fire: it owns
            // recognising the enclosing attribute's own end tag before it
            // ever reaches us. If it does, the capture and the real
            // document have gone out of sync and nothing downstream can be
            // trusted.
            return Err(AggError::internal(
                "otherXML capture underflowed its own nesting",
            ));
        }
        self.depth -= 1;
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
        Ok(())
    }

    fn on_characters(&mut self, text: &str, _line: u64) -> AggResult<()> {
        self.buf.push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconstructs_nested_markup() {
        let mut cap = OtherXmlCapture::new();
        cap.on_start_element("gml:Point", &[("srsName".to_string(), "EPSG:4326".to_string())], 1)
            .unwrap();
        cap.on_start_element("gml:coordinates", &[], 1).unwrap();
        cap.on_characters("60.0,5.0", 1).unwrap();
        cap.on_end_element("gml:coordinates", 1).unwrap();
        cap.on_end_element("gml:Point", 1).unwrap();

        assert_eq!(
            cap.finish(),
            r#"<gml:Point srsName="EPSG:4326"><gml:coordinates>60.0,5.0</gml:coordinates></gml:Point>"#
        );
    }

    #[test]
    fn underflow_is_an_internal_error() {
        let mut cap = OtherXmlCapture::new();
        assert!(cap.on_end_element("x", 1).is_err());
    }
}
