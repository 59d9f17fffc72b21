//! Minimal JSON-value ⇄ XML bridge used for `api` components whose body or
//! response is XML.
//!
//! Ported in spirit from `tools/xml.go`'s `ToXmlString`/`XmlToAny`: encoding
//! wraps the value under one synthetic root element; decoding parses back
//! into a map and, since the root always produces exactly one top-level
//! key, unwraps it to recover the original value.

use crate::errors::EngineError;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use serde_json::{Map, Value};
use std::io::Cursor;

pub fn value_to_xml(value: &Value, root: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    write_element(&mut writer, root, value);
    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, value: &Value) {
    let start = BytesStart::new(tag);
    match value {
        Value::Object(map) => {
            writer.write_event(Event::Start(start.clone())).ok();
            for (k, v) in map {
                write_element(writer, k, v);
            }
            writer.write_event(Event::End(BytesEnd::new(tag))).ok();
        }
        Value::Array(items) => {
            for item in items {
                write_element(writer, tag, item);
            }
        }
        Value::Null => {
            writer.write_event(Event::Empty(start)).ok();
        }
        scalar => {
            writer.write_event(Event::Start(start.clone())).ok();
            let text = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writer.write_event(Event::Text(BytesText::new(&text))).ok();
            writer.write_event(Event::End(BytesEnd::new(tag))).ok();
        }
    }
}

/// Parses an XML document into a JSON value, then unwraps the single
/// top-level root key (mirrors `XmlToAny`'s `len(*m) == 1` unwrap).
pub fn xml_to_value(xml: &str) -> Result<Value, EngineError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| EngineError::Request(format!("invalid xml: {e}")))?
        {
            Event::Start(start) => {
                let tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let value = parse_body(&mut reader, &tag)
                    .map_err(|e| EngineError::Request(format!("invalid xml: {e}")))?;
                return Ok(value);
            }
            Event::Eof => return Ok(Value::Null),
            _ => {}
        }
    }
}

/// Parses the content of an already-opened element up to its matching
/// close tag, returning the element's own value (text if leaf, object if
/// it had children; repeated child tags collapse into an array).
fn parse_body(reader: &mut Reader<&[u8]>, tag: &str) -> Result<Value, quick_xml::Error> {
    let mut text = String::new();
    let mut children: Map<String, Value> = Map::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => {
                let child_tag = String::from_utf8_lossy(start.name().as_ref()).to_string();
                let value = parse_body(reader, &child_tag)?;
                insert_merging(&mut children, child_tag, value);
            }
            Event::Empty(_) => {
                // Self-closing child: treat as an empty string leaf.
            }
            Event::Text(t) => text.push_str(&t.unescape().unwrap_or_default()),
            Event::End(e) if e.name().as_ref() == tag.as_bytes() => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(if children.is_empty() {
        Value::String(text.trim().to_string())
    } else {
        Value::Object(children)
    })
}

fn insert_merging(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.remove(&name) {
        None => {
            map.insert(name, value);
        }
        Some(Value::Array(mut items)) => {
            items.push(value);
            map.insert(name, Value::Array(items));
        }
        Some(existing) => {
            map.insert(name, Value::Array(vec![existing, value]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_a_flat_object() {
        let original = json!({"id": "42", "name": "a"});
        let xml = value_to_xml(&original, "xml");
        let decoded = xml_to_value(&xml).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn round_trips_nested_objects() {
        let original = json!({"user": {"id": "1"}});
        let xml = value_to_xml(&original, "xml");
        let decoded = xml_to_value(&xml).unwrap();
        assert_eq!(decoded["user"]["id"], json!("1"));
    }

    #[test]
    fn repeated_sibling_tags_collapse_into_array() {
        let xml = "<xml><item>a</item><item>b</item></xml>";
        let decoded = xml_to_value(xml).unwrap();
        assert_eq!(decoded["item"], json!(["a", "b"]));
    }
}
