use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

const ATTR_PREFIX: &str = "@";
const TEXT_KEY: &str = "#text";

struct Element {
    name: String,
    attrs: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Element {
    fn start(start: &BytesStart<'_>) -> crate::Result<Element> {
        let mut attrs = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| invalid(err.into()))?;
            let key = format!("{}{}", ATTR_PREFIX, String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr.unescape_value().map_err(invalid)?;
            attrs.insert(key, Value::String(value.into_owned()));
        }

        Ok(Element {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            children: Map::new(),
            text: String::new(),
        })
    }

    /// Text-only elements become strings, everything else an object.
    fn into_value(self) -> Value {
        if self.attrs.is_empty() && self.children.is_empty() {
            return Value::String(self.text);
        }

        let mut object = self.attrs;
        object.extend(self.children);
        if !self.text.is_empty() {
            object.insert(TEXT_KEY.to_owned(), Value::String(self.text));
        }
        Value::Object(object)
    }
}

/// Adds a child, turning repeated names into arrays.
fn push_child(children: &mut Map<String, Value>, name: String, value: Value) {
    match children.get_mut(&name) {
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            children.insert(name, value);
        }
    }
}

/// Deepest element nesting accepted, the same bound serde_json applies to
/// JSON bodies.
const MAX_DEPTH: usize = 128;

fn invalid(err: quick_xml::Error) -> crate::Error {
    crate::Error::upload_caused_by("invalid XML body", err)
}

/// Parses an XML body into a JSON tree keyed by the root element name.
///
/// Attributes are stored as `@name`, text next to child elements as
/// `#text`. An empty body is an empty object.
pub(crate) fn parse(body: &[u8]) -> crate::Result<Value> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut root = Map::new();
    let mut stack: Vec<Element> = Vec::new();

    loop {
        match reader.read_event().map_err(invalid)? {
            Event::Start(start) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(crate::Error::upload("invalid XML body: nesting too deep"));
                }
                stack.push(Element::start(&start)?);
            }
            Event::Empty(start) => {
                let element = Element::start(&start)?;
                let name = element.name.clone();
                let parent = stack.last_mut().map_or(&mut root, |parent| &mut parent.children);
                push_child(parent, name, element.into_value());
            }
            Event::End(_) => {
                let element = match stack.pop() {
                    Some(element) => element,
                    None => return Err(crate::Error::upload("invalid XML body: unexpected closing tag")),
                };
                let name = element.name.clone();
                let parent = stack.last_mut().map_or(&mut root, |parent| &mut parent.children);
                push_child(parent, name, element.into_value());
            }
            Event::Text(text) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&text.unescape().map_err(invalid)?);
                }
            }
            Event::CData(data) => {
                if let Some(element) = stack.last_mut() {
                    element.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(crate::Error::upload("invalid XML body: unexpected end of document"));
    }

    Ok(Value::Object(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tree() {
        let body = br#"<?xml version="1.0"?>
            <order id="7">
                <item sku="a1">Pen</item>
                <item sku="b2">Ink &amp; nib</item>
                <note><![CDATA[fragile <glass>]]></note>
                <gift/>
            </order>"#;

        assert_eq!(
            parse(body).unwrap(),
            json!({
                "order": {
                    "@id": "7",
                    "item": [
                        {"@sku": "a1", "#text": "Pen"},
                        {"@sku": "b2", "#text": "Ink & nib"}
                    ],
                    "note": "fragile <glass>",
                    "gift": ""
                }
            })
        );
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(parse(b"").unwrap(), json!({}));
    }

    #[test]
    fn test_nesting_depth() {
        let nested = |depth: usize| format!("{}{}", "<a>".repeat(depth), "</a>".repeat(depth));

        assert!(parse(nested(MAX_DEPTH).as_bytes()).is_ok());

        let err = parse(nested(100_000).as_bytes()).unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Upload);
        assert_eq!(err.to_string(), "invalid XML body: nesting too deep");
    }

    #[test]
    fn test_malformed() {
        let err = parse(b"<a><b></a>").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Upload);

        assert!(parse(b"<a><b></b>").is_err());
    }
}
