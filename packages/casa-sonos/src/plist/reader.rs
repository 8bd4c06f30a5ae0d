//! Property-list XML → [`Value`] tree.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::error::{PlistError, PlistResult};
use super::value::{parse_date, Dictionary, Value};

type XmlReader<'a> = Reader<&'a [u8]>;

/// Parses a property-list document into a value tree.
///
/// Accepts either a full document with a `<plist>` root or a bare value
/// element (`<dict>…</dict>`).
pub fn parse(xml: &str) -> PlistResult<Value> {
    let mut reader = Reader::from_str(xml);
    // Mismatched closing tags are reported as `TagMismatch` below.
    reader.config_mut().check_end_names = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = element_name(&e);
                if name == "plist" {
                    return read_plist_body(&mut reader);
                }
                return read_element(&mut reader, &name, false);
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                if name == "plist" {
                    return Err(PlistError::MissingRoot);
                }
                return read_element(&mut reader, &name, true);
            }
            Event::Eof => return Err(PlistError::MissingRoot),
            _ => {}
        }
    }
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn unexpected_eof(inside: &str) -> PlistError {
    PlistError::Xml(format!("unexpected end of document inside <{inside}>"))
}

fn read_plist_body(reader: &mut XmlReader) -> PlistResult<Value> {
    let mut value = None;
    loop {
        let (name, empty) = match reader.read_event()? {
            Event::Start(e) => (element_name(&e), false),
            Event::Empty(e) => (element_name(&e), true),
            Event::End(e) => {
                let found = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if found != "plist" {
                    return Err(PlistError::TagMismatch {
                        expected: "plist".into(),
                        found,
                    });
                }
                return value.ok_or(PlistError::MissingRoot);
            }
            Event::Eof => return Err(unexpected_eof("plist")),
            _ => continue,
        };
        if value.is_some() {
            return Err(PlistError::TagNotAllowed(name));
        }
        value = Some(read_element(reader, &name, empty)?);
    }
}

/// Reads the element whose start tag (`name`) has just been consumed.
fn read_element(reader: &mut XmlReader, name: &str, empty: bool) -> PlistResult<Value> {
    match name {
        "dict" if empty => Ok(Value::Dictionary(Dictionary::new())),
        "dict" => read_dict(reader),
        "array" if empty => Ok(Value::Array(Vec::new())),
        "array" => read_array(reader),
        "true" | "false" => {
            if !empty {
                let rest = read_text(reader, name)?;
                if !rest.trim().is_empty() {
                    return Err(PlistError::InvalidScalar {
                        kind: "boolean",
                        value: rest,
                    });
                }
            }
            Ok(Value::Boolean(name == "true"))
        }
        "string" | "integer" | "real" | "date" => {
            let text = if empty {
                String::new()
            } else {
                read_text(reader, name)?
            };
            scalar(name, text)
        }
        "key" => Err(PlistError::TagNotAllowed(name.to_string())),
        other => Err(PlistError::UnknownTag(other.to_string())),
    }
}

fn scalar(tag: &str, text: String) -> PlistResult<Value> {
    match tag {
        "integer" => text
            .trim()
            .parse::<i128>()
            .map(Value::Integer)
            .map_err(|_| PlistError::InvalidScalar {
                kind: "integer",
                value: text,
            }),
        "real" => text
            .trim()
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| PlistError::InvalidScalar {
                kind: "real",
                value: text,
            }),
        "date" => parse_date(&text)
            .map(Value::Date)
            .ok_or(PlistError::InvalidScalar {
                kind: "date",
                value: text,
            }),
        _ => Ok(Value::String(text)),
    }
}

fn read_dict(reader: &mut XmlReader) -> PlistResult<Value> {
    let mut dict = Dictionary::new();
    let mut key: Option<String> = None;

    loop {
        let (name, empty) = match reader.read_event()? {
            Event::Start(e) => (element_name(&e), false),
            Event::Empty(e) => (element_name(&e), true),
            Event::End(e) => {
                let found = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if found != "dict" {
                    return Err(PlistError::TagMismatch {
                        expected: "dict".into(),
                        found,
                    });
                }
                return Ok(Value::Dictionary(dict));
            }
            Event::Eof => return Err(unexpected_eof("dict")),
            _ => continue,
        };

        if name == "key" {
            key = Some(if empty {
                String::new()
            } else {
                read_text(reader, "key")?
            });
            continue;
        }

        let Some(k) = key.take() else {
            return Err(PlistError::TagNotAllowed(name));
        };
        let value = read_element(reader, &name, empty)?;
        dict.insert(k, value);
    }
}

fn read_array(reader: &mut XmlReader) -> PlistResult<Value> {
    let mut items = Vec::new();

    loop {
        let (name, empty) = match reader.read_event()? {
            Event::Start(e) => (element_name(&e), false),
            Event::Empty(e) => (element_name(&e), true),
            Event::End(e) => {
                let found = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if found != "array" {
                    return Err(PlistError::TagMismatch {
                        expected: "array".into(),
                        found,
                    });
                }
                return Ok(Value::Array(items));
            }
            Event::Eof => return Err(unexpected_eof("array")),
            _ => continue,
        };
        items.push(read_element(reader, &name, empty)?);
    }
}

/// Collects the text content of a scalar element up to its closing tag.
fn read_text(reader: &mut XmlReader, name: &str) -> PlistResult<String> {
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Text(t) => text.push_str(&unescape_xml(&String::from_utf8_lossy(&t))?),
            Event::GeneralRef(r) => {
                let entity = format!("&{};", String::from_utf8_lossy(&r));
                text.push_str(&unescape_xml(&entity)?);
            }
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::Start(e) | Event::Empty(e) => {
                return Err(PlistError::TagNotAllowed(element_name(&e)));
            }
            Event::End(e) => {
                let found = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if found != name {
                    return Err(PlistError::TagMismatch {
                        expected: name.to_string(),
                        found,
                    });
                }
                return Ok(text);
            }
            Event::Eof => return Err(unexpected_eof(name)),
            _ => {}
        }
    }
}

/// Resolves the XML predefined entities and character references only.
fn unescape_xml(raw: &str) -> PlistResult<String> {
    quick_xml::escape::unescape(raw)
        .map(|text| text.into_owned())
        .map_err(|e| PlistError::Xml(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_only_entities_are_rejected() {
        assert!(matches!(
            parse("<string>a&nbsp;b</string>"),
            Err(PlistError::Xml(_))
        ));
        assert_eq!(
            parse("<string>a&amp;b &#65;&lt;</string>").unwrap(),
            Value::String("a&b A<".into())
        );
    }

    #[test]
    fn parses_nested_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>Name</key>
	<string>Rock &amp; Roll</string>
	<key>Count</key>
	<integer>3</integer>
	<key>Ratio</key>
	<real>0.5</real>
	<key>Enabled</key>
	<true/>
	<key>Items</key>
	<array>
		<integer>1</integer>
		<string/>
	</array>
</dict>
</plist>"#;
        let value = parse(xml).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert_eq!(dict.get("Name"), Some(&Value::String("Rock & Roll".into())));
        assert_eq!(dict.get("Count"), Some(&Value::Integer(3)));
        assert_eq!(dict.get("Ratio"), Some(&Value::Real(0.5)));
        assert_eq!(dict.get("Enabled"), Some(&Value::Boolean(true)));
        assert_eq!(
            dict.get("Items").and_then(Value::as_array),
            Some(&[Value::Integer(1), Value::String(String::new())][..])
        );
    }

    #[test]
    fn mismatched_close_tag_is_reported() {
        let err = parse("<plist><dict><key>a</key><string>x</integer></dict></plist>").unwrap_err();
        assert!(matches!(
            err,
            PlistError::TagMismatch { ref expected, ref found }
                if expected == "string" && found == "integer"
        ));
    }

    #[test]
    fn nested_element_inside_scalar_is_rejected() {
        let err = parse("<plist><string>a<dict/></string></plist>").unwrap_err();
        assert!(matches!(err, PlistError::TagNotAllowed(ref t) if t == "dict"));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse("<plist><data>AAAA</data></plist>").unwrap_err();
        assert!(matches!(err, PlistError::UnknownTag(ref t) if t == "data"));
    }

    #[test]
    fn value_without_key_is_rejected() {
        let err = parse("<plist><dict><string>orphan</string></dict></plist>").unwrap_err();
        assert!(matches!(err, PlistError::TagNotAllowed(ref t) if t == "string"));
    }

    #[test]
    fn bad_integer_text_is_invalid_scalar() {
        let err = parse("<plist><integer>twelve</integer></plist>").unwrap_err();
        assert!(matches!(err, PlistError::InvalidScalar { kind: "integer", .. }));
    }

    #[test]
    fn empty_document_has_no_root() {
        assert!(matches!(parse("   "), Err(PlistError::MissingRoot)));
        assert!(matches!(parse("<plist></plist>"), Err(PlistError::MissingRoot)));
    }
}
