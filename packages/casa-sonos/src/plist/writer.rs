//! [`Value`] tree → property-list XML.

use super::value::{format_date, Value};

const HEADER: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
    "<!DOCTYPE plist PUBLIC \"-//Apple Computer//DTD PLIST 1.0//EN\" ",
    "\"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
    "<plist version=\"1.0\">\n",
);

/// Renders a complete document around `value`.
pub fn write_document(value: &Value) -> String {
    let mut out = String::from(HEADER);
    write_value(&mut out, value, 0);
    out.push_str("</plist>\n");
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    indent(out, depth);
    match value {
        Value::String(s) => {
            out.push_str("<string>");
            out.push_str(&html_escape::encode_text(s));
            out.push_str("</string>\n");
        }
        Value::Integer(i) => out.push_str(&format!("<integer>{i}</integer>\n")),
        Value::Real(f) => out.push_str(&format!("<real>{f}</real>\n")),
        Value::Boolean(true) => out.push_str("<true/>\n"),
        Value::Boolean(false) => out.push_str("<false/>\n"),
        Value::Date(dt) => out.push_str(&format!("<date>{}</date>\n", format_date(dt))),
        Value::Array(items) if items.is_empty() => out.push_str("<array/>\n"),
        Value::Array(items) => {
            out.push_str("<array>\n");
            for item in items {
                write_value(out, item, depth + 1);
            }
            indent(out, depth);
            out.push_str("</array>\n");
        }
        Value::Dictionary(dict) if dict.is_empty() => out.push_str("<dict/>\n"),
        Value::Dictionary(dict) => {
            out.push_str("<dict>\n");
            for (key, item) in dict.iter() {
                indent(out, depth + 1);
                out.push_str("<key>");
                out.push_str(&html_escape::encode_text(key));
                out.push_str("</key>\n");
                write_value(out, item, depth + 1);
            }
            indent(out, depth);
            out.push_str("</dict>\n");
        }
    }
}
