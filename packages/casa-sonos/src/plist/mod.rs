//! XML property-list codec.
//!
//! Documents are parsed into a [`Value`] tree and mapped onto Rust types
//! through serde, so any `Serialize`/`Deserialize` type (with its
//! `#[serde(rename = "...")]` field names) can be read from or written to a
//! plist. Use [`Date`] for fields that must appear as `<date>`.

mod de;
mod error;
mod reader;
mod ser;
mod value;
mod writer;

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};

pub use error::{PlistError, PlistResult};
pub use reader::parse;
pub use value::{Date, Dictionary, Value};
pub use writer::write_document;

/// Converts any serializable value into a [`Value`] tree.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> PlistResult<Value> {
    value
        .serialize(ser::ValueSerializer)?
        .ok_or(PlistError::MissingRoot)
}

/// Maps a [`Value`] tree onto `T`, coercing scalars where needed.
pub fn from_value<T: DeserializeOwned>(value: Value) -> PlistResult<T> {
    T::deserialize(de::ValueDeserializer::new(value))
}

/// Encodes `value` as a complete property-list document.
pub fn to_string<T: Serialize + ?Sized>(value: &T) -> PlistResult<String> {
    Ok(write_document(&to_value(value)?))
}

/// Decodes a property-list document into `T`.
pub fn from_str<T: DeserializeOwned>(xml: &str) -> PlistResult<T> {
    from_value(parse(xml)?)
}

/// Decodes a document into an existing value, replacing it on success.
///
/// `target` is left untouched when decoding fails.
pub fn from_str_into<T: DeserializeOwned>(xml: &str, target: &mut T) -> PlistResult<()> {
    *target = from_str(xml)?;
    Ok(())
}

/// Like [`from_str`] for raw bytes; the document must be UTF-8.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> PlistResult<T> {
    let xml = std::str::from_utf8(bytes).map_err(|e| PlistError::Xml(e.to_string()))?;
    from_str(xml)
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Integer(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    serializer.serialize_i64(v)
                } else if let Ok(v) = u64::try_from(*i) {
                    serializer.serialize_u64(v)
                } else {
                    serializer.serialize_i128(*i)
                }
            }
            Self::Real(f) => serializer.serialize_f64(*f),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Date(dt) => Date(*dt).serialize(serializer),
            Self::Array(items) => serializer.collect_seq(items),
            Self::Dictionary(dict) => serializer.collect_map(dict.iter()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Entry {
        #[serde(rename = "Track ID")]
        id: i64,
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Genre", skip_serializing_if = "Option::is_none")]
        genre: Option<String>,
        #[serde(rename = "Loved", default)]
        loved: bool,
    }

    fn wrap(body: &str) -> String {
        format!("<plist version=\"1.0\">{body}</plist>")
    }

    #[test]
    fn struct_survives_a_document_round_trip() {
        let entry = Entry {
            id: 7,
            name: "Jeremy & co".into(),
            genre: None,
            loved: true,
        };
        let xml = to_string(&entry).unwrap();
        assert!(xml.contains("<key>Track ID</key>\n\t<integer>7</integer>"));
        assert!(xml.contains("Jeremy &amp; co"));
        assert!(!xml.contains("Genre"));

        let back: Entry = from_str(&xml).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn keys_match_fields_case_insensitively_and_extras_are_ignored() {
        let xml = wrap(
            "<dict>\
             <key>track id</key><integer>3</integer>\
             <key>NAME</key><string>Ten</string>\
             <key>Play Count</key><integer>99</integer>\
             </dict>",
        );
        let entry: Entry = from_str(&xml).unwrap();
        assert_eq!(entry.id, 3);
        assert_eq!(entry.name, "Ten");
        assert_eq!(entry.genre, None);
    }

    #[derive(Debug, Deserialize)]
    struct Scalars {
        a: i64,
        b: u8,
        c: f64,
        d: bool,
        e: String,
        f: i32,
    }

    #[test]
    fn scalars_are_coerced_between_kinds() {
        let xml = wrap(
            "<dict>\
             <key>a</key><string>42</string>\
             <key>b</key><real>7.9</real>\
             <key>c</key><integer>3</integer>\
             <key>d</key><string>T</string>\
             <key>e</key><integer>-5</integer>\
             <key>f</key><true/>\
             </dict>",
        );
        let s: Scalars = from_str(&xml).unwrap();
        assert_eq!(s.a, 42);
        assert_eq!(s.b, 7);
        assert_eq!(s.c, 3.0);
        assert!(s.d);
        assert_eq!(s.e, "-5");
        assert_eq!(s.f, 1);
    }

    #[test]
    fn integers_out_of_range_are_rejected() {
        let err = from_str::<u8>(&wrap("<integer>300</integer>")).unwrap_err();
        assert!(matches!(err, PlistError::InvalidScalar { kind: "u8", .. }));

        let err = from_str::<i64>(&wrap("<string>many</string>")).unwrap_err();
        assert!(matches!(err, PlistError::InvalidScalar { kind: "i64", .. }));
    }

    #[test]
    fn dates_convert_by_target_width() {
        let dt = Utc.with_ymd_and_hms(2015, 3, 1, 12, 0, 5).unwrap();
        let doc = wrap("<date>2015-03-01T12:00:05Z</date>");

        assert_eq!(from_str::<i64>(&doc).unwrap(), dt.timestamp_millis());
        assert_eq!(from_str::<u32>(&doc).unwrap() as i64, dt.timestamp());
        assert_eq!(from_str::<f64>(&doc).unwrap(), dt.timestamp() as f64);
        assert_eq!(from_str::<String>(&doc).unwrap(), "2015-03-01T12:00:05Z");
        assert_eq!(from_str::<Date>(&doc).unwrap(), Date(dt));

        let err = from_str::<bool>(&doc).unwrap_err();
        assert!(matches!(err, PlistError::IncompatibleType { from: "date", to: "bool" }));
    }

    #[test]
    fn date_fields_are_written_as_date_elements() {
        #[derive(Serialize)]
        struct Stamped {
            #[serde(rename = "Date")]
            date: Date,
        }
        let dt = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let xml = to_string(&Stamped { date: Date(dt) }).unwrap();
        assert!(xml.contains("<date>2020-01-02T03:04:05Z</date>"));
    }

    #[test]
    fn containers_do_not_coerce_into_scalars() {
        let err = from_str::<String>(&wrap("<array/>")).unwrap_err();
        assert!(matches!(err, PlistError::IncompatibleType { from: "array", to: "string" }));

        let err = from_str::<Vec<i64>>(&wrap("<dict/>")).unwrap_err();
        assert!(matches!(err, PlistError::IncompatibleType { from: "dict", to: "array" }));
    }

    #[test]
    fn numeric_map_keys_are_parsed() {
        let xml = wrap(
            "<dict>\
             <key>2</key><string>two</string>\
             <key>10</key><string>ten</string>\
             </dict>",
        );
        let map: BTreeMap<i64, String> = from_str(&xml).unwrap();
        assert_eq!(map.get(&2).map(String::as_str), Some("two"));
        assert_eq!(map.get(&10).map(String::as_str), Some("ten"));
    }

    #[test]
    fn bool_map_keys_round_trip() {
        let mut map = std::collections::HashMap::new();
        map.insert(true, "on".to_string());
        map.insert(false, "off".to_string());

        let xml = to_string(&map).unwrap();
        assert!(xml.contains("<key>true</key>"));
        assert!(xml.contains("<key>false</key>"));

        let back: std::collections::HashMap<bool, String> = from_str(&xml).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn failed_decode_leaves_target_untouched() {
        let mut n: i64 = 5;
        assert!(from_str_into(&wrap("<array/>"), &mut n).is_err());
        assert_eq!(n, 5);
        from_str_into(&wrap("<integer>8</integer>"), &mut n).unwrap();
        assert_eq!(n, 8);
    }

    #[test]
    fn value_trees_pass_through_unchanged() {
        let xml = wrap(
            "<dict><key>k</key><array><real>1.5</real><false/></array></dict>",
        );
        let value = parse(&xml).unwrap();
        assert_eq!(to_value(&value).unwrap(), value);
    }
}
