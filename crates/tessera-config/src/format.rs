//! Record file formats: detection, discovery and parsing.
//!
//! A record source is an ordered sequence of maps. It can be written as:
//!
//! - **JSON**: a top-level array, or an object with a `records` array.
//! - **RON**: a top-level list of structs or maps, e.g.
//!   `[(id: "a", hp: 10)]` or `[{"id": "a", "hp": 10}]`. Struct names are
//!   ignored and field names become string keys.
//! - **TOML**: an array of tables under `records` (`[[records]]`).
//!
//! Parsing stops at the sequence level and hands back raw
//! [`serde_json::Value`]s; per-record validation happens in
//! [`crate::record`], so one bad record never sinks the rest of the file.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::ConfigError;

/// Supported record file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Ron,
    Toml,
}

impl Format {
    /// Extensions probed by [`find_record_file`], in probe order.
    pub const EXTENSIONS: [&'static str; 3] = ["json", "ron", "toml"];

    /// Map a lowercase file extension to its format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Format::Json),
            "ron" => Some(Format::Ron),
            "toml" => Some(Format::Toml),
            _ => None,
        }
    }
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, ConfigError> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(Format::from_extension)
        .ok_or_else(|| ConfigError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

/// Look in `dir` for `{stem}.json`, `{stem}.ron` or `{stem}.toml`.
///
/// Returns `Ok(None)` when none exists and
/// [`ConfigError::ConflictingFormats`] when more than one does.
pub fn find_record_file(dir: &Path, stem: &str) -> Result<Option<PathBuf>, ConfigError> {
    let mut found: Option<PathBuf> = None;
    for ext in Format::EXTENSIONS {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            if let Some(existing) = found {
                return Err(ConfigError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

/// Parse `text` into the raw sequence of record values.
pub fn parse_sequence(format: Format, text: &str, label: &str) -> Result<Vec<Value>, ConfigError> {
    let parse_err = |detail: String| ConfigError::Parse {
        source_label: label.to_owned(),
        detail,
    };

    let value: Value = match format {
        Format::Json => serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?,
        Format::Ron => {
            // Through ron::Value: struct field names only deserialize as
            // identifiers, which serde_json's map visitor does not ask for.
            let value = text
                .parse::<ron::Value>()
                .map_err(|e| parse_err(e.to_string()))?;
            ron_to_json(value)
        }
        Format::Toml => {
            let table: toml::Table = toml::from_str(text).map_err(|e| parse_err(e.to_string()))?;
            serde_json::to_value(table).map_err(|e| parse_err(e.to_string()))?
        }
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(parse_err("'records' must be an array".to_owned())),
            None if map.is_empty() => Ok(Vec::new()),
            None => Err(parse_err("expected an array or a 'records' array".to_owned())),
        },
        _ => Err(parse_err("expected a sequence of records".to_owned())),
    }
}

/// Convert a RON value into the JSON value model. Non-string map keys are
/// written in RON syntax; unit and `None` become `null`.
fn ron_to_json(value: ron::Value) -> Value {
    match value {
        ron::Value::Bool(b) => Value::Bool(b),
        ron::Value::Char(c) => Value::String(c.to_string()),
        ron::Value::String(s) => Value::String(s),
        ron::Value::Number(ron::Number::Integer(i)) => Value::from(i),
        ron::Value::Number(ron::Number::Float(f)) => serde_json::Number::from_f64(f.get())
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ron::Value::Option(inner) => inner.map_or(Value::Null, |v| ron_to_json(*v)),
        ron::Value::Seq(items) => Value::Array(items.into_iter().map(ron_to_json).collect()),
        ron::Value::Map(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (ron_key(key), ron_to_json(value)))
                .collect(),
        ),
        ron::Value::Unit => Value::Null,
    }
}

fn ron_key(key: ron::Value) -> String {
    match key {
        ron::Value::String(s) => s,
        ron::Value::Char(c) => c.to_string(),
        other => ron::to_string(&other).unwrap_or_default(),
    }
}

/// Read a file and parse it according to its extension.
pub fn read_sequence(path: &Path) -> Result<Vec<Value>, ConfigError> {
    let format = detect_format(path)?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sequence(format, &text, &path.display().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_by_extension() {
        assert_eq!(detect_format(Path::new("a/b.json")).unwrap(), Format::Json);
        assert_eq!(detect_format(Path::new("b.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("b.toml")).unwrap(), Format::Toml);
        assert!(matches!(
            detect_format(Path::new("b.yaml")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn json_array_and_wrapped_forms() {
        let bare = parse_sequence(Format::Json, r#"[{"id":"a"}]"#, "t").unwrap();
        let wrapped = parse_sequence(Format::Json, r#"{"records":[{"id":"a"}]}"#, "t").unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare, vec![json!({"id": "a"})]);
    }

    #[test]
    fn ron_list_of_maps() {
        let items = parse_sequence(
            Format::Ron,
            r#"[{"id": "slime", "hp": 4, "boss": false}]"#,
            "t",
        )
        .unwrap();
        assert_eq!(items, vec![json!({"id": "slime", "hp": 4, "boss": false})]);
    }

    #[test]
    fn ron_list_of_structs() {
        let text = r#"[
            (id: "slime", hp: 4, speed: 1.5, drops: ["gel"], boss: false),
            Enemy(id: "bat", hp: 2, sprite: Some("res://bat.png"), tags: ()),
        ]"#;
        let items = parse_sequence(Format::Ron, text, "t").unwrap();
        assert_eq!(
            items,
            vec![
                json!({"id": "slime", "hp": 4, "speed": 1.5, "drops": ["gel"], "boss": false}),
                json!({"id": "bat", "hp": 2, "sprite": "res://bat.png", "tags": null}),
            ]
        );
    }

    #[test]
    fn ron_struct_records_feed_the_record_parser() {
        let items = parse_sequence(Format::Ron, r#"[(id: "a", hp: 10)]"#, "t").unwrap();
        let (records, errors) = crate::record::parse_records(items, "base");
        assert!(errors.is_empty());
        assert_eq!(records[0].id(), "a");
        assert_eq!(records[0].get_i64("hp"), Some(10));
    }

    #[test]
    fn toml_array_of_tables() {
        let text = r#"
            [[records]]
            id = "a"
            hp = 10

            [[records]]
            id = "b"
            speed = 1.5
        "#;
        let items = parse_sequence(Format::Toml, text, "t").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["hp"], json!(10));
        assert_eq!(items[1]["speed"], json!(1.5));
    }

    #[test]
    fn scalar_top_level_is_a_parse_error() {
        let err = parse_sequence(Format::Json, "42", "numbers.json").unwrap_err();
        assert!(err.to_string().contains("numbers.json"));
    }

    #[test]
    fn empty_toml_is_an_empty_sequence() {
        assert!(parse_sequence(Format::Toml, "", "t").unwrap().is_empty());
    }
}
