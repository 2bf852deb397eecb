//! Configuration records.
//!
//! A [`ConfigRecord`] is a string `id` plus a map of typed fields. Records are
//! produced by [`parse_records`] from a raw sequence; anything that is not a
//! map with a non-empty string `id` is skipped and reported as
//! [`ConfigError::MalformedRecord`].
//!
//! String fields using the `res://` scheme, at any nesting depth, are
//! resource paths. They stay plain strings in the record and are resolved
//! lazily by the [`ConfigurationStore`](crate::store::ConfigurationStore).

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::ConfigError;

/// Scheme prefix marking a string field as a resource path.
pub const RESOURCE_SCHEME: &str = "res://";

// ---------------------------------------------------------------------------
// ResourcePath
// ---------------------------------------------------------------------------

/// A `res://` path to something the host can load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    /// `Some` if `raw` uses the resource scheme and names something.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(RESOURCE_SCHEME)?;
        if rest.is_empty() {
            return None;
        }
        Some(Self(raw.to_owned()))
    }

    /// The full path including the scheme.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after `res://`.
    pub fn relative(&self) -> &str {
        &self.0[RESOURCE_SCHEME.len()..]
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ConfigRecord
// ---------------------------------------------------------------------------

/// One named configuration entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRecord {
    id: String,
    fields: Map<String, Value>,
    layer: String,
}

impl ConfigRecord {
    /// Build a record. `fields` should include `id`.
    pub fn new(id: impl Into<String>, fields: Map<String, Value>, layer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields,
            layer: layer.into(),
        }
    }

    /// The unique record id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name of the layer this record resolved from.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// All fields except `id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Raw access to a top-level field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// `name` as a string, if it is one.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.field(name)?.as_str()
    }

    /// `name` as an integer. Float values such as `10.0` do not convert.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.field(name)?.as_i64()
    }

    /// Integers are widened, so `hp: 10` reads as `10.0`.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.field(name)?.as_f64()
    }

    /// `name` as a bool, if it is one.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.field(name)?.as_bool()
    }

    /// Read a field as `T`, falling back to `default` when it is missing or
    /// has the wrong shape.
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.field(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(default)
    }

    /// Deserialize the whole record (with `id` included) into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        let mut map = self.fields.clone();
        map.insert("id".to_owned(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::Field {
            id: self.id.clone(),
            detail: e.to_string(),
        })
    }

    /// Every resource-path field, keyed by dotted path (`sprite.frames.0`).
    pub fn resource_fields(&self) -> Vec<(String, ResourcePath)> {
        let mut found = Vec::new();
        for (name, value) in &self.fields {
            collect_resources(name, value, &mut found);
        }
        found
    }
}

fn collect_resources(path: &str, value: &Value, out: &mut Vec<(String, ResourcePath)>) {
    match value {
        Value::String(s) => {
            if let Some(resource) = ResourcePath::parse(s) {
                out.push((path.to_owned(), resource));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_resources(&format!("{path}.{i}"), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_resources(&format!("{path}.{key}"), item, out);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Turn a raw sequence into records, skipping malformed entries.
///
/// Returns the records in source order and one
/// [`ConfigError::MalformedRecord`] per skipped entry.
pub fn parse_records(values: Vec<Value>, layer: &str) -> (Vec<ConfigRecord>, Vec<ConfigError>) {
    let mut records = Vec::with_capacity(values.len());
    let mut problems = Vec::new();

    for (index, value) in values.into_iter().enumerate() {
        let malformed = |reason: &str| ConfigError::MalformedRecord {
            layer: layer.to_owned(),
            index,
            reason: reason.to_owned(),
        };
        let Value::Object(mut fields) = value else {
            problems.push(malformed("record is not a map"));
            continue;
        };
        match fields.remove("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => {
                records.push(ConfigRecord::new(id, fields, layer));
            }
            Some(Value::String(_)) => problems.push(malformed("'id' is empty")),
            Some(_) => problems.push(malformed("'id' is not a string")),
            None => problems.push(malformed("missing required 'id'")),
        }
    }

    (records, problems)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> ConfigRecord {
        let (mut records, problems) = parse_records(vec![value], "test");
        assert!(problems.is_empty(), "{problems:?}");
        records.remove(0)
    }

    #[test]
    fn malformed_entries_are_skipped_with_reasons() {
        let values = vec![
            json!({"id": "ok", "hp": 1}),
            json!({"hp": 2}),
            json!({"id": 7}),
            json!({"id": "  "}),
            json!("not a map"),
            json!({"id": "also_ok"}),
        ];
        let (records, problems) = parse_records(values, "base");

        let ids: Vec<&str> = records.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["ok", "also_ok"]);
        assert_eq!(problems.len(), 4);
        assert!(matches!(
            &problems[0],
            ConfigError::MalformedRecord { index: 1, layer, .. } if layer == "base"
        ));
    }

    #[test]
    fn typed_accessors() {
        let r = record(json!({
            "id": "goblin",
            "name": "Goblin",
            "hp": 12,
            "speed": 1.25,
            "flying": false
        }));
        assert_eq!(r.get_str("name"), Some("Goblin"));
        assert_eq!(r.get_i64("hp"), Some(12));
        assert_eq!(r.get_f64("hp"), Some(12.0));
        assert_eq!(r.get_f64("speed"), Some(1.25));
        assert_eq!(r.get_bool("flying"), Some(false));
        assert_eq!(r.get_i64("missing"), None);
        assert_eq!(r.get_or("armor", 3u32), 3);
        assert_eq!(r.get_or("hp", 0u32), 12);
        assert!(r.field("id").is_none(), "id lives outside the field map");
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Enemy {
            id: String,
            hp: u32,
            #[serde(default)]
            boss: bool,
        }

        let r = record(json!({"id": "ogre", "hp": 40}));
        assert_eq!(
            r.deserialize::<Enemy>().unwrap(),
            Enemy {
                id: "ogre".into(),
                hp: 40,
                boss: false
            }
        );
        let bad = record(json!({"id": "ogre", "hp": "lots"}));
        assert!(matches!(
            bad.deserialize::<Enemy>(),
            Err(ConfigError::Field { .. })
        ));
    }

    #[test]
    fn resource_fields_found_at_any_depth() {
        let r = record(json!({
            "id": "hero",
            "icon": "res://ui/hero.png",
            "label": "res://",
            "sprite": {"sheet": "res://sprites/hero.png", "frames": ["res://a.png", "plain"]},
            "notes": "not a path"
        }));
        let mut found: Vec<(String, String)> = r
            .resource_fields()
            .into_iter()
            .map(|(k, v)| (k, v.relative().to_owned()))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("icon".to_owned(), "ui/hero.png".to_owned()),
                ("sprite.frames.0".to_owned(), "a.png".to_owned()),
                ("sprite.sheet".to_owned(), "sprites/hero.png".to_owned()),
            ]
        );
    }
}
