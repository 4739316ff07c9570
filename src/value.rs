//! Document values.
//!
//! A document is modelled as a tagged variant so every traversal in the
//! pipeline dispatches on the tag instead of poking at untyped maps. BSON
//! types without a JSON counterpart survive until [`normalize`] rewrites them
//! to JSON primitives, leaving a [`TypeHint`] behind so their identity can be
//! restored at generation time.

use chrono::{DateTime, SecondsFormat, Utc};
use data_encoding::BASE64;
use mongodb::bson::{Bson, Document};
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A single document value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A 64-bit integer (BSON int32 widens into this).
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered array.
    Array(Vec<Value>),
    /// A document keyed by field name. Keys are kept sorted so two
    /// structurally equal documents serialize identically.
    Object(BTreeMap<String, Value>),
    /// A BSON datetime, pre-normalization.
    DateTime(DateTime<Utc>),
    /// A BSON ObjectId as 24 lowercase hex digits, pre-normalization.
    ObjectId(String),
    /// A BSON binary blob, pre-normalization.
    Binary(Vec<u8>),
    /// A BSON Decimal128 in string form, pre-normalization.
    Decimal(String),
}

/// Records the original database type of a normalized value.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeHint {
    /// The BSON type name as the driver reports it.
    pub original_type: String,
    /// The JSON-Schema type it was rewritten to.
    pub json_schema_type: String,
    /// The JSON-Schema format preserving its identity, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema_format: Option<String>,
}

impl TypeHint {
    fn new(original: &str, ty: &str, format: Option<&str>) -> Self {
        TypeHint {
            original_type: original.to_owned(),
            json_schema_type: ty.to_owned(),
            json_schema_format: format.map(str::to_owned),
        }
    }
}

/// Map from dotted field path to the hint observed there.
pub type TypeHints = BTreeMap<String, TypeHint>;

impl Value {
    /// The JSON-Schema type name of this value after normalization.
    pub fn json_type(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) | Value::DateTime(_) | Value::ObjectId(_) | Value::Binary(_) | Value::Decimal(_) => {
                "string"
            }
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Numeric view of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow the object map, if this is an object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Resolves a dotted path (`a.b.c`) against this value. Array elements
    /// are not addressable; a path segment into an array resolves against
    /// its first element.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            loop {
                match current {
                    Value::Array(items) => current = items.first()?,
                    _ => break,
                }
            }
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Number of scalar leaves in this value (a cheap size proxy).
    pub fn leaf_count(&self) -> u64 {
        match self {
            Value::Array(items) => items.iter().map(Value::leaf_count).sum(),
            Value::Object(map) => map.values().map(Value::leaf_count).sum(),
            _ => 1,
        }
    }

    /// Sum of all array lengths in this value (a cheap size proxy).
    pub fn array_length_sum(&self) -> u64 {
        match self {
            Value::Array(items) => {
                items.len() as u64 + items.iter().map(Value::array_length_sum).sum::<u64>()
            }
            Value::Object(map) => map.values().map(Value::array_length_sum).sum(),
            _ => 0,
        }
    }

    /// Serialized JSON byte length (the heaviest size proxy).
    pub fn byte_size(&self) -> u64 {
        serde_json::to_string(self).map_or(0, |s| s.len() as u64)
    }

    /// Converts a raw BSON value without normalization.
    pub fn from_bson(bson: &Bson) -> Value {
        match bson {
            Bson::Null | Bson::Undefined => Value::Null,
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int32(i) => Value::Int(i64::from(*i)),
            Bson::Int64(i) => Value::Int(*i),
            Bson::Double(f) => Value::Float(*f),
            Bson::String(s) => Value::String(s.clone()),
            Bson::Array(items) => Value::Array(items.iter().map(Value::from_bson).collect()),
            Bson::Document(doc) => Value::Object(
                doc.iter()
                    .map(|(k, v)| (k.clone(), Value::from_bson(v)))
                    .collect(),
            ),
            Bson::DateTime(dt) => Value::DateTime(
                DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default(),
            ),
            Bson::ObjectId(oid) => Value::ObjectId(oid.to_hex()),
            Bson::Binary(bin) => Value::Binary(bin.bytes.clone()),
            Bson::Decimal128(dec) => Value::Decimal(dec.to_string()),
            Bson::Timestamp(ts) => Value::Int(i64::from(ts.time)),
            Bson::RegularExpression(re) => Value::String(re.pattern.clone()),
            Bson::Symbol(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }

    /// Converts into BSON for insertion.
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(s.clone()),
            Value::Array(items) => Bson::Array(items.iter().map(Value::to_bson).collect()),
            Value::Object(map) => {
                let mut doc = Document::new();
                for (k, v) in map {
                    doc.insert(k.clone(), v.to_bson());
                }
                Bson::Document(doc)
            }
            Value::DateTime(dt) => {
                Bson::DateTime(mongodb::bson::DateTime::from_millis(dt.timestamp_millis()))
            }
            Value::ObjectId(hex) => Bson::String(hex.clone()),
            Value::Binary(bytes) => Bson::String(BASE64.encode(bytes)),
            Value::Decimal(s) => Bson::String(s.clone()),
        }
    }

    /// Converts into a BSON document. Non-objects come back as `None`.
    pub fn to_document(&self) -> Option<Document> {
        match self.to_bson() {
            Bson::Document(doc) => Some(doc),
            _ => None,
        }
    }

    /// Converts from a parsed JSON value. Only JSON-native variants are
    /// produced; integral numbers become [`Value::Int`].
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts into a `serde_json::Value` through the normalizing serializer.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut object = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    object.serialize_entry(k, v)?;
                }
                object.end()
            }
            Value::DateTime(dt) => {
                serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::ObjectId(hex) => serializer.serialize_str(hex),
            Value::Binary(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            Value::Decimal(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

/// The binary-type mapping table: which BSON types are rewritten, and to what.
fn hint_for(value: &Value) -> Option<TypeHint> {
    match value {
        Value::DateTime(_) => Some(TypeHint::new("date", "string", Some("date-time"))),
        Value::ObjectId(_) => Some(TypeHint::new("objectId", "string", Some("objectid"))),
        Value::Binary(_) => Some(TypeHint::new("binData", "string", Some("byte"))),
        Value::Decimal(_) => Some(TypeHint::new("decimal128", "string", Some("decimal"))),
        _ => None,
    }
}

/// Rewrites binary-only BSON types to JSON primitives, recording a
/// [`TypeHint`] at each rewritten path. Structure is otherwise untouched.
pub fn normalize(value: Value, path: &str, hints: &mut TypeHints) -> Value {
    if let Some(hint) = hint_for(&value) {
        hints.entry(path.to_owned()).or_insert(hint);
    }
    match value {
        Value::DateTime(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::ObjectId(hex) => Value::String(hex),
        Value::Binary(bytes) => Value::String(BASE64.encode(&bytes)),
        Value::Decimal(s) => Value::String(s),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize(item, path, hints))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, child)| {
                    let child_path = join_path(path, &key);
                    let normalized = normalize(child, &child_path, hints);
                    (key, normalized)
                })
                .collect(),
        ),
        other => other,
    }
}

/// Converts a sampled BSON document into a normalized value plus its hints.
pub fn normalize_document(doc: &Document) -> (Value, TypeHints) {
    let mut hints = TypeHints::new();
    let value = normalize(Value::from_bson(&Bson::Document(doc.clone())), "", &mut hints);
    (value, hints)
}

/// Joins a parent path and a field name with a dot.
pub fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_owned()
    } else {
        format!("{parent}.{field}")
    }
}
