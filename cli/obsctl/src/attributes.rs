//! Attribute values and lookups.
//!
//! OTLP attributes arrive as `KeyValue` pairs holding an `AnyValue` oneof.
//! They are converted once into [`Attribute`]s so the rest of the engine only
//! deals with a plain tagged union and a single display projection.

use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};

/// A scalar or composite attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<AttrValue>),
    KvList(Vec<Attribute>),
    Empty,
}

impl AttrValue {
    /// Projects the value to the text shown in tables and used by filters.
    pub fn to_display_string(&self) -> String {
        match self {
            AttrValue::String(s) => s.clone(),
            AttrValue::Int(i) => i.to_string(),
            AttrValue::Double(d) => d.to_string(),
            AttrValue::Bool(b) => b.to_string(),
            AttrValue::Bytes(b) => hex::encode(b),
            AttrValue::Array(values) => {
                let items: Vec<String> = values.iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", items.join(", "))
            }
            AttrValue::KvList(entries) => {
                let items: Vec<String> = entries
                    .iter()
                    .map(|a| format!("{}={}", a.key, a.value.to_display_string()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            AttrValue::Empty => String::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&AnyValue> for AttrValue {
    fn from(av: &AnyValue) -> Self {
        match &av.value {
            Some(any_value::Value::StringValue(s)) => AttrValue::String(s.clone()),
            Some(any_value::Value::IntValue(i)) => AttrValue::Int(*i),
            Some(any_value::Value::DoubleValue(d)) => AttrValue::Double(*d),
            Some(any_value::Value::BoolValue(b)) => AttrValue::Bool(*b),
            Some(any_value::Value::BytesValue(b)) => AttrValue::Bytes(b.clone()),
            Some(any_value::Value::ArrayValue(arr)) => {
                AttrValue::Array(arr.values.iter().map(AttrValue::from).collect())
            }
            Some(any_value::Value::KvlistValue(kvs)) => {
                AttrValue::KvList(kvs.values.iter().map(Attribute::from).collect())
            }
            None => AttrValue::Empty,
        }
    }
}

impl From<Option<&AnyValue>> for AttrValue {
    fn from(av: Option<&AnyValue>) -> Self {
        av.map_or(AttrValue::Empty, AttrValue::from)
    }
}

/// A single key/value attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: AttrValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

impl From<&KeyValue> for Attribute {
    fn from(kv: &KeyValue) -> Self {
        Attribute {
            key: kv.key.clone(),
            value: AttrValue::from(kv.value.as_ref()),
        }
    }
}

/// Returns the first attribute with exactly this key.
pub fn find_attribute<'a>(attrs: &'a [Attribute], key: &str) -> Option<&'a AttrValue> {
    attrs.iter().find(|a| a.key == key).map(|a| &a.value)
}

/// Display string of the first attribute with this key, or an empty string.
pub fn lookup_attribute(attrs: &[Attribute], key: &str) -> String {
    find_attribute(attrs, key)
        .map(AttrValue::to_display_string)
        .unwrap_or_default()
}

/// Merges attribute layers, earlier layers taking precedence on key collision.
///
/// Call with the most specific layer first (record, then scope, then resource).
pub fn merge_attributes(layers: &[&[KeyValue]]) -> Vec<Attribute> {
    let mut merged: Vec<Attribute> = Vec::new();
    for layer in layers {
        for kv in layer.iter() {
            if !merged.iter().any(|a| a.key == kv.key) {
                merged.push(Attribute::from(kv));
            }
        }
    }
    merged
}

#[cfg(test)]
pub(crate) mod test_support {
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};

    pub fn string_kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue(value.to_string())),
            }),
        }
    }

    pub fn int_kv(key: &str, value: i64) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::IntValue(value)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{int_kv, string_kv};
    use super::*;
    use opentelemetry_proto::tonic::common::v1::ArrayValue;

    #[test]
    fn test_scalar_values_project_to_text() {
        assert_eq!(AttrValue::String("GET".into()).to_display_string(), "GET");
        assert_eq!(AttrValue::Int(200).to_display_string(), "200");
        assert_eq!(AttrValue::Double(1.5).to_display_string(), "1.5");
        assert_eq!(AttrValue::Bool(true).to_display_string(), "true");
        assert_eq!(AttrValue::Empty.to_display_string(), "");
    }

    #[test]
    fn test_composite_values_project_to_text() {
        let av = AnyValue {
            value: Some(any_value::Value::ArrayValue(ArrayValue {
                values: vec![
                    AnyValue {
                        value: Some(any_value::Value::StringValue("a".into())),
                    },
                    AnyValue {
                        value: Some(any_value::Value::IntValue(2)),
                    },
                ],
            })),
        };
        assert_eq!(AttrValue::from(&av).to_display_string(), "[a, 2]");
        assert_eq!(
            AttrValue::Bytes(vec![0xab, 0x01]).to_display_string(),
            "ab01"
        );
    }

    #[test]
    fn test_lookup_first_match_and_missing() {
        let attrs = vec![
            Attribute::new("http.method", AttrValue::String("GET".into())),
            Attribute::new("http.method", AttrValue::String("POST".into())),
        ];
        assert_eq!(lookup_attribute(&attrs, "http.method"), "GET");
        assert_eq!(lookup_attribute(&attrs, "http.route"), "");
        assert_eq!(lookup_attribute(&attrs, "HTTP.METHOD"), "");
    }

    #[test]
    fn test_merge_prefers_most_specific_layer() {
        let span = vec![string_kv("service.name", "span-level"), int_kv("retries", 3)];
        let scope = vec![string_kv("scope.attr", "s")];
        let resource = vec![
            string_kv("service.name", "checkout"),
            string_kv("cloud.region", "eu-west-1"),
        ];
        let merged = merge_attributes(&[&span, &scope, &resource]);

        assert_eq!(merged.len(), 4);
        assert_eq!(lookup_attribute(&merged, "service.name"), "span-level");
        assert_eq!(lookup_attribute(&merged, "retries"), "3");
        assert_eq!(lookup_attribute(&merged, "cloud.region"), "eu-west-1");
    }
}
