// src/record.rs
//! Flat key/value records exchanged with export collaborators. Field order is preserved and
//! absent numbers serialise as `null`.
use serde::ser::{Serialize, SerializeMap, Serializer};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(Option<f64>),
    Text(String),
}

impl Value {
    pub fn number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => *v,
            Value::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Number(_) => None,
        }
    }

    /// Rendering used for CSV cells and group keys.
    pub fn render(&self) -> String {
        match self {
            Value::Number(Some(v)) => format_number(*v),
            Value::Number(None) => String::new(),
            Value::Text(s) => s.clone(),
        }
    }
}

/// Shortest round-trippable form, without a trailing `.0` for integral values.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v.is_finite().then_some(v))
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        Value::Number(v.filter(|x| x.is_finite()))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Number(Some(if v { 1.0 } else { 0.0 }))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number(Some(v)) => serializer.serialize_f64(*v),
            Value::Number(None) => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, replacing the value if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::number)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_becomes_null_and_order_is_kept() {
        let record = Record::new()
            .with("b", 1.5)
            .with("a", f64::NAN)
            .with("c", "text");
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"b":1.5,"a":null,"c":"text"}"#);
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut record = Record::new().with("x", 1.0);
        record.insert("x", 2.0);
        assert_eq!(record.len(), 1);
        assert_eq!(record.number("x"), Some(2.0));
    }

    #[test]
    fn render_drops_integral_fraction() {
        assert_eq!(Value::from(100.0).render(), "100");
        assert_eq!(Value::from(0.25).render(), "0.25");
        assert_eq!(Value::from(None).render(), "");
    }
}
