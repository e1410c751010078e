//! Canonical in-memory dataset: traces, per-trace fixes and attributes.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::validate::{self, ValidationError};

/// Attribute keys every dataset must carry.
pub const REQUIRED_ATTRIBUTES: [&str; 6] = ["fs", "pre_trig", "prf", "spt", "stack", "trig"];

/// Position and time of a single trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Longitude in degrees.
    #[serde(with = "float_format")]
    pub lon: f64,
    /// Latitude in degrees.
    #[serde(with = "float_format")]
    pub lat: f64,
    /// Ellipsoidal height in metres.
    #[serde(with = "float_format")]
    pub hgt: f64,
    #[serde(with = "utc_format")]
    pub utc: NaiveDateTime,
}

impl Fix {
    pub fn new(lon: f64, lat: f64, hgt: f64, utc: NaiveDateTime) -> Self {
        Self { lon, lat, hgt, utc }
    }

    /// A fix with no position, stamped with `utc`.
    pub fn unpositioned(utc: NaiveDateTime) -> Self {
        Self::new(0.0, 0.0, 0.0, utc)
    }
}

/// ISO-8601 timestamps with microsecond precision, 26 characters wide.
pub mod utc_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
    const PARSE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn to_string(utc: &NaiveDateTime) -> String {
        utc.format(FORMAT).to_string()
    }

    /// Parses `YYYY-MM-DDTHH:MM:SS` with an optional fractional part.
    pub fn parse(text: &str) -> Option<NaiveDateTime> {
        let text = text.trim_end_matches('\0').trim();
        PARSE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
    }

    pub fn serialize<S: Serializer>(utc: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_string(utc))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{}'", text)))
    }
}

/// Floats as JSON numbers, with non-finite values spelled `"NaN"`, `"inf"`
/// and `"-inf"`.
pub mod float_format {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Number(f64),
        Text(String),
    }

    pub fn parse(text: &str) -> Option<f64> {
        match text {
            "NaN" | "nan" => Some(f64::NAN),
            "inf" | "Infinity" => Some(f64::INFINITY),
            "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Stored::deserialize(deserializer)? {
            Stored::Number(value) => Ok(value),
            Stored::Text(text) => parse(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("'{}' is not a number", text))),
        }
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    /// Integer view; floats are accepted only when they hold an integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) if value.fract() == 0.0 && value.is_finite() => Some(*value as i64),
            _ => None,
        }
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Acquisition and processing attributes attached to the traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes carrying every required key.
    pub fn acquisition(fs: f64, pre_trig: i64, prf: i64, spt: i64, stack: i64, trig: i64) -> Self {
        let mut attrs = Self::new();
        attrs.insert("fs", fs);
        attrs.insert("pre_trig", pre_trig);
        attrs.insert("prf", prf);
        attrs.insert("spt", spt);
        attrs.insert("stack", stack);
        attrs.insert("trig", trig);
        attrs
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
        self.0.iter()
    }

    pub fn get_f64(&self, key: &str) -> Result<f64, ValidationError> {
        let value = self
            .get(key)
            .ok_or_else(|| ValidationError::MissingAttribute(key.to_string()))?;
        value
            .as_f64()
            .ok_or_else(|| ValidationError::NonNumericAttribute(key.to_string()))
    }

    pub fn get_i64(&self, key: &str) -> Result<i64, ValidationError> {
        let value = self
            .get(key)
            .ok_or_else(|| ValidationError::MissingAttribute(key.to_string()))?;
        value
            .as_i64()
            .ok_or_else(|| ValidationError::NonNumericAttribute(key.to_string()))
    }

    /// Numeric value of an optional derived key; text values count as absent.
    pub fn optional_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(AttrValue::as_f64)
    }

    pub fn fs(&self) -> Result<f64, ValidationError> {
        self.get_f64("fs")
    }

    pub fn pre_trig(&self) -> Result<i64, ValidationError> {
        self.get_i64("pre_trig")
    }

    pub fn spt(&self) -> Result<i64, ValidationError> {
        self.get_i64("spt")
    }
}

/// Traces, fixes and attributes that satisfy the dataset invariants.
///
/// Rows of `traces` are fast-time samples, columns are traces; there is one
/// [`Fix`] per column. A `Dataset` can only be built through [`Dataset::new`],
/// so every value in circulation has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    traces: Array2<f64>,
    fixes: Vec<Fix>,
    attrs: Attributes,
}

impl Dataset {
    pub fn new(traces: Array2<f64>, fixes: Vec<Fix>, attrs: Attributes) -> Result<Self, ValidationError> {
        let dataset = Self {
            traces,
            fixes,
            attrs,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate::validate(self)
    }

    pub fn traces(&self) -> &Array2<f64> {
        &self.traces
    }

    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    pub fn attrs(&self) -> &Attributes {
        &self.attrs
    }

    pub fn trace_count(&self) -> usize {
        self.traces.ncols()
    }

    pub fn sample_count(&self) -> usize {
        self.traces.nrows()
    }

    pub fn into_parts(self) -> (Array2<f64>, Vec<Fix>, Attributes) {
        (self.traces, self.fixes, self.attrs)
    }

    /// New dataset with replacement traces and copies of the fixes and attributes.
    pub fn with_traces(&self, traces: Array2<f64>) -> Result<Self, ValidationError> {
        Self::new(traces, self.fixes.clone(), self.attrs.clone())
    }
}
