//! Polymorphic property values and the property bag
//!
//! A property value is exactly one of a string, a number, an array of strings
//! or an array of numbers. On the wire the value is self-describing: strings
//! and numbers appear as themselves and arrays take the kind of their elements.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;

/// The kind of a [`PropertyValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// A single string
    String,
    /// A single number
    Number,
    /// An ordered list of strings
    StringArray,
    /// An ordered list of numbers
    NumberArray,
}

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// A single string
    String(String),
    /// A single number
    Number(f64),
    /// An ordered list of strings
    StringArray(Vec<String>),
    /// An ordered list of numbers
    NumberArray(Vec<f64>),
}

impl PropertyValue {
    /// Kind of this value
    pub fn kind(&self) -> PropertyKind {
        match self {
            Self::String(_) => PropertyKind::String,
            Self::Number(_) => PropertyKind::Number,
            Self::StringArray(_) => PropertyKind::StringArray,
            Self::NumberArray(_) => PropertyKind::NumberArray,
        }
    }

    /// The string, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a number value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The strings, if this is a string array
    pub fn as_strings(&self) -> Option<&[String]> {
        match self {
            Self::StringArray(v) => Some(v),
            _ => None,
        }
    }

    /// The numbers, if this is a number array
    pub fn as_numbers(&self) -> Option<&[f64]> {
        match self {
            Self::NumberArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        Self::StringArray(value)
    }
}

impl From<Vec<&str>> for PropertyValue {
    fn from(value: Vec<&str>) -> Self {
        Self::StringArray(value.into_iter().map(str::to_owned).collect())
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(value: Vec<f64>) -> Self {
        Self::NumberArray(value)
    }
}

impl<const N: usize> From<[f64; N]> for PropertyValue {
    fn from(value: [f64; N]) -> Self {
        Self::NumberArray(value.to_vec())
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(PropertyValueVisitor)
    }
}

struct PropertyValueVisitor;

impl<'de> Visitor<'de> for PropertyValueVisitor {
    type Value = PropertyValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string, a number, or an array of only strings or only numbers")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(PropertyValue::String(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(PropertyValue::String(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(PropertyValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(PropertyValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(PropertyValue::Number(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let capacity = seq.size_hint().unwrap_or(0);
        // The first element fixes the array kind; an empty array is a string array.
        match seq.next_element::<Scalar>()? {
            None => Ok(PropertyValue::StringArray(Vec::new())),
            Some(Scalar::String(first)) => {
                let mut out = Vec::with_capacity(capacity.max(1));
                out.push(first);
                while let Some(item) = seq.next_element::<Scalar>()? {
                    match item {
                        Scalar::String(s) => out.push(s),
                        Scalar::Number(_) => {
                            return Err(de::Error::custom(
                                "mixed array: found a number in an array of strings",
                            ))
                        }
                    }
                }
                Ok(PropertyValue::StringArray(out))
            }
            Some(Scalar::Number(first)) => {
                let mut out = Vec::with_capacity(capacity.max(1));
                out.push(first);
                while let Some(item) = seq.next_element::<Scalar>()? {
                    match item {
                        Scalar::Number(n) => out.push(n),
                        Scalar::String(_) => {
                            return Err(de::Error::custom(
                                "mixed array: found a string in an array of numbers",
                            ))
                        }
                    }
                }
                Ok(PropertyValue::NumberArray(out))
            }
        }
    }
}

/// Array element
enum Scalar {
    String(String),
    Number(f64),
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ScalarVisitor;

        impl<'de> Visitor<'de> for ScalarVisitor {
            type Value = Scalar;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string or a number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Scalar, E> {
                Ok(Scalar::String(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Scalar, E> {
                Ok(Scalar::String(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Scalar, E> {
                Ok(Scalar::Number(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Scalar, E> {
                Ok(Scalar::Number(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Scalar, E> {
                Ok(Scalar::Number(v))
            }
        }

        deserializer.deserialize_any(ScalarVisitor)
    }
}

/// Unordered mapping from property name to value
///
/// Inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(HashMap<String, PropertyValue>);

impl PropertyBag {
    /// Create an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag holds no properties
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Insert or replace a property, returning the previous value
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Look up a property
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    /// Look up a string property
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    /// Look up a number property
    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropertyValue::as_number)
    }

    /// Look up a string array property
    pub fn get_strings(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(PropertyValue::as_strings)
    }

    /// Look up a number array property
    pub fn get_numbers(&self, key: &str) -> Option<&[f64]> {
        self.get(key).and_then(PropertyValue::as_numbers)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Remove a property
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.0.remove(key)
    }

    /// Copy every entry of `other` into this bag, overwriting on collision
    pub fn merge(&mut self, other: &PropertyBag) {
        for (key, value) in other.iter() {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over entries
    pub fn iter(&self) -> hash_map::Iter<'_, String, PropertyValue> {
        self.0.iter()
    }

    /// Iterate over keys
    pub fn keys(&self) -> hash_map::Keys<'_, String, PropertyValue> {
        self.0.keys()
    }
}

impl<K, V> FromIterator<(K, V)> for PropertyBag
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<K, V> Extend<(K, V)> for PropertyBag
where
    K: Into<String>,
    V: Into<PropertyValue>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl IntoIterator for PropertyBag {
    type Item = (String, PropertyValue);
    type IntoIter = hash_map::IntoIter<String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PropertyBag {
    type Item = (&'a String, &'a PropertyValue);
    type IntoIter = hash_map::Iter<'a, String, PropertyValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<HashMap<String, PropertyValue>> for PropertyBag {
    fn from(map: HashMap<String, PropertyValue>) -> Self {
        Self(map)
    }
}

impl From<PropertyBag> for HashMap<String, PropertyValue> {
    fn from(bag: PropertyBag) -> Self {
        bag.0
    }
}
