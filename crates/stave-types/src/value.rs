use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Type tag of a scalar [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Bytes => "bytes",
        };
        write!(f, "{s}")
    }
}

/// A scalar property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The type tag of this value.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::Int(_) => ScalarType::Int,
            Self::Float(_) => ScalarType::Float,
            Self::Text(_) => ScalarType::Text,
            Self::Bytes(_) => ScalarType::Bytes,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

/// A value type stored whole in a single field.
///
/// The document engine never looks inside a wrapped value; it only moves the
/// encoded payload around. Implementors pick a stable `TYPE_NAME` which the
/// schema uses to type-check the field.
pub trait WrappedType: Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
}

/// Encoded payload of a [`WrappedType`] tagged with its type name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wrapped {
    type_name: String,
    payload: Vec<u8>,
}

impl Wrapped {
    /// Encode a typed value.
    pub fn encode<T: WrappedType>(value: &T) -> Result<Self, TypeError> {
        let payload =
            bincode::serialize(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self {
            type_name: T::TYPE_NAME.to_string(),
            payload,
        })
    }

    /// Wrap a payload that is already encoded.
    pub fn from_raw(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Decode into a typed value, checking the type name first.
    pub fn decode<T: WrappedType>(&self) -> Result<T, TypeError> {
        if self.type_name != T::TYPE_NAME {
            return Err(TypeError::WrappedTypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: self.type_name.clone(),
            });
        }
        bincode::deserialize(&self.payload).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

impl fmt::Display for Wrapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} bytes)", self.type_name, self.payload.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tempo {
        bpm: u32,
    }

    impl WrappedType for Tempo {
        const TYPE_NAME: &'static str = "Tempo";
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Swing(u8);

    impl WrappedType for Swing {
        const TYPE_NAME: &'static str = "Swing";
    }

    #[test]
    fn scalar_type_tags() {
        assert_eq!(Value::from(true).scalar_type(), ScalarType::Bool);
        assert_eq!(Value::from(3i64).scalar_type(), ScalarType::Int);
        assert_eq!(Value::from(0.5).scalar_type(), ScalarType::Float);
        assert_eq!(Value::from("x").scalar_type(), ScalarType::Text);
        assert_eq!(Value::from(vec![1u8]).scalar_type(), ScalarType::Bytes);
    }

    #[test]
    fn accessors_only_match_their_variant() {
        let v = Value::from("lead");
        assert_eq!(v.as_text(), Some("lead"));
        assert_eq!(v.as_int(), None);
        assert_eq!(Value::Int(4).as_int(), Some(4));
    }

    #[test]
    fn display_formats() {
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::Bytes(vec![0xab]).to_string(), "0xab");
    }

    #[test]
    fn wrapped_encode_decode() {
        let w = Wrapped::encode(&Tempo { bpm: 128 }).unwrap();
        assert_eq!(w.type_name(), "Tempo");
        assert_eq!(w.decode::<Tempo>().unwrap(), Tempo { bpm: 128 });
    }

    #[test]
    fn wrapped_decode_checks_type_name() {
        let w = Wrapped::encode(&Swing(60)).unwrap();
        let err = w.decode::<Tempo>().unwrap_err();
        assert_eq!(
            err,
            TypeError::WrappedTypeMismatch {
                expected: "Tempo".into(),
                actual: "Swing".into(),
            }
        );
    }
}
