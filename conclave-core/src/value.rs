//! Typed attribute values.
//!
//! Every attribute carries a `Value` tagged with one of the eight wire
//! type hints, plus an `Access` set controlling what remote peers may do
//! with it. JSON stays at the wire boundary: handlers convert to and
//! from `serde_json::Value` exactly once, at decode/encode time.

use std::fmt;

use serde::de::{Deserializer, Error as DeError};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

/// Wire type hints for attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeHint {
    Int,
    Float,
    Percent,
    Bool,
    String,
    Vec2f,
    Vec3f,
    Vec4f,
}

impl TypeHint {
    /// The wire spelling of this hint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Percent => "percent",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Vec2f => "vec2f",
            Self::Vec3f => "vec3f",
            Self::Vec4f => "vec4f",
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed attribute value; one variant per [`TypeHint`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Percent(f64),
    Bool(bool),
    Str(String),
    Vec2f([f64; 2]),
    Vec3f([f64; 3]),
    Vec4f([f64; 4]),
}

impl Value {
    /// The type hint this value conforms to.
    #[must_use]
    pub const fn type_hint(&self) -> TypeHint {
        match self {
            Self::Int(_) => TypeHint::Int,
            Self::Float(_) => TypeHint::Float,
            Self::Percent(_) => TypeHint::Percent,
            Self::Bool(_) => TypeHint::Bool,
            Self::Str(_) => TypeHint::String,
            Self::Vec2f(_) => TypeHint::Vec2f,
            Self::Vec3f(_) => TypeHint::Vec3f,
            Self::Vec4f(_) => TypeHint::Vec4f,
        }
    }

    /// Wire representation of this value.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Int(v) => json!(v),
            Self::Float(v) | Self::Percent(v) => json!(v),
            Self::Bool(v) => json!(v),
            Self::Str(v) => json!(v),
            Self::Vec2f(v) => json!(v),
            Self::Vec3f(v) => json!(v),
            Self::Vec4f(v) => json!(v),
        }
    }

    /// Coerce a JSON value against a known type hint.
    ///
    /// Integers are accepted where floats are expected; a float with no
    /// fractional part is accepted where an integer is expected. Anything
    /// else is a `None` and the caller decides whether to drop or retype.
    #[must_use]
    pub fn from_json(v: &Json, hint: TypeHint) -> Option<Self> {
        match hint {
            TypeHint::Int => match v.as_i64() {
                Some(i) => Some(Self::Int(i)),
                None => v
                    .as_f64()
                    .filter(|f| f.fract() == 0.0)
                    .map(|f| Self::Int(f as i64)),
            },
            TypeHint::Float => v.as_f64().map(Self::Float),
            TypeHint::Percent => v.as_f64().map(Self::Percent),
            TypeHint::Bool => v.as_bool().map(Self::Bool),
            TypeHint::String => v.as_str().map(|s| Self::Str(s.to_owned())),
            TypeHint::Vec2f => vec_from_json(v).map(Self::Vec2f),
            TypeHint::Vec3f => vec_from_json(v).map(Self::Vec3f),
            TypeHint::Vec4f => vec_from_json(v).map(Self::Vec4f),
        }
    }

    /// Infer a typed value from a bare JSON shape.
    ///
    /// Used when a peer ships an attribute without a `typeHint`:
    /// booleans, integers, floats and strings map directly, numeric
    /// arrays of arity 2/3/4 become vectors.
    #[must_use]
    pub fn infer(v: &Json) -> Option<Self> {
        match v {
            Json::Bool(b) => Some(Self::Bool(*b)),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Int(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            Json::String(s) => Some(Self::Str(s.clone())),
            Json::Array(items) => match items.len() {
                2 => vec_from_json(v).map(Self::Vec2f),
                3 => vec_from_json(v).map(Self::Vec3f),
                4 => vec_from_json(v).map(Self::Vec4f),
                _ => None,
            },
            _ => None,
        }
    }
}

pub(crate) fn vec_from_json<const N: usize>(v: &Json) -> Option<[f64; N]> {
    let items = v.as_array()?;
    if items.len() != N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_f64()?;
    }
    Some(out)
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<[f64; 2]> for Value {
    fn from(v: [f64; 2]) -> Self {
        Self::Vec2f(v)
    }
}

impl From<[f64; 3]> for Value {
    fn from(v: [f64; 3]) -> Self {
        Self::Vec3f(v)
    }
}

impl From<[f64; 4]> for Value {
    fn from(v: [f64; 4]) -> Self {
        Self::Vec4f(v)
    }
}

/// Remote access flags on an attribute.
///
/// Encoded on the wire as a subset of `"rwe"`:
/// `r` = remote-readable, `w` = remote-writable, `e` = emits signals on
/// value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Access {
    pub read: bool,
    pub write: bool,
    pub emit: bool,
}

impl Access {
    /// Read-only.
    #[must_use]
    pub const fn r() -> Self {
        Self {
            read: true,
            write: false,
            emit: false,
        }
    }

    /// Read-write.
    #[must_use]
    pub const fn rw() -> Self {
        Self {
            read: true,
            write: true,
            emit: false,
        }
    }

    /// Read + emits signals.
    #[must_use]
    pub const fn re() -> Self {
        Self {
            read: true,
            write: false,
            emit: true,
        }
    }

    /// Read-write + emits signals.
    #[must_use]
    pub const fn rwe() -> Self {
        Self {
            read: true,
            write: true,
            emit: true,
        }
    }

    /// Parse the wire spelling; unknown characters are ignored.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let mut access = Self::default();
        for c in s.chars() {
            match c {
                'r' => access.read = true,
                'w' => access.write = true,
                'e' => access.emit = true,
                _ => {}
            }
        }
        access
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.read {
            f.write_str("r")?;
        }
        if self.write {
            f.write_str("w")?;
        }
        if self.emit {
            f.write_str("e")?;
        }
        Ok(())
    }
}

impl Serialize for Access {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.chars().any(|c| !matches!(c, 'r' | 'w' | 'e')) {
            return Err(D::Error::custom(format!("invalid access string: {s:?}")));
        }
        Ok(Self::parse(&s))
    }
}
