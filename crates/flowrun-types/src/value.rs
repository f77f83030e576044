//! The configuration value tree and its unification rules.
//!
//! A `Value` is either concrete data (null, bool, numbers, strings, lists,
//! structs), an absolute reference to another location (`Ref`), or a type
//! constraint that has not been given a value yet (`Incomplete`).
//!
//! Unification is the only way values change: it combines two values into one
//! that carries the information of both, or reports a conflict. It never
//! removes information, so repeated merges are monotonic.
//!
//! # Interchange encoding
//!
//! When converting from decoded JSON/YAML/TOML, an object whose only key is
//! `"$ref"` becomes a reference and an object whose only key is
//! `"$incomplete"` becomes an incomplete value of the named kind:
//!
//! ```json
//! { "response": { "$incomplete": "string" },
//!   "text":     { "$ref": "command.hello.ask.response" } }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::error::DocumentError;
use crate::path::Path;

/// Interchange key marking a reference.
pub const REF_KEY: &str = "$ref";

/// Interchange key marking an incomplete value.
pub const INCOMPLETE_KEY: &str = "$incomplete";

// ---------------------------------------------------------------------------
// Kind
// ---------------------------------------------------------------------------

/// The shape of a value, used as the constraint of an incomplete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Anything at all.
    Top,
    Null,
    Bool,
    Int,
    Float,
    /// Int or Float.
    Number,
    String,
    List,
    Struct,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Top => "_",
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Struct => "struct",
        }
    }

    /// Parse a kind name as used in the interchange encoding.
    pub fn parse(name: &str) -> Option<Kind> {
        let kind = match name {
            "_" | "top" | "any" => Kind::Top,
            "null" => Kind::Null,
            "bool" => Kind::Bool,
            "int" => Kind::Int,
            "float" => Kind::Float,
            "number" => Kind::Number,
            "string" => Kind::String,
            "list" => Kind::List,
            "struct" => Kind::Struct,
            _ => return None,
        };
        Some(kind)
    }

    /// True if a concrete value of kind `other` satisfies this constraint.
    pub fn accepts(&self, other: Kind) -> bool {
        match self {
            Kind::Top => true,
            Kind::Number => matches!(other, Kind::Int | Kind::Float | Kind::Number),
            k => *k == other,
        }
    }

    /// The most general kind satisfying both constraints, if any.
    pub fn meet(self, other: Kind) -> Option<Kind> {
        if self.accepts(other) {
            Some(other)
        } else if other.accepts(self) {
            Some(self)
        } else {
            None
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A node of the configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Struct(BTreeMap<String, Value>),
    /// An absolute reference, resolved against the whole document.
    Ref(Path),
    /// A constraint with no value yet.
    Incomplete(Kind),
}

impl Value {
    /// An empty struct.
    pub fn empty_struct() -> Self {
        Value::Struct(BTreeMap::new())
    }

    /// Build a struct from `(name, value)` pairs.
    pub fn structure<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Shorthand for a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Shorthand for a reference; panics on a malformed path, so only use it
    /// with literal paths.
    pub fn reference(path: &str) -> Self {
        match Path::parse(path) {
            Ok(p) => Value::Ref(p),
            Err(e) => panic!("invalid reference literal '{path}': {e}"),
        }
    }

    /// The kind of this value. References report `Top`.
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::String(_) => Kind::String,
            Value::List(_) => Kind::List,
            Value::Struct(_) => Kind::Struct,
            Value::Ref(_) => Kind::Top,
            Value::Incomplete(k) => *k,
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Value::Struct(_))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, Value::Incomplete(_))
    }

    /// True if neither this value nor anything below it is incomplete or a
    /// reference. References must be resolved first to answer concreteness
    /// for a document location.
    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Incomplete(_) | Value::Ref(_) => false,
            Value::List(items) => items.iter().all(Value::is_concrete),
            Value::Struct(fields) => fields.values().all(Value::is_concrete),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup on a struct.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_struct().and_then(|fields| fields.get(field))
    }

    /// Visit every reference in this subtree together with the path at which
    /// it occurs (relative paths are appended to `at`).
    pub fn walk_refs<'a>(&'a self, at: &Path, visit: &mut impl FnMut(&Path, &'a Path)) {
        match self {
            Value::Ref(target) => visit(at, target),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.walk_refs(&at.index(i), visit);
                }
            }
            Value::Struct(fields) => {
                for (name, field) in fields {
                    field.walk_refs(&at.child(name.as_str()), visit);
                }
            }
            _ => {}
        }
    }

    /// Unify two values. `at` is used for conflict messages only.
    ///
    /// References only unify with an identical reference; callers resolve
    /// references before unifying values that may contain them.
    pub fn unify(&self, other: &Value, at: &Path) -> Result<Value, DocumentError> {
        match (self, other) {
            (Value::Incomplete(a), Value::Incomplete(b)) => match a.meet(*b) {
                Some(k) => Ok(Value::Incomplete(k)),
                None => Err(conflict(at, self, other)),
            },
            (Value::Incomplete(Kind::Top), v) | (v, Value::Incomplete(Kind::Top)) => Ok(v.clone()),
            (Value::Incomplete(k), v) | (v, Value::Incomplete(k)) => {
                if matches!(v, Value::Ref(_)) {
                    Err(conflict(at, self, other))
                } else if k.accepts(v.kind()) {
                    Ok(v.clone())
                } else {
                    Err(conflict(at, self, other))
                }
            }
            (Value::Ref(a), Value::Ref(b)) if a == b => Ok(self.clone()),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                if (*a as f64) == *b {
                    Ok(Value::Int(*a))
                } else {
                    Err(conflict(at, self, other))
                }
            }
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Err(conflict(at, self, other));
                }
                let items = a
                    .iter()
                    .zip(b.iter())
                    .enumerate()
                    .map(|(i, (x, y))| x.unify(y, &at.index(i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(items))
            }
            (Value::Struct(a), Value::Struct(b)) => {
                let mut merged = a.clone();
                for (name, theirs) in b {
                    let next = match merged.get(name) {
                        Some(ours) => ours.unify(theirs, &at.child(name.as_str()))?,
                        None => theirs.clone(),
                    };
                    merged.insert(name.clone(), next);
                }
                Ok(Value::Struct(merged))
            }
            (a, b) if a == b => Ok(a.clone()),
            _ => Err(conflict(at, self, other)),
        }
    }

    /// Convert decoded interchange data into a value.
    pub fn from_json(json: serde_json::Value) -> Result<Value, DocumentError> {
        let value = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(DocumentError::Decode(format!("unsupported number {n}")));
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(target) = map.get(REF_KEY) {
                        let text = target.as_str().ok_or_else(|| {
                            DocumentError::Decode(format!("{REF_KEY} must be a string"))
                        })?;
                        return Ok(Value::Ref(Path::parse(text)?));
                    }
                    if let Some(kind) = map.get(INCOMPLETE_KEY) {
                        let name = kind.as_str().unwrap_or_default();
                        let kind = Kind::parse(name).ok_or_else(|| {
                            DocumentError::Decode(format!("unknown kind '{name}'"))
                        })?;
                        return Ok(Value::Incomplete(kind));
                    }
                }
                let mut fields = BTreeMap::new();
                for (name, field) in map {
                    fields.insert(name, Value::from_json(field)?);
                }
                Value::Struct(fields)
            }
        };
        Ok(value)
    }

    /// Convert into interchange data. Inverse of [`Value::from_json`]; a float
    /// that is not finite becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Struct(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Ref(path) => marker(REF_KEY, path.to_string()),
            Value::Incomplete(kind) => marker(INCOMPLETE_KEY, kind.name().to_string()),
        }
    }
}

fn marker(key: &str, text: String) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), serde_json::Value::String(text));
    serde_json::Value::Object(map)
}

fn conflict(at: &Path, left: &Value, right: &Value) -> DocumentError {
    DocumentError::Conflict {
        path: at.to_string(),
        left: left.to_string(),
        right: right.to_string(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Incomplete(kind) => f.write_str(kind.name()),
            Value::Ref(path) => write!(f, "&{path}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(json).map_err(serde::de::Error::custom)
    }
}
