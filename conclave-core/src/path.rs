//! Key paths into the capability tree.
//!
//! A path is a finite sequence of UTF-8 keys; the empty path addresses
//! the whole tree. On the wire a path travels as a dotted string
//! (`"objects.lamp.power"`); the decoder also accepts a JSON array of
//! key strings. Keys must not contain `.`.

use std::fmt;

use serde_json::{Map, Value as Json};

/// A path addressing a node in a capability tree.
///
/// Ordering is lexicographic over key segments, which makes prefix
/// relations compatible with a sorted table scan: if `p` is a prefix of
/// `q` then `p <= q`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty path (the tree root).
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from key segments.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    /// Parse the dotted wire form; an empty string is the root.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::root();
        }
        Self(s.split('.').map(str::to_owned).collect())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extend this path by one key.
    #[must_use]
    pub fn child(&self, key: &str) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.to_owned());
        Self(keys)
    }

    /// `true` when `self` addresses `other` or one of its ancestors.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Decode a wire path: a dotted string or an array of key strings.
    #[must_use]
    pub fn from_json(v: &Json) -> Option<Self> {
        match v {
            Json::String(s) => Some(Self::parse(s)),
            Json::Array(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(item.as_str()?.to_owned());
                }
                Some(Self(keys))
            }
            _ => None,
        }
    }

    /// The canonical wire form (dotted string).
    #[must_use]
    pub fn to_json(&self) -> Json {
        Json::String(self.to_string())
    }

    /// Wrap `leaf` in nested single-key objects along this path.
    ///
    /// `nest(a.b, v)` yields `{"a": {"b": v}}`; the root path yields
    /// `leaf` unchanged.
    #[must_use]
    pub fn nest(&self, leaf: Json) -> Json {
        let mut out = leaf;
        for key in self.0.iter().rev() {
            let mut map = Map::new();
            map.insert(key.clone(), out);
            out = Json::Object(map);
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<&Path> for Path {
    fn from(p: &Path) -> Self {
        p.clone()
    }
}

/// Insert `value` at a nested position inside a JSON object, creating
/// intermediate objects as needed. Used to assemble GET replies.
pub fn insert_at(map: &mut Map<String, Json>, path: &Path, value: Json) {
    let keys = path.keys();
    match keys {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.clone())
                .or_insert_with(|| Json::Object(Map::new()));
            if !entry.is_object() {
                *entry = Json::Object(Map::new());
            }
            if let Json::Object(inner) = entry {
                insert_at(inner, &Path::from_keys(rest.iter().cloned()), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_and_display() {
        let p = Path::parse("objects.lamp.power");
        assert_eq!(p.keys(), ["objects", "lamp", "power"]);
        assert_eq!(p.to_string(), "objects.lamp.power");
        assert!(Path::parse("").is_root());
    }

    #[test]
    fn prefix_relation() {
        let src = Path::parse("objects.lamp");
        assert!(src.is_prefix_of(&Path::parse("objects.lamp.power")));
        assert!(src.is_prefix_of(&Path::parse("objects.lamp")));
        assert!(!src.is_prefix_of(&Path::parse("objects.lam")));
        assert!(Path::root().is_prefix_of(&src));
    }

    #[test]
    fn prefix_implies_ordering() {
        // the sorted-table early exit relies on this
        let p = Path::parse("a.b");
        let q = Path::parse("a.b.c");
        assert!(p.is_prefix_of(&q));
        assert!(p <= q);
    }

    #[test]
    fn wire_forms() {
        assert_eq!(Path::from_json(&json!("a.b")), Some(Path::parse("a.b")));
        assert_eq!(
            Path::from_json(&json!(["a", "b"])),
            Some(Path::parse("a.b"))
        );
        assert_eq!(Path::from_json(&json!(3)), None);
    }

    #[test]
    fn nest_wraps_leaf() {
        let p = Path::parse("a.b");
        assert_eq!(p.nest(json!(1)), json!({"a": {"b": 1}}));
        assert_eq!(Path::root().nest(json!(1)), json!(1));
    }

    #[test]
    fn insert_at_shares_prefixes() {
        let mut map = Map::new();
        insert_at(&mut map, &Path::parse("a.b"), json!(1));
        insert_at(&mut map, &Path::parse("a.c"), json!(2));
        assert_eq!(Json::Object(map), json!({"a": {"b": 1, "c": 2}}));
    }
}
