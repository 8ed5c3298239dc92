//! Capability tree.
//!
//! A rooted ordered mapping describing everything a node exposes for
//! remote inspection and control. Two node kinds coexist at every
//! level: containers (plain mappings, possibly carrying `_`-prefixed
//! metadata) and attributes (typed values with access flags). An object
//! on the wire is an attribute exactly when it has a `value` key.
//!
//! Merging follows dict-merge semantics: when both sides are JSON
//! objects the merge descends (attribute objects included, so a partial
//! `{value: x}` patch updates an attribute in place and keeps its
//! `typeHint`/`access`/bounds); otherwise the incoming value replaces
//! the existing node. Remote SETs run the same merge with per-attribute
//! write checks; denied paths are skipped silently and allowed siblings
//! still land.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};
use tracing::{debug, warn};

use crate::error::{ConclaveError, Result};
use crate::path::Path;
use crate::value::{vec_from_json, Access, TypeHint, Value};

/// A node in the capability tree: a container or an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    Container(Container),
    Attribute(Attribute),
}

impl TreeNode {
    #[must_use]
    pub const fn as_container(&self) -> Option<&Container> {
        match self {
            Self::Container(c) => Some(c),
            Self::Attribute(_) => None,
        }
    }

    #[must_use]
    pub const fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            Self::Attribute(a) => Some(a),
            Self::Container(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Container(c) => c.to_json(),
            Self::Attribute(a) => a.to_json(),
        }
    }
}

/// An attribute: a typed value plus access flags and optional numeric
/// bounds. Bounds are carried as hints and never enforced on writes.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub value: Value,
    pub access: Access,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
}

impl Attribute {
    pub fn new(value: impl Into<Value>, access: Access) -> Self {
        Self {
            value: value.into(),
            access,
            min: None,
            max: None,
            step: None,
        }
    }

    #[must_use]
    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    #[must_use]
    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    #[must_use]
    pub const fn type_hint(&self) -> TypeHint {
        self.value.type_hint()
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        map.insert("value".into(), self.value.to_json());
        map.insert("typeHint".into(), json!(self.type_hint().as_str()));
        map.insert("access".into(), json!(self.access.to_string()));
        if let Some(min) = self.min {
            map.insert("min".into(), json!(min));
        }
        if let Some(max) = self.max {
            map.insert("max".into(), json!(max));
        }
        if let Some(step) = self.step {
            map.insert("step".into(), json!(step));
        }
        Json::Object(map)
    }

    /// Build an attribute from a wire object (must carry `value`).
    ///
    /// A missing `typeHint` is inferred from the JSON shape; a value
    /// that does not conform to a present hint makes the whole object
    /// unusable.
    #[must_use]
    pub fn from_json(obj: &Map<String, Json>) -> Option<Self> {
        let raw = obj.get("value")?;
        let hint: Option<TypeHint> = obj
            .get("typeHint")
            .and_then(|h| serde_json::from_value(h.clone()).ok());
        let value = match hint {
            Some(h) => Value::from_json(raw, h)?,
            None => Value::infer(raw)?,
        };
        let access = obj
            .get("access")
            .and_then(Json::as_str)
            .map_or(Access::r(), Access::parse);
        Some(Self {
            value,
            access,
            min: obj.get("min").and_then(Json::as_f64),
            max: obj.get("max").and_then(Json::as_f64),
            step: obj.get("step").and_then(Json::as_f64),
        })
    }

    /// Apply a partial wire patch in place.
    ///
    /// A `typeHint` in the patch retypes the attribute (the patch must
    /// then carry a conforming `value`); otherwise `value` is coerced
    /// against the current hint.
    fn apply_patch(&mut self, obj: &Map<String, Json>) -> PatchEffect {
        let mut effect = PatchEffect::default();
        let hint: Option<TypeHint> = obj
            .get("typeHint")
            .and_then(|h| serde_json::from_value(h.clone()).ok());
        if let Some(raw) = obj.get("value") {
            let target = hint.unwrap_or_else(|| self.type_hint());
            match Value::from_json(raw, target) {
                Some(value) => {
                    effect.value_changed = value != self.value;
                    effect.applied |= effect.value_changed;
                    self.value = value;
                }
                None => {
                    debug!(hint = %target, "patch value does not conform; skipped");
                }
            }
        }
        if let Some(access) = obj.get("access").and_then(Json::as_str) {
            self.access = Access::parse(access);
            effect.applied = true;
        }
        for (field, slot) in [
            ("min", &mut self.min),
            ("max", &mut self.max),
            ("step", &mut self.step),
        ] {
            if let Some(v) = obj.get(field).and_then(Json::as_f64) {
                *slot = Some(v);
                effect.applied = true;
            }
        }
        effect
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PatchEffect {
    applied: bool,
    value_changed: bool,
}

/// Typed root metadata, one variant per reserved `_` key.
#[derive(Debug, Clone, PartialEq)]
pub enum Meta {
    Name(String),
    Location([f64; 3]),
    Orientation([f64; 3]),
    Scale([f64; 3]),
    Matrix([[f64; 4]; 4]),
}

impl Meta {
    /// The reserved key this metadata lives under.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::Name(_) => "_name",
            Self::Location(_) => "_location",
            Self::Orientation(_) => "_orientation",
            Self::Scale(_) => "_scale",
            Self::Matrix(_) => "_matrix",
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Self::Name(v) => json!(v),
            Self::Location(v) | Self::Orientation(v) | Self::Scale(v) => json!(v),
            Self::Matrix(v) => json!(v),
        }
    }
}

/// Container-level metadata (`_name`, spatial hints, object `type`).
///
/// Unrecognized `_`-prefixed keys are preserved verbatim so mirrors of
/// richer peers stay faithful.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeMeta {
    pub name: Option<String>,
    pub location: Option<[f64; 3]>,
    pub orientation: Option<[f64; 3]>,
    pub scale: Option<[f64; 3]>,
    pub matrix: Option<[[f64; 4]; 4]>,
    pub object_type: Option<String>,
    pub extra: BTreeMap<String, Json>,
}

impl NodeMeta {
    /// `true` for keys this struct owns (`_`-prefixed, plus `type`).
    fn owns(key: &str) -> bool {
        key.starts_with('_') || key == "type"
    }

    /// Apply one wire metadata entry; returns whether it was accepted.
    fn apply(&mut self, key: &str, v: &Json) -> bool {
        match key {
            "_name" => match v.as_str() {
                Some(s) if !s.is_empty() => {
                    self.name = Some(s.to_owned());
                    true
                }
                _ => {
                    warn!("rejected _name: must be a non-empty string");
                    false
                }
            },
            "_location" | "_orientation" | "_scale" => match vec_from_json::<3>(v) {
                Some(t) => {
                    match key {
                        "_location" => self.location = Some(t),
                        "_orientation" => self.orientation = Some(t),
                        _ => self.scale = Some(t),
                    }
                    true
                }
                None => {
                    warn!(key, "rejected metadata: expected a numeric 3-tuple");
                    false
                }
            },
            "_matrix" => match matrix_from_json(v) {
                Some(m) => {
                    self.matrix = Some(m);
                    true
                }
                None => {
                    warn!("rejected _matrix: expected a 4x4 numeric matrix");
                    false
                }
            },
            "type" => match v.as_str() {
                Some(s) => {
                    self.object_type = Some(s.to_owned());
                    true
                }
                None => false,
            },
            _ => {
                self.extra.insert(key.to_owned(), v.clone());
                true
            }
        }
    }

    fn write_json(&self, map: &mut Map<String, Json>) {
        if let Some(name) = &self.name {
            map.insert("_name".into(), json!(name));
        }
        if let Some(v) = self.location {
            map.insert("_location".into(), json!(v));
        }
        if let Some(v) = self.orientation {
            map.insert("_orientation".into(), json!(v));
        }
        if let Some(v) = self.scale {
            map.insert("_scale".into(), json!(v));
        }
        if let Some(m) = self.matrix {
            map.insert("_matrix".into(), json!(m));
        }
        if let Some(t) = &self.object_type {
            map.insert("type".into(), json!(t));
        }
        for (k, v) in &self.extra {
            map.insert(k.clone(), v.clone());
        }
    }
}

fn matrix_from_json(v: &Json) -> Option<[[f64; 4]; 4]> {
    let rows = v.as_array()?;
    if rows.len() != 4 {
        return None;
    }
    let mut out = [[0.0; 4]; 4];
    for (slot, row) in out.iter_mut().zip(rows) {
        *slot = vec_from_json::<4>(row)?;
    }
    Some(out)
}

/// How a merge treats attribute access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Unconditional merge: local mutations and peer mirrors.
    Mirror,
    /// Remote SET: an existing attribute without `w` is left untouched.
    Write,
}

/// What a merge did to the tree.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergeOutcome {
    /// At least one entry landed (drives the modified callback).
    pub applied: bool,
    /// Attribute paths whose stored value actually changed
    /// (drives signal fan-out and breaks update cycles).
    pub changed: Vec<Path>,
}

/// An ordered container of child nodes plus metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Container {
    pub meta: NodeMeta,
    children: BTreeMap<String, TreeNode>,
}

impl Container {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> impl Iterator<Item = (&String, &TreeNode)> {
        self.children.iter()
    }

    /// Resolve a non-root path to a node.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&TreeNode> {
        let (first, rest) = path.keys().split_first()?;
        let node = self.children.get(first)?;
        if rest.is_empty() {
            return Some(node);
        }
        node.as_container()?
            .get(&Path::from_keys(rest.iter().cloned()))
    }

    #[must_use]
    pub fn attribute(&self, path: &Path) -> Option<&Attribute> {
        self.get(path)?.as_attribute()
    }

    fn get_container_mut(&mut self, path: &Path) -> Option<&mut Container> {
        let mut cur = self;
        for key in path.keys() {
            match cur.children.get_mut(key) {
                Some(TreeNode::Container(inner)) => cur = inner,
                _ => return None,
            }
        }
        Some(cur)
    }

    fn attribute_mut(&mut self, path: &Path) -> Option<&mut Attribute> {
        let (name, parent) = split_last(path)?;
        match self.get_container_mut(&parent)?.children.get_mut(name) {
            Some(TreeNode::Attribute(attr)) => Some(attr),
            _ => None,
        }
    }

    /// The subtree at `path` in wire form; the root path is the whole
    /// tree.
    #[must_use]
    pub fn subtree_json(&self, path: &Path) -> Option<Json> {
        if path.is_root() {
            return Some(self.to_json());
        }
        self.get(path).map(TreeNode::to_json)
    }

    /// Insert an attribute under `scope`, creating intermediate
    /// containers and replacing any prior node at that key.
    pub fn insert_attribute(&mut self, scope: &Path, name: &str, attr: Attribute) {
        let mut cur = self;
        for key in scope.keys() {
            let entry = cur
                .children
                .entry(key.clone())
                .or_insert_with(|| TreeNode::Container(Container::new()));
            if !matches!(entry, TreeNode::Container(_)) {
                warn!(key = %key, "attribute displaced by registration scope");
                *entry = TreeNode::Container(Container::new());
            }
            match entry {
                TreeNode::Container(inner) => cur = inner,
                TreeNode::Attribute(_) => unreachable!(),
            }
        }
        cur.children
            .insert(name.to_owned(), TreeNode::Attribute(attr));
    }

    /// Create (or retype) `objects.<name>` and return its path.
    pub fn ensure_object(&mut self, name: &str, object_type: &str) -> Path {
        let objects = self
            .children
            .entry("objects".to_owned())
            .or_insert_with(|| TreeNode::Container(Container::new()));
        if !matches!(objects, TreeNode::Container(_)) {
            warn!("objects key was an attribute; replaced by a container");
            *objects = TreeNode::Container(Container::new());
        }
        if let TreeNode::Container(objects) = objects {
            let child = objects
                .children
                .entry(name.to_owned())
                .or_insert_with(|| TreeNode::Container(Container::new()));
            if !matches!(child, TreeNode::Container(_)) {
                *child = TreeNode::Container(Container::new());
            }
            if let TreeNode::Container(child) = child {
                child.meta.object_type = Some(object_type.to_owned());
            }
        }
        Path::from_keys(["objects", name])
    }

    /// Apply typed root metadata; returns the `{key: value}` wire
    /// payload describing the change.
    pub fn set_meta(&mut self, meta: Meta) -> Result<Json> {
        if let Meta::Name(name) = &meta {
            if name.is_empty() {
                return Err(ConclaveError::InvalidMeta(
                    "_name must be a non-empty string".into(),
                ));
            }
        }
        let mut payload = Map::new();
        payload.insert(meta.key().to_owned(), meta.to_json());
        let payload = Json::Object(payload);
        match meta {
            Meta::Name(v) => self.meta.name = Some(v),
            Meta::Location(v) => self.meta.location = Some(v),
            Meta::Orientation(v) => self.meta.orientation = Some(v),
            Meta::Scale(v) => self.meta.scale = Some(v),
            Meta::Matrix(v) => self.meta.matrix = Some(v),
        }
        Ok(payload)
    }

    /// Overwrite the value of an existing attribute, coercing against
    /// its current type hint. Returns whether the stored value changed.
    pub fn set_attr_value(&mut self, path: &Path, value: Value) -> Result<bool> {
        let attr = self
            .attribute_mut(path)
            .ok_or_else(|| ConclaveError::PathNotFound(path.clone()))?;
        let hint = attr.type_hint();
        let value = if value.type_hint() == hint {
            value
        } else {
            Value::from_json(&value.to_json(), hint).ok_or(ConclaveError::TypeMismatch {
                path: path.clone(),
                expected: hint.as_str(),
            })?
        };
        let changed = value != attr.value;
        attr.value = value;
        Ok(changed)
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        self.meta.write_json(&mut map);
        for (key, node) in &self.children {
            map.insert(key.clone(), node.to_json());
        }
        Json::Object(map)
    }

    /// Decode a wire tree. Total: unusable entries are dropped with a
    /// log line, never an error.
    #[must_use]
    pub fn from_json(v: &Json) -> Self {
        let mut tree = Self::new();
        if let Json::Object(map) = v {
            tree.merge_object(map, MergeMode::Mirror, &Path::root(), &mut MergeOutcome::default());
        } else {
            debug!("tree payload is not an object; ignored");
        }
        tree
    }

    /// Recursive dict-merge of a wire patch into this tree.
    pub fn merge(&mut self, patch: &Json, mode: MergeMode) -> MergeOutcome {
        let mut out = MergeOutcome::default();
        if let Json::Object(map) = patch {
            self.merge_object(map, mode, &Path::root(), &mut out);
        } else {
            debug!("merge payload is not an object; ignored");
        }
        out
    }

    fn merge_object(
        &mut self,
        patch: &Map<String, Json>,
        mode: MergeMode,
        prefix: &Path,
        out: &mut MergeOutcome,
    ) {
        for (key, pv) in patch {
            if NodeMeta::owns(key) {
                if self.meta.apply(key, pv) {
                    out.applied = true;
                }
                continue;
            }
            let at = prefix.child(key);
            let obj = match pv {
                Json::Object(obj) => obj,
                _ => {
                    debug!(path = %at, "scalar entry has no home in the tree; dropped");
                    continue;
                }
            };
            let is_attr_patch = obj.contains_key("value");
            let existing_container = matches!(self.children.get(key), Some(TreeNode::Container(_)));
            if existing_container && !is_attr_patch {
                if let Some(TreeNode::Container(inner)) = self.children.get_mut(key) {
                    inner.merge_object(obj, mode, &at, out);
                }
                continue;
            }
            if let Some(TreeNode::Attribute(attr)) = self.children.get_mut(key) {
                if mode == MergeMode::Write && !attr.access.write {
                    debug!(path = %at, "write denied");
                    continue;
                }
                let effect = attr.apply_patch(obj);
                out.applied |= effect.applied;
                if effect.value_changed {
                    out.changed.push(at);
                }
                continue;
            }
            // vacant slot, or an attribute object landing on a container
            if is_attr_patch {
                match Attribute::from_json(obj) {
                    Some(attr) => {
                        self.children
                            .insert(key.clone(), TreeNode::Attribute(attr));
                        out.applied = true;
                        out.changed.push(at);
                    }
                    None => debug!(path = %at, "unusable attribute object; skipped"),
                }
            } else {
                let mut inner = Container::new();
                inner.merge_object(obj, mode, &at, out);
                self.children
                    .insert(key.clone(), TreeNode::Container(inner));
                out.applied = true;
            }
        }
    }
}

fn split_last(path: &Path) -> Option<(&String, Path)> {
    let (last, parent) = path.keys().split_last()?;
    Some((last, Path::from_keys(parent.iter().cloned())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Container {
        let mut tree = Container::new();
        tree.insert_attribute(
            &Path::root(),
            "volume",
            Attribute::new(0.5, Access::rwe()).with_min(0.0).with_max(1.0),
        );
        let scope = tree.ensure_object("lamp", "Light");
        tree.insert_attribute(&scope, "power", Attribute::new(true, Access::rw()));
        tree
    }

    #[test]
    fn structural_json_round_trip() {
        let tree = sample_tree();
        let decoded = Container::from_json(&tree.to_json());
        assert_eq!(decoded, tree);
    }

    #[test]
    fn attribute_recognized_by_value_key() {
        let tree = Container::from_json(&json!({
            "a": {"value": 7, "typeHint": "int", "access": "r"},
            "b": {"c": {"value": 1.0, "typeHint": "float", "access": "rw"}},
        }));
        assert!(tree.attribute(&Path::parse("a")).is_some());
        assert!(tree.get(&Path::parse("b")).unwrap().as_container().is_some());
        assert!(tree.attribute(&Path::parse("b.c")).is_some());
    }

    #[test]
    fn partial_patch_keeps_access_and_hint() {
        let mut tree = sample_tree();
        let out = tree.merge(&json!({"volume": {"value": 0.9}}), MergeMode::Mirror);
        assert!(out.applied);
        assert_eq!(out.changed, vec![Path::parse("volume")]);
        let attr = tree.attribute(&Path::parse("volume")).unwrap();
        assert_eq!(attr.value, Value::Float(0.9));
        assert_eq!(attr.access, Access::rwe());
        assert_eq!(attr.min, Some(0.0));
    }

    #[test]
    fn write_mode_honors_access() {
        let mut tree = Container::new();
        tree.insert_attribute(&Path::root(), "label", Attribute::new("x", Access::r()));
        let before = tree.clone();
        let out = tree.merge(&json!({"label": {"value": "y"}}), MergeMode::Write);
        assert!(!out.applied);
        assert!(out.changed.is_empty());
        assert_eq!(tree, before);
    }

    #[test]
    fn write_mode_merges_allowed_siblings() {
        let mut tree = Container::new();
        tree.insert_attribute(&Path::root(), "ro", Attribute::new(1i64, Access::r()));
        tree.insert_attribute(&Path::root(), "rw", Attribute::new(1i64, Access::rw()));
        let out = tree.merge(
            &json!({"ro": {"value": 2}, "rw": {"value": 2}}),
            MergeMode::Write,
        );
        assert_eq!(out.changed, vec![Path::parse("rw")]);
        assert_eq!(
            tree.attribute(&Path::parse("ro")).unwrap().value,
            Value::Int(1)
        );
        assert_eq!(
            tree.attribute(&Path::parse("rw")).unwrap().value,
            Value::Int(2)
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let mut tree = sample_tree();
        let patch = json!({"volume": {"value": 0.25}, "objects": {"lamp": {"power": {"value": false}}}});
        let mut once = tree.clone();
        once.merge(&patch, MergeMode::Mirror);
        tree.merge(&patch, MergeMode::Mirror);
        tree.merge(&patch, MergeMode::Mirror);
        assert_eq!(tree, once);
    }

    #[test]
    fn disjoint_merges_commute() {
        let a = json!({"x": {"value": 1, "typeHint": "int", "access": "r"}});
        let b = json!({"y": {"value": 2, "typeHint": "int", "access": "r"}});
        let mut ab = sample_tree();
        ab.merge(&a, MergeMode::Mirror);
        ab.merge(&b, MergeMode::Mirror);
        let mut ba = sample_tree();
        ba.merge(&b, MergeMode::Mirror);
        ba.merge(&a, MergeMode::Mirror);
        assert_eq!(ab, ba);
    }

    #[test]
    fn unchanged_value_reports_no_change() {
        let mut tree = sample_tree();
        let out = tree.merge(&json!({"volume": {"value": 0.5}}), MergeMode::Mirror);
        assert!(out.changed.is_empty());
    }

    #[test]
    fn meta_round_trip() {
        let mut tree = Container::new();
        tree.set_meta(Meta::Name("node1".into())).unwrap();
        tree.set_meta(Meta::Location([1.0, 2.0, 3.0])).unwrap();
        let decoded = Container::from_json(&tree.to_json());
        assert_eq!(decoded.meta.name.as_deref(), Some("node1"));
        assert_eq!(decoded.meta.location, Some([1.0, 2.0, 3.0]));
    }

    #[test]
    fn empty_name_rejected() {
        let mut tree = Container::new();
        assert!(tree.set_meta(Meta::Name(String::new())).is_err());
        let before = tree.clone();
        tree.merge(&json!({"_name": ""}), MergeMode::Mirror);
        assert_eq!(tree, before);
    }

    #[test]
    fn set_attr_value_coerces() {
        let mut tree = sample_tree();
        assert!(tree
            .set_attr_value(&Path::parse("volume"), Value::Int(1))
            .unwrap());
        assert_eq!(
            tree.attribute(&Path::parse("volume")).unwrap().value,
            Value::Float(1.0)
        );
        assert!(tree
            .set_attr_value(&Path::parse("missing"), Value::Int(1))
            .is_err());
    }
}
