//! The document contract consumed by the engine, and an in-memory adapter.
//!
//! The engine never interprets configuration itself. Everything it needs --
//! lookups, concreteness, the references inside a subtree, and merging a
//! task's output -- goes through [`Document`]. [`TreeDocument`] implements
//! the contract over a plain [`Value`] tree with absolute references.

use flowrun_types::{DocumentError, Path, Selector, Value};

/// Deepest chain of references followed before assuming a cycle.
pub const MAX_REFERENCE_DEPTH: usize = 64;

/// A reference found in a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Where the reference is written.
    pub at: Path,
    /// What it points to.
    pub target: Path,
}

/// Read and merge operations over an evaluated configuration tree.
///
/// Implementations are not internally synchronized; the engine serializes
/// every read and merge behind a single lock.
pub trait Document: Send + 'static {
    /// The raw subtree at `path`, references left in place.
    fn lookup(&self, path: &Path) -> Result<Value, DocumentError>;

    /// The subtree at `path` with every reference substituted.
    fn resolve(&self, path: &Path) -> Result<Value, DocumentError>;

    /// True if the value at `path` is fully determined.
    fn is_concrete(&self, path: &Path) -> bool;

    /// Every reference written inside the subtree at `path`.
    fn references(&self, path: &Path) -> Result<Vec<Reference>, DocumentError>;

    /// Rewrite `path` so that it does not pass through a reference.
    fn canonical(&self, path: &Path) -> Path;

    /// Unify `value` into the document at `path`.
    fn fill(&mut self, path: &Path, value: &Value) -> Result<(), DocumentError>;

    /// Unify two values without touching the document.
    fn unify(&self, a: &Value, b: &Value, at: &Path) -> Result<Value, DocumentError> {
        a.unify(b, at)
    }

    fn exists(&self, path: &Path) -> bool {
        self.lookup(path).is_ok()
    }
}

// ---------------------------------------------------------------------------
// TreeDocument
// ---------------------------------------------------------------------------

/// A document backed by an owned [`Value`] tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeDocument {
    root: Value,
}

impl TreeDocument {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Walk `path` without following references.
    fn raw(&self, path: &Path) -> Option<&Value> {
        let mut cur = &self.root;
        for sel in path.selectors() {
            cur = step(cur, sel)?;
        }
        Some(cur)
    }

    /// Walk `path`, following references met at any segment (including the
    /// final one).
    fn node(&self, path: &Path, depth: usize) -> Result<&Value, DocumentError> {
        let mut cur = self.deref(&self.root, depth)?;
        for (i, sel) in path.selectors().iter().enumerate() {
            cur = step(cur, sel).ok_or_else(|| {
                let prefix = Path::from_selectors(path.selectors()[..=i].to_vec());
                DocumentError::NotFound(prefix.to_string())
            })?;
            cur = self.deref(cur, depth)?;
        }
        Ok(cur)
    }

    fn deref<'a>(&'a self, value: &'a Value, depth: usize) -> Result<&'a Value, DocumentError> {
        match value {
            Value::Ref(target) => {
                if depth >= MAX_REFERENCE_DEPTH {
                    return Err(DocumentError::ReferenceCycle(target.to_string()));
                }
                self.node(target, depth + 1)
            }
            other => Ok(other),
        }
    }

    /// Substitute references below `value`. A reference to a missing
    /// location stands for "anything" until something fills it.
    fn substitute(&self, value: &Value, depth: usize) -> Result<Value, DocumentError> {
        match value {
            Value::Ref(target) => {
                if depth >= MAX_REFERENCE_DEPTH {
                    return Err(DocumentError::ReferenceCycle(target.to_string()));
                }
                match self.node(target, depth + 1) {
                    Ok(found) => self.substitute(found, depth + 1),
                    Err(DocumentError::NotFound(_)) => {
                        Ok(Value::Incomplete(flowrun_types::Kind::Top))
                    }
                    Err(e) => Err(e),
                }
            }
            Value::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| self.substitute(item, depth))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Struct(fields) => {
                let mut out = std::collections::BTreeMap::new();
                for (name, field) in fields {
                    out.insert(name.clone(), self.substitute(field, depth)?);
                }
                Ok(Value::Struct(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Compute the result of unifying `incoming` into `existing` without
    /// mutating the tree. References in the existing tree are checked
    /// against their targets and kept unless the merge makes them concrete.
    fn merge(
        &self,
        existing: Option<&Value>,
        incoming: &Value,
        at: &Path,
    ) -> Result<Value, DocumentError> {
        match (existing, incoming) {
            (None, v) => Ok(v.clone()),
            (Some(Value::Ref(target)), v) => {
                let resolved = self.substitute(&Value::Ref(target.clone()), 0)?;
                let unified = resolved.unify(v, at)?;
                if unified == resolved || !unified.is_concrete() {
                    Ok(Value::Ref(target.clone()))
                } else {
                    Ok(unified)
                }
            }
            (Some(Value::Struct(ours)), Value::Struct(theirs)) => {
                let mut merged = ours.clone();
                for (name, field) in theirs {
                    let next = self.merge(ours.get(name), field, &at.child(name.as_str()))?;
                    merged.insert(name.clone(), next);
                }
                Ok(Value::Struct(merged))
            }
            (Some(Value::List(ours)), Value::List(theirs)) if ours.len() == theirs.len() => {
                let items = ours
                    .iter()
                    .zip(theirs.iter())
                    .enumerate()
                    .map(|(i, (a, b))| self.merge(Some(a), b, &at.index(i)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(items))
            }
            (Some(ours), v) => ours.unify(v, at),
        }
    }

    /// Replace the node at `path`, creating intermediate structs.
    fn set(&mut self, path: &Path, value: Value) -> Result<(), DocumentError> {
        let mut cur = &mut self.root;
        for (i, sel) in path.selectors().iter().enumerate() {
            let here = || Path::from_selectors(path.selectors()[..i].to_vec()).to_string();
            if matches!(
                cur,
                Value::Incomplete(flowrun_types::Kind::Top | flowrun_types::Kind::Struct)
            ) && matches!(sel, Selector::Field(_))
            {
                *cur = Value::empty_struct();
            }
            cur = match (cur, sel) {
                (Value::Struct(fields), Selector::Field(name)) => fields
                    .entry(name.clone())
                    .or_insert_with(|| Value::Incomplete(flowrun_types::Kind::Top)),
                (Value::List(items), Selector::Index(idx)) => {
                    let len = items.len();
                    items.get_mut(*idx).ok_or_else(|| {
                        DocumentError::InvalidPath(format!(
                            "index {idx} out of range (len {len}) at '{}'",
                            here()
                        ))
                    })?
                }
                (Value::Ref(_), _) => {
                    return Err(DocumentError::InvalidPath(format!(
                        "cannot fill through reference at '{}'",
                        here()
                    )));
                }
                (other, sel) => {
                    return Err(DocumentError::InvalidPath(format!(
                        "cannot select '{sel}' from {} at '{}'",
                        other.kind(),
                        here()
                    )));
                }
            };
        }
        *cur = value;
        Ok(())
    }
}

fn step<'a>(value: &'a Value, sel: &Selector) -> Option<&'a Value> {
    match (value, sel) {
        (Value::Struct(fields), Selector::Field(name)) => fields.get(name),
        (Value::List(items), Selector::Index(i)) => items.get(*i),
        _ => None,
    }
}

impl Document for TreeDocument {
    fn lookup(&self, path: &Path) -> Result<Value, DocumentError> {
        if let Some(found) = self.raw(path) {
            return Ok(found.clone());
        }
        self.node(path, 0).cloned()
    }

    fn resolve(&self, path: &Path) -> Result<Value, DocumentError> {
        let found = self.node(path, 0)?;
        self.substitute(found, 0)
    }

    fn is_concrete(&self, path: &Path) -> bool {
        self.resolve(path).map(|v| v.is_concrete()).unwrap_or(false)
    }

    fn references(&self, path: &Path) -> Result<Vec<Reference>, DocumentError> {
        let canonical = self.canonical(path);
        let found = self
            .raw(&canonical)
            .ok_or_else(|| DocumentError::NotFound(path.to_string()))?;
        let mut refs = Vec::new();
        found.walk_refs(&canonical, &mut |at, target| {
            refs.push(Reference {
                at: at.clone(),
                target: target.clone(),
            });
        });
        Ok(refs)
    }

    fn canonical(&self, path: &Path) -> Path {
        let mut current = path.clone();
        for _ in 0..MAX_REFERENCE_DEPTH {
            let mut rewritten = None;
            let mut cur = &self.root;
            for (i, sel) in current.selectors().iter().enumerate() {
                match step(cur, sel) {
                    Some(Value::Ref(target)) if i + 1 < current.len() => {
                        let rest = Path::from_selectors(current.selectors()[i + 1..].to_vec());
                        rewritten = Some(target.join(&rest));
                        break;
                    }
                    Some(next) => cur = next,
                    None => break,
                }
            }
            match rewritten {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    fn fill(&mut self, path: &Path, value: &Value) -> Result<(), DocumentError> {
        let merged = self.merge(self.raw(path), value, path)?;
        self.set(path, merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_types::Kind;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> TreeDocument {
        TreeDocument::new(Value::from_json(json).unwrap())
    }

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn resolve_substitutes_references() {
        let d = doc(json!({
            "name": "world",
            "greet": { "text": { "$ref": "name" } }
        }));
        let greet = d.resolve(&p("greet")).unwrap();
        assert_eq!(greet.get("text"), Some(&Value::string("world")));
        // lookup leaves the reference alone
        let raw = d.lookup(&p("greet.text")).unwrap();
        assert_eq!(raw, Value::reference("name"));
    }

    #[test]
    fn lookup_follows_intermediate_references() {
        let d = doc(json!({
            "alias": { "$ref": "real" },
            "real": { "x": 1 }
        }));
        assert_eq!(d.resolve(&p("alias.x")).unwrap(), Value::Int(1));
        assert_eq!(d.canonical(&p("alias.x")), p("real.x"));
        assert_eq!(d.canonical(&p("real.x")), p("real.x"));
    }

    #[test]
    fn reference_cycle_is_reported() {
        let d = doc(json!({ "a": { "$ref": "b" }, "b": { "$ref": "a" } }));
        assert!(matches!(
            d.resolve(&p("a")),
            Err(DocumentError::ReferenceCycle(_))
        ));
        assert!(!d.is_concrete(&p("a")));
    }

    #[test]
    fn concreteness_follows_references() {
        let d = doc(json!({
            "ask": { "response": { "$incomplete": "string" } },
            "echo": { "text": { "$ref": "ask.response" } },
            "done": { "text": "fixed" }
        }));
        assert!(!d.is_concrete(&p("ask.response")));
        assert!(!d.is_concrete(&p("echo")));
        assert!(d.is_concrete(&p("done")));
        assert!(!d.is_concrete(&p("missing")));
    }

    #[test]
    fn references_report_location_and_target() {
        let d = doc(json!({
            "t": { "a": { "$ref": "x" }, "b": [ { "$ref": "y.z" } ] }
        }));
        let refs = d.references(&p("t")).unwrap();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].at, p("t.a"));
        assert_eq!(refs[0].target, p("x"));
        assert_eq!(refs[1].at, p("t.b.0"));
        assert_eq!(refs[1].target, p("y.z"));
    }

    #[test]
    fn fill_unifies_into_incomplete_slots() {
        let mut d = doc(json!({
            "ask": { "prompt": "name?", "response": { "$incomplete": "string" } }
        }));
        d.fill(&p("ask"), &Value::structure([("response", Value::string("bob"))]))
            .unwrap();
        assert_eq!(d.resolve(&p("ask.response")).unwrap(), Value::string("bob"));
        assert_eq!(d.resolve(&p("ask.prompt")).unwrap(), Value::string("name?"));
        assert!(d.is_concrete(&p("ask")));
    }

    #[test]
    fn fill_conflict_leaves_document_untouched() {
        let mut d = doc(json!({ "t": { "out": "a", "n": { "$incomplete": "int" } } }));
        let before = d.clone();
        let err = d
            .fill(
                &p("t"),
                &Value::structure([("n", Value::Int(1)), ("out", Value::string("b"))]),
            )
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(d, before);
    }

    #[test]
    fn fill_creates_missing_structure() {
        let mut d = doc(json!({}));
        d.fill(&p("a.b.c"), &Value::Int(3)).unwrap();
        assert_eq!(d.resolve(&p("a.b.c")).unwrap(), Value::Int(3));
    }

    #[test]
    fn fill_keeps_reference_when_target_agrees() {
        let mut d = doc(json!({
            "name": "bob",
            "t": { "who": { "$ref": "name" } }
        }));
        d.fill(&p("t"), &Value::structure([("who", Value::string("bob"))]))
            .unwrap();
        assert_eq!(d.lookup(&p("t.who")).unwrap(), Value::reference("name"));

        let err = d
            .fill(&p("t"), &Value::structure([("who", Value::string("alice"))]))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn fill_through_reference_to_incomplete_target_replaces_it() {
        let mut d = doc(json!({
            "slot": { "$incomplete": "string" },
            "t": { "who": { "$ref": "slot" } }
        }));
        d.fill(&p("t"), &Value::structure([("who", Value::string("carol"))]))
            .unwrap();
        assert_eq!(d.lookup(&p("t.who")).unwrap(), Value::string("carol"));
        assert_eq!(d.lookup(&p("slot")).unwrap(), Value::Incomplete(Kind::String));
    }

    #[test]
    fn fill_rejects_out_of_range_index() {
        let mut d = doc(json!({ "l": [1] }));
        let err = d.fill(&p("l.3"), &Value::Int(1)).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPath(_)));
    }
}
