//! Request parameters.
//!
//! # Responsibilities
//! - Hold the merged parameter map for a request
//! - Look keys up exactly first, then ASCII case-insensitively
//! - Expose nested objects with the same lookup rules
//!
//! # Data Flow
//! ```text
//! query string ──┐
//! form / JSON ───┼──▶ ParamsMap (later sources override earlier ones)
//! route captures ┘
//! ```
//!
//! # Design Decisions
//! - Keys keep the spelling they arrived with; only lookup is relaxed
//! - Inserting a key replaces any entry that differs only by ASCII case

pub mod parser;

use std::collections::HashMap;
use std::ops::Index;

use serde::Serialize;
use serde_json::{Map, Value};

pub use parser::{body_kind, parse_form, parse_query, BodyKind, ParsedParams};

static NULL: Value = Value::Null;

fn lookup<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

/// Merged request parameters.
///
/// `folded` maps each ASCII-lowercased key to the spelling stored in
/// `inner`, so case-insensitive lookup and replacement stay constant time.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ParamsMap {
    inner: Map<String, Value>,
    #[serde(skip)]
    folded: HashMap<String, String>,
}

fn fold_index(inner: &Map<String, Value>) -> HashMap<String, String> {
    inner
        .keys()
        .map(|key| (key.to_ascii_lowercase(), key.clone()))
        .collect()
}

impl PartialEq for ParamsMap {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl ParamsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing JSON object.
    pub fn from_map(inner: Map<String, Value>) -> Self {
        let folded = fold_index(&inner);
        Self { inner, folded }
    }

    /// Value for `key`, matching exactly first and then case-insensitively.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key).or_else(|| {
            self.folded
                .get(&key.to_ascii_lowercase())
                .and_then(|stored| self.inner.get(stored))
        })
    }

    /// String value for `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Nested object view for `key`.
    pub fn object(&self, key: &str) -> Option<Params<'_>> {
        self.get(key).and_then(Value::as_object).map(Params)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert a value, replacing any key that differs only by ASCII case.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        let replaced = match self.folded.insert(key.to_ascii_lowercase(), key.clone()) {
            Some(old) if old != key => self.inner.remove(&old),
            _ => None,
        };
        self.inner.insert(key, value).or(replaced)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let folded = key.to_ascii_lowercase();
        let removed = match self.inner.remove(key) {
            Some(value) => Some(value),
            None => {
                let stored = self.folded.get(&folded)?.clone();
                let value = self.inner.remove(&stored);
                self.folded.remove(&folded);
                return value;
            }
        };
        if self.folded.get(&folded).is_some_and(|stored| stored == key) {
            self.folded.remove(&folded);
            // Maps built with from_map may hold several case variants.
            if let Some(variant) = self
                .inner
                .keys()
                .find(|candidate| candidate.eq_ignore_ascii_case(key))
            {
                self.folded.insert(folded, variant.clone());
            }
        }
        removed
    }

    /// Merge `other` into `self`; values from `other` win.
    pub fn merge(&mut self, other: Map<String, Value>) {
        for (key, value) in other {
            self.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.inner
    }

    /// The parameters as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.inner.clone())
    }
}

impl Index<&str> for ParamsMap {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

impl From<ParamsMap> for Value {
    fn from(params: ParamsMap) -> Self {
        Value::Object(params.inner)
    }
}

/// Borrowed view over a nested parameter object.
#[derive(Debug, Clone, Copy)]
pub struct Params<'a>(&'a Map<String, Value>);

impl<'a> Params<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        lookup(self.0, key)
    }

    pub fn get_str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn object(&self, key: &str) -> Option<Params<'a>> {
        self.get(key).and_then(Value::as_object).map(Params)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<&str> for Params<'_> {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}
