// src/document.rs
//! Insertion-ordered field map used for documents and embedded objects.

use crate::value::Value;

/// Ordered field → value mapping
///
/// Field order is the order of first insertion; overwriting a field keeps its
/// position. Lookups are linear, which is the right trade-off for the small
/// field counts documents carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Document { fields: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Document {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Insert or overwrite a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(slot) = self.get_mut(&key) {
            return Some(std::mem::replace(slot, value));
        }
        self.fields.push((key, value));
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    /// The `_id` field, if present
    pub fn id(&self) -> Option<&Value> {
        self.get("_id")
    }

    /// First field, used for single-key operator objects
    pub fn first(&self) -> Option<(&String, &Value)> {
        self.fields.first().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut doc = Document::new();
        for (k, v) in iter {
            doc.insert(k, v);
        }
        doc
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (String, Value)>,
        fn(&'a (String, Value)) -> (&'a String, &'a Value),
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.fields
            .iter()
            .map(split_entry as fn(&'a (String, Value)) -> (&'a String, &'a Value))
    }
}

fn split_entry(entry: &(String, Value)) -> (&String, &Value) {
    (&entry.0, &entry.1)
}
