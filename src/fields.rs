use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What is known about an uploaded file once it has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDescriptor {
    /// The file name the client sent.
    pub name: String,
    /// The declared `Content-Transfer-Encoding` of the part.
    pub encoding: String,
    /// The declared `Content-Type` of the part.
    pub mime_type: Option<String>,
    /// Bytes written to the sink.
    pub size: u64,
    /// Where the bytes landed, for file system sinks only.
    pub stored_path: Option<PathBuf>,
}

impl FileDescriptor {
    /// The file system path of the stored file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.stored_path.as_deref()
    }
}

/// One value received under a field name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A plain form field.
    Text(String),
    /// A file part.
    File(FileDescriptor),
    /// A value returned by an `OnFile` hook in place of the file.
    Value(serde_json::Value),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileDescriptor> {
        match self {
            FieldValue::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// The values of one field name: a scalar until a second value arrives.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldEntry {
    Single(FieldValue),
    List(Vec<FieldValue>),
}

impl FieldEntry {
    fn push(&mut self, value: FieldValue) {
        match self {
            FieldEntry::List(values) => values.push(value),
            FieldEntry::Single(_) => {
                if let FieldEntry::Single(first) = std::mem::replace(self, FieldEntry::List(Vec::new())) {
                    *self = FieldEntry::List(vec![first, value]);
                }
            }
        }
    }

    /// The first value received.
    pub fn first(&self) -> Option<&FieldValue> {
        match self {
            FieldEntry::Single(value) => Some(value),
            FieldEntry::List(values) => values.first(),
        }
    }

    /// All values in arrival order.
    pub fn values(&self) -> &[FieldValue] {
        match self {
            FieldEntry::Single(value) => std::slice::from_ref(value),
            FieldEntry::List(values) => values,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FieldEntry::List(_))
    }
}

/// Received fields by name, in the order names first appeared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, FieldEntry)>,
    index: HashMap<String, usize>,
}

impl Fields {
    pub fn new() -> Fields {
        Fields::default()
    }

    /// Records a value. The first value of a name is kept as a scalar, the
    /// second turns the entry into a list and later ones are appended.
    ///
    /// # Examples
    ///
    /// ```
    /// use intake::{FieldEntry, FieldValue, Fields};
    ///
    /// let mut fields = Fields::new();
    /// fields.insert("tag", FieldValue::Text("a".into()));
    /// assert!(!fields.get("tag").unwrap().is_list());
    ///
    /// fields.insert("tag", FieldValue::Text("b".into()));
    /// assert_eq!(fields.get("tag").unwrap().values().len(), 2);
    /// ```
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&idx) => self.entries[idx].1.push(value),
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, FieldEntry::Single(value)));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx].1)
    }

    /// The first text value of `name`.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldEntry::first).and_then(FieldValue::as_text)
    }

    /// The first file stored under `name`.
    pub fn file(&self, name: &str) -> Option<&FileDescriptor> {
        self.get(name).and_then(FieldEntry::first).and_then(FieldValue::as_file)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of distinct names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }
}

impl Serialize for Fields {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_owned())
    }

    #[test]
    fn test_scalar_then_list_promotion() {
        let mut fields = Fields::new();
        fields.insert("a", text("1"));
        fields.insert("b", text("x"));
        fields.insert("a", text("2"));
        fields.insert("a", text("3"));

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("b"), Some(&FieldEntry::Single(text("x"))));
        assert_eq!(fields.get("a"), Some(&FieldEntry::List(vec![text("1"), text("2"), text("3")])));
        assert_eq!(fields.text("a"), Some("1"));

        let names: Vec<&str> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_mixed_values_share_a_name() {
        let mut fields = Fields::new();
        let file = FileDescriptor {
            name: "a.txt".to_owned(),
            encoding: "7bit".to_owned(),
            mime_type: Some("text/plain".to_owned()),
            size: 3,
            stored_path: None,
        };
        fields.insert("doc", FieldValue::File(file.clone()));
        fields.insert("doc", text("note"));

        let values = fields.get("doc").unwrap().values();
        assert_eq!(values[0].as_file(), Some(&file));
        assert_eq!(values[1].as_text(), Some("note"));
    }

    #[test]
    fn test_serialize() {
        let mut fields = Fields::new();
        fields.insert("a", text("1"));
        fields.insert("a", text("2"));
        fields.insert("v", FieldValue::Value(serde_json::json!({"id": 7})));

        let json = serde_json::to_value(&fields).unwrap();
        assert_eq!(json, serde_json::json!({"a": ["1", "2"], "v": {"id": 7}}));
    }
}
