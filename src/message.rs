//! Message batches and their parts.
//!
//! A [`Message`] is an ordered batch of [`Part`]s that travel, and are
//! acknowledged, together. Each part is an opaque payload with string metadata.

use std::collections::BTreeMap;

use serde_json::Value;

/// One message unit: an opaque payload plus keyed string metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Part {
    payload: Vec<u8>,
    metadata: BTreeMap<String, String>,
    error: Option<String>,
}

impl Part {
    /// Creates a part holding `payload` with no metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use pipekit::message::Part;
    /// let part = Part::new("hello").with_metadata("source", "greeter");
    /// assert_eq!(part.payload(), b"hello");
    /// ```
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Creates a part whose payload is the JSON encoding of `value`.
    pub fn from_value(value: &Value) -> Self {
        Self::new(value.to_string())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parses the payload as a JSON document.
    pub fn value(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.payload)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn meta_get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Sets a metadata entry, replacing any previous value of `key`.
    pub fn meta_set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn meta_delete(&mut self, key: &str) {
        self.metadata.remove(key);
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_set(key, value);
        self
    }

    /// The processing error this part was flagged with, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Flags the part as failed during processing. The batch keeps moving; it
    /// is up to downstream stages to route or drop flagged parts.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

/// An ordered batch of parts, the unit of acknowledgment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    parts: Vec<Part>,
}

impl Message {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// Creates a batch with one part per payload, in order.
    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        payloads.into_iter().map(Part::new).collect()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Part> {
        self.parts.iter_mut()
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Flags every part of the batch with `error`.
    pub fn set_error(&mut self, error: &str) {
        for part in &mut self.parts {
            part.set_error(error);
        }
    }
}

impl FromIterator<Part> for Message {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Message {
    type Item = Part;
    type IntoIter = std::vec::IntoIter<Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.into_iter()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_last_write_wins() {
        let mut part = Part::new("payload")
            .with_metadata("key", "first")
            .with_metadata("other", "value");
        part.meta_set("key", "second");

        assert_eq!(part.meta_get("key"), Some("second"));
        assert_eq!(part.metadata().len(), 2);

        part.meta_delete("other");
        assert_eq!(part.meta_get("other"), None);
    }

    #[test]
    fn test_structured_payload() {
        let part = Part::from_value(&json!({"x": 7, "nested": {"a": [1, 2]}}));
        assert_eq!(part.value().unwrap()["x"], json!(7));
        assert_eq!(part.value().unwrap()["nested"]["a"][1], json!(2));

        let raw = Part::new("not json");
        assert!(raw.value().is_err());
    }

    #[test]
    fn test_batch_preserves_order() {
        let msg = Message::from_payloads(["a", "b", "c"]);
        assert_eq!(msg.len(), 3);
        let payloads: Vec<&[u8]> = msg.iter().map(Part::payload).collect();
        assert_eq!(payloads, vec![b"a".as_slice(), b"b", b"c"]);
    }

    #[test]
    fn test_batch_error_flags_every_part() {
        let mut msg = Message::from_payloads(["a", "b"]);
        msg.set_error("boom");
        assert!(msg.iter().all(|p| p.error() == Some("boom")));

        msg.get_mut(0).unwrap().clear_error();
        assert_eq!(msg.get(0).unwrap().error(), None);
        assert_eq!(msg.get(1).unwrap().error(), Some("boom"));
    }
}
