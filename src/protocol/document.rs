//! Minimal BSON document model
//!
//! Only what the administrative commands and their replies need: an ordered list of
//! key/value pairs and the element types a server puts into command replies.

use std::fmt;

/// A BSON value
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Embedded document
    Document(Document),
    /// Array
    Array(Vec<Bson>),
    /// Binary data with subtype
    Binary {
        /// Binary subtype
        subtype: u8,
        /// Raw bytes
        bytes: Vec<u8>,
    },
    /// ObjectId
    ObjectId([u8; 12]),
    /// Boolean
    Boolean(bool),
    /// UTC datetime in milliseconds since the epoch
    DateTime(i64),
    /// Null
    Null,
    /// 32-bit integer
    Int32(i32),
    /// Internal replication timestamp
    Timestamp(u64),
    /// 64-bit integer
    Int64(i64),
    /// 128-bit decimal (kept as raw bytes)
    Decimal128([u8; 16]),
    /// Min key
    MinKey,
    /// Max key
    MaxKey,
}

impl Bson {
    /// Numeric value as `i64`, accepting any of the numeric element types
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::Int32(v) => Some(i64::from(*v)),
            Bson::Int64(v) => Some(*v),
            Bson::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// String slice, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Embedded document, if this is a document
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    /// Array elements, if this is an array
    pub fn as_array(&self) -> Option<&[Bson]> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Binary payload, if this is binary data
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Bson::Binary { bytes, .. } => Some(bytes),
            _ => None,
        }
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_string())
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl From<Vec<Bson>> for Bson {
    fn from(v: Vec<Bson>) -> Self {
        Bson::Array(v)
    }
}

/// Ordered BSON document.
///
/// Command documents are order sensitive: the first key names the command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, replacing an existing key in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up a value by key
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// String value for `key`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    /// Boolean value for `key`
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    /// Numeric value for `key` as `i64`
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    /// Embedded document for `key`
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    /// Array for `key`
    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        self.get(key).and_then(Bson::as_array)
    }

    /// Binary payload for `key`
    pub fn get_binary(&self, key: &str) -> Option<&[u8]> {
        self.get(key).and_then(Bson::as_binary)
    }

    /// Name of the first key (the command name for command documents)
    pub fn first_key(&self) -> Option<&str> {
        self.entries.first().map(|(k, _)| k.as_str())
    }

    /// Iterate over entries in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: ", k)?;
            match v {
                Bson::String(s) => write!(f, "{:?}", s)?,
                Bson::Document(d) => write!(f, "{}", d)?,
                Bson::Binary { bytes, .. } => write!(f, "<{} bytes>", bytes.len())?,
                other => write!(f, "{:?}", other)?,
            }
        }
        f.write_str("}")
    }
}
