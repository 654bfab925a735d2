use super::{encode, encode::encode_into, FormatError};

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    /// An empty dictionary, to be filled with [`Value::insert`].
    pub fn dict() -> Self {
        Self::Dict(Vec::new())
    }

    pub fn string(s: &str) -> Self {
        Self::Bytes(s.as_bytes().to_vec())
    }

    /// Builder-style insert for dictionaries. Replaces an existing key in
    /// place, so the original position is kept. No-op on other variants.
    pub fn insert(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Self::Dict(entries) = &mut self {
            let value = value.into();
            match entries.iter_mut().find(|(k, _)| k.as_slice() == key.as_bytes()) {
                Some((_, v)) => *v = value,
                None => entries.push((key.as_bytes().to_vec(), value)),
            }
        }
        self
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The byte string as UTF-8, if it is valid.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Lookup of a dictionary key. Returns `None` for other variants.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k.as_slice() == key.as_bytes())
            .map(|(_, v)| v)
    }

    /// Same as [`Value::get`] but for a field that must exist as an integer.
    pub fn int_field(&self, key: &'static str) -> Result<i64, FormatError> {
        self.get(key)
            .and_then(Value::as_int)
            .ok_or(FormatError::MissingField(key, "integer"))
    }

    /// Same as [`Value::get`] but for a field that must exist as bytes.
    pub fn bytes_field(&self, key: &'static str) -> Result<&[u8], FormatError> {
        self.get(key)
            .and_then(Value::as_bytes)
            .ok_or(FormatError::MissingField(key, "byte string"))
    }

    /// Same as [`Value::get`] but for a field that must be a UTF-8 string.
    pub fn str_field(&self, key: &'static str) -> Result<&str, FormatError> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or(FormatError::MissingField(key, "string"))
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self)
    }

    /// Append the encoding to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        encode_into(self, buf)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Values above `i64::MAX` saturate.
impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::Integer(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Bytes(value.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}
