//! Ordered call arguments
//!
//! Every M2M method takes named arguments. Call sites list them as ordered
//! `(name, value)` pairs which are collapsed into the JSON `params` object.

use crate::ProtocolError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Ordered list of named arguments for one call
#[derive(Debug, Default)]
pub struct Params {
    pairs: Vec<(String, Value)>,
    /// First failure seen while building; reported by `into_map`
    error: Option<ProtocolError>,
}

impl Params {
    /// Create an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-encoded pairs
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            error: None,
        }
    }

    /// Append an argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let name = name.into();
        match serde_json::to_value(value) {
            Ok(value) => self.pairs.push((name, value)),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(ProtocolError::Serialization(format!(
                        "argument {:?}: {}",
                        name, e
                    )));
                }
            }
        }
        self
    }

    /// Append an argument only when `value` is `Some`
    pub fn opt_arg(self, name: impl Into<String>, value: Option<impl Serialize>) -> Self {
        match value {
            Some(value) => self.arg(name, value),
            None => self,
        }
    }

    /// Number of arguments collected so far
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether no arguments were given
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Collapse into the request's parameter object
    pub fn into_map(self) -> Result<Map<String, Value>, ProtocolError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let mut map = Map::with_capacity(self.pairs.len());
        for (name, value) in self.pairs {
            if map.contains_key(&name) {
                return Err(ProtocolError::DuplicateArgument(name));
            }
            map.insert(name, value);
        }
        Ok(map)
    }
}
