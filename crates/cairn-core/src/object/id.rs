use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CairnError, Result};
use crate::hashing::ContentHash;

/// Maximum indirection depth; bounds reader recursion and rejects
/// pathological inputs.
pub const MAX_INDIRECT_LEVELS: u32 = 64;

/// Textual content address of an object.
///
/// `D<hex>` names a single chunk. Each leading `I` adds one level of
/// indirection: fetch the underlying object, parse its JSON table, and
/// present the concatenation of the children (`I<hex>`, `II<hex>`, …).
/// `null` denotes absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectId {
    Null,
    Block { level: u32, hash: ContentHash },
}

impl ObjectId {
    pub fn direct(hash: ContentHash) -> Self {
        ObjectId::Block { level: 0, hash }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ObjectId::Null)
    }

    /// Wrap this ID in one more level of indirection.
    pub fn indirect(&self) -> Result<ObjectId> {
        match self {
            ObjectId::Null => Err(CairnError::InvalidObjectId("null".into())),
            ObjectId::Block { level, hash } => {
                if *level >= MAX_INDIRECT_LEVELS {
                    return Err(CairnError::MalformedData(format!(
                        "indirection depth exceeds {MAX_INDIRECT_LEVELS}"
                    )));
                }
                Ok(ObjectId::Block {
                    level: level + 1,
                    hash: *hash,
                })
            }
        }
    }

    /// Strip one level of indirection.
    pub fn parent(&self) -> Option<ObjectId> {
        match self {
            ObjectId::Block { level, hash } if *level > 0 => Some(ObjectId::Block {
                level: level - 1,
                hash: *hash,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Null => write!(f, "null"),
            ObjectId::Block { level: 0, hash } => write!(f, "D{hash}"),
            ObjectId::Block { level, hash } => {
                for _ in 0..*level {
                    write!(f, "I")?;
                }
                write!(f, "{hash}")
            }
        }
    }
}

impl FromStr for ObjectId {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "null" {
            return Ok(ObjectId::Null);
        }

        if let Some(hex) = s.strip_prefix('D') {
            let hash = ContentHash::from_hex(hex)
                .map_err(|_| CairnError::InvalidObjectId(s.to_string()))?;
            return Ok(ObjectId::Block { level: 0, hash });
        }

        let trimmed = s.trim_start_matches('I');
        let level = (s.len() - trimmed.len()) as u32;
        if level == 0 || level > MAX_INDIRECT_LEVELS || trimmed.is_empty() {
            return Err(CairnError::InvalidObjectId(s.to_string()));
        }
        let hash = ContentHash::from_hex(trimmed)
            .map_err(|_| CairnError::InvalidObjectId(s.to_string()))?;
        Ok(ObjectId::Block { level, hash })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ObjectId::from_str(&s).map_err(D::Error::custom)
    }
}
