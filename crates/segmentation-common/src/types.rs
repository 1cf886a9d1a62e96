use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned user identity.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

/// Internal row id of a segment. Segments are addressed by slug everywhere else.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(i64);

macro_rules! impl_id_type {
    ($t:ty) => {
        impl $t {
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $t {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

impl_id_type!(UserId);
impl_id_type!(SegmentId);

#[cfg(test)]
mod tests {
    use super::UserId;

    #[test]
    fn user_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&UserId::new(42)).unwrap();
        assert_eq!(json, "42");

        let back: UserId = serde_json::from_str("7").unwrap();
        assert_eq!(back.get(), 7);
    }
}
