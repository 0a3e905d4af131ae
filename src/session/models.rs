use serde::{Deserialize, Serialize};

/// Session state carried, encrypted, inside a token's `data` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// client (application) id
    pub cid: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub cat: i64,
    pub eat: i64,
    /// provider token material
    #[serde(default, with = "crate::token::serde_base64")]
    pub data: Vec<u8>,
}

impl Session {
    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        self.eat > 0 && self.eat < now
    }
}
