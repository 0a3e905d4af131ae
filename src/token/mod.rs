//! Session token codec.
//!
//! Tokens are compact RS256 JWTs. The session they describe travels inside the
//! `data` claim, zlib-compressed and AES-CTR encrypted with a per-user key, so
//! a client can hold its own session state through the OAuth redirect.

mod claims;
mod error;
mod jwt;
mod payload;

pub use claims::{SessionClaims, TokenType};
pub use error::Error;
pub use jwt::TokenCodec;
pub use payload::{decrypt_payload, encrypt_payload};

/// Standard base64 for byte fields in JSON documents.
pub(crate) mod serde_base64 {
    use base64ct::{Base64, Encoding};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(D::Error::custom)
    }
}
