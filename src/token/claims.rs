use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the login a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    PreLogin,
    Login,
}

impl TokenType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreLogin => "pre_login",
            Self::Login => "login",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pre_login" => Some(Self::PreLogin),
            "login" => Some(Self::Login),
            _ => None,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by a session token.
///
/// `data` holds the encrypted, compressed session; it is opaque to anyone
/// without the matching payload key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "type")]
    pub token_type: TokenType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        with = "super::serde_base64"
    )]
    pub data: Vec<u8>,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub sub: String,
}

impl SessionClaims {
    /// A claim with `exp == 0` never expires.
    #[must_use]
    pub const fn is_expired(&self, now: i64) -> bool {
        self.exp > 0 && self.exp < now
    }

    /// True once the claim is within `window` seconds of expiring.
    #[must_use]
    pub const fn is_near_expiry(&self, now: i64, window: i64) -> bool {
        self.exp > 0 && self.exp - window < now
    }

    #[must_use]
    pub fn is_pre_login(&self) -> bool {
        self.token_type == TokenType::PreLogin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> SessionClaims {
        SessionClaims {
            token_type: TokenType::Login,
            uid: String::new(),
            data: Vec::new(),
            aud: "app1".to_string(),
            exp,
            iat: 1_000,
            jti: "01J0000000000000000000000".to_string(),
            sub: "google".to_string(),
        }
    }

    #[test]
    fn expiry_predicates() {
        assert!(!claims(0).is_expired(5_000));
        assert!(claims(4_999).is_expired(5_000));
        assert!(!claims(5_000).is_expired(5_000));

        assert!(claims(5_100).is_near_expiry(5_000, 200));
        assert!(!claims(5_300).is_near_expiry(5_000, 200));
        assert!(!claims(0).is_near_expiry(5_000, 200));
    }

    #[test]
    fn pre_login_predicate() {
        let mut pre = claims(10);
        assert!(!pre.is_pre_login());
        pre.token_type = TokenType::PreLogin;
        assert!(pre.is_pre_login());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn empty_uid_and_data_are_omitted() {
        let json = serde_json::to_value(claims(10)).unwrap();
        assert_eq!(json["type"], "login");
        assert!(json.get("uid").is_none());
        assert!(json.get("data").is_none());

        let mut with_data = claims(10);
        with_data.uid = "a@b.com".to_string();
        with_data.data = vec![1, 2, 3];
        let json = serde_json::to_value(&with_data).unwrap();
        assert_eq!(json["uid"], "a@b.com");
        assert_eq!(json["data"], "AQID");

        let decoded: SessionClaims = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, with_data);
    }

    #[test]
    fn token_type_names() {
        assert_eq!(TokenType::PreLogin.to_string(), "pre_login");
        assert_eq!(TokenType::parse("login"), Some(TokenType::Login));
        assert_eq!(TokenType::parse("admin"), None);
    }
}
