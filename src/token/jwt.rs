use super::{Error, SessionClaims};
use base64ct::{Base64UrlUnpadded, Encoding};
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::traits::PrivateKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct JwtHeader {
    alg: String,
    #[serde(default)]
    typ: String,
}

impl JwtHeader {
    fn rs256() -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// RSA PKCS#1 v1.5 algorithms accepted by `verify`. Everything else, including
/// PSS and HMAC, is refused before the signature is examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsaAlgorithm {
    Rs256,
    Rs384,
    Rs512,
}

impl RsaAlgorithm {
    fn from_alg(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::Rs256),
            "RS384" => Some(Self::Rs384),
            "RS512" => Some(Self::Rs512),
            _ => None,
        }
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes =
        Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::InvalidToken("invalid base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidToken("invalid json"))
}

fn decode_private_key(pem_or_der: &[u8], passphrase: Option<&str>) -> Result<RsaPrivateKey, Error> {
    if pem_or_der.starts_with(b"-----BEGIN") {
        let s = std::str::from_utf8(pem_or_der).map_err(|_| Error::KeyParse)?;
        if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
            return RsaPrivateKey::from_pkcs8_encrypted_pem(s, passphrase.as_bytes())
                .map_err(|_| Error::KeyParse);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs8_pem(s) {
            return Ok(k);
        }
        if let Ok(k) = RsaPrivateKey::from_pkcs1_pem(s) {
            return Ok(k);
        }
        return Err(Error::KeyParse);
    }

    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        return RsaPrivateKey::from_pkcs8_encrypted_der(pem_or_der, passphrase.as_bytes())
            .map_err(|_| Error::KeyParse);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs8_der(pem_or_der) {
        return Ok(k);
    }
    if let Ok(k) = RsaPrivateKey::from_pkcs1_der(pem_or_der) {
        return Ok(k);
    }
    Err(Error::KeyParse)
}

/// Signs and verifies session tokens with the server RSA keypair.
#[derive(Clone)]
pub struct TokenCodec {
    private_key: Option<RsaPrivateKey>,
    public_key: RsaPublicKey,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("can_sign", &self.can_sign())
            .field("private_key", &"***")
            .finish()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let public_key = private_key.to_public_key();
        Self {
            private_key: Some(private_key),
            public_key,
        }
    }

    /// Load a PKCS#8 (optionally passphrase protected) or PKCS#1 private key.
    ///
    /// # Errors
    ///
    /// Returns `KeyParse` if the key cannot be decoded.
    pub fn from_pem(pem_or_der: &[u8], passphrase: Option<&str>) -> Result<Self, Error> {
        decode_private_key(pem_or_der, passphrase).map(Self::from_private_key)
    }

    /// Verification-only codec.
    ///
    /// # Errors
    ///
    /// Returns `KeyParse` if the key is neither SPKI nor PKCS#1 PEM.
    pub fn from_public_key_pem(pem: &str) -> Result<Self, Error> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|_| Error::KeyParse)?;
        Ok(Self {
            private_key: None,
            public_key,
        })
    }

    /// Generate a fresh keypair.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate(bits: usize) -> Result<Self, Error> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)?;
        Ok(Self::from_private_key(private_key))
    }

    #[must_use]
    pub const fn can_sign(&self) -> bool {
        self.private_key.is_some()
    }

    /// SPKI PEM of the verification key.
    ///
    /// # Errors
    ///
    /// Returns `KeyEncode` if the key cannot be serialized.
    pub fn public_key_pem(&self) -> Result<String, Error> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|_| Error::KeyEncode)
    }

    /// Derive a symmetric key bound to the private key and `label`.
    ///
    /// # Errors
    ///
    /// Returns `SigningKeyUnavailable` for verification-only codecs.
    pub fn derive_key(&self, label: &str) -> Result<[u8; 32], Error> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(Error::SigningKeyUnavailable)?;
        let mut hasher = Sha256::new();
        hasher.update(label.as_bytes());
        hasher.update(private_key.d().to_bytes_be());
        Ok(hasher.finalize().into())
    }

    /// Create an RS256 signed token.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec has no private key, the claims carry no
    /// expiry, or the claims cannot be encoded.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, Error> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or(Error::SigningKeyUnavailable)?;
        if claims.exp == 0 {
            return Err(Error::Signing("claims must carry an expiry"));
        }

        let header_b64 = b64e_json(&JwtHeader::rs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let signing_key = SigningKey::<Sha256>::new(private_key.clone());
        let signature: Signature = signing_key.sign(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and return its claims. Expiry is not checked here.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` for malformed input, `UnsupportedAlgorithm` for
    /// any non RSA PKCS#1 v1.5 `alg`, and `Signature` on mismatch.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::InvalidToken("missing header"))?;
        let claims_b64 = parts.next().ok_or(Error::InvalidToken("missing claims"))?;
        let sig_b64 = parts.next().ok_or(Error::InvalidToken("missing signature"))?;
        if parts.next().is_some() {
            return Err(Error::InvalidToken("too many segments"));
        }

        let header: JwtHeader = b64d_json(header_b64)?;
        let algorithm = RsaAlgorithm::from_alg(&header.alg)
            .ok_or_else(|| Error::UnsupportedAlgorithm(header.alg.clone()))?;

        let signing_input = format!("{header_b64}.{claims_b64}");
        let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64)
            .map_err(|_| Error::InvalidToken("invalid base64url"))?;
        let signature =
            Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::Signature)?;

        let key = self.public_key.clone();
        let verified = match algorithm {
            RsaAlgorithm::Rs256 => {
                VerifyingKey::<Sha256>::new(key).verify(signing_input.as_bytes(), &signature)
            }
            RsaAlgorithm::Rs384 => {
                VerifyingKey::<Sha384>::new(key).verify(signing_input.as_bytes(), &signature)
            }
            RsaAlgorithm::Rs512 => {
                VerifyingKey::<Sha512>::new(key).verify(signing_input.as_bytes(), &signature)
            }
        };
        verified.map_err(|_| Error::Signature)?;

        b64d_json(claims_b64)
    }
}
