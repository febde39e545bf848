//! Token codec: JWS signing and verification plus JWE sealing for the
//! self-contained flow envelopes.
//!
//! The signing algorithm is pinned to RS512 so the id_token `at_hash`
//! truncation rule (first half of SHA-512) matches the signature hash. The
//! envelopes are sealed with AES-256-GCM and carry their own validity window
//! so no server-side session state is needed.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Serialize, de::DeserializeOwned};
use shared::error::CommonError;

/// How long a sealed envelope stays decodable.
const ENVELOPE_LIFETIME_MINUTES: i64 = 10;

/// Fixed JWE protected header: direct encryption with AES-256-GCM.
const JWE_PROTECTED_HEADER: &str = r#"{"alg":"dir","enc":"A256GCM"}"#;

/// Expiry wrapper sealed around every envelope payload.
#[derive(serde::Serialize, serde::Deserialize)]
struct SealedClaims<T> {
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    payload: T,
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    sealing_key: [u8; 32],
    envelope_lifetime: Duration,
}

impl TokenIssuer {
    /// Build an issuer from a PKCS#1 RSA private key PEM and a 256-bit
    /// sealing key. Replicas must share both for tokens to interoperate.
    pub fn from_private_key_pem(
        private_key_pem: &str,
        sealing_key: [u8; 32],
    ) -> Result<Self, CommonError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let private_key = RsaPrivateKey::from_pkcs1_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(private_key_pem))
            .map_err(|e| CommonError::InvalidRequest {
                msg: "signing key is not a valid RSA private key".to_string(),
                source: Some(anyhow::anyhow!(e)),
            })?;

        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to encode public key: {e}")))?;

        let encoding_key =
            EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
                CommonError::InvalidRequest {
                    msg: "signing key rejected by JWT backend".to_string(),
                    source: Some(anyhow::anyhow!(e)),
                }
            })?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to load public key: {e}")))?;

        Ok(Self {
            encoding_key,
            decoding_key,
            sealing_key,
            envelope_lifetime: Duration::minutes(ENVELOPE_LIFETIME_MINUTES),
        })
    }

    /// Generate ephemeral key material. Tokens issued with a generated key do
    /// not survive a restart and cannot be verified by other replicas.
    pub fn generate() -> Result<Self, CommonError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to generate RSA key: {e}")))?;

        let private_key_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to encode private key: {e}")))?;

        let mut sealing_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut sealing_key);

        Self::from_private_key_pem(&private_key_pem, sealing_key)
    }

    pub fn with_envelope_lifetime(mut self, lifetime: Duration) -> Self {
        self.envelope_lifetime = lifetime;
        self
    }

    /// Sign a claims object into a compact JWS.
    pub fn sign_jwt<T: Serialize>(&self, claims: &T) -> Result<String, CommonError> {
        encode(&Header::new(Algorithm::RS512), claims, &self.encoding_key)
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("failed to sign token: {e}")))
    }

    /// Verify a compact JWS and deserialize its claims. The expiry claim is
    /// always enforced.
    pub fn verify_jwt<T: DeserializeOwned>(&self, token: &str) -> Result<T, CommonError> {
        let mut validation = Validation::new(Algorithm::RS512);
        validation.validate_aud = false;

        let data = decode::<T>(token, &self.decoding_key, &validation).map_err(|e| {
            CommonError::Authentication {
                msg: "token validation failure".to_string(),
                source: Some(anyhow::anyhow!(e)),
            }
        })?;

        Ok(data.claims)
    }

    /// Seal a payload into a compact JWE with the standard envelope lifetime.
    pub fn encrypt_jwe<T: Serialize>(&self, payload: &T) -> Result<String, CommonError> {
        let now = Utc::now();

        let claims = SealedClaims {
            iat: now.timestamp(),
            exp: (now + self.envelope_lifetime).timestamp(),
            payload,
        };

        let plaintext = serde_json::to_vec(&claims)?;

        let header = URL_SAFE_NO_PAD.encode(JWE_PROTECTED_HEADER);

        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&self.sealing_key);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // The protected header doubles as associated data so tampering with
        // it breaks the tag.
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: header.as_bytes(),
                },
            )
            .map_err(|e| CommonError::Unknown(anyhow::anyhow!("envelope encryption failed: {e}")))?;

        Ok(format!(
            "{header}.{}.{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(&ciphertext)
        ))
    }

    /// Open a compact JWE produced by [`encrypt_jwe`](Self::encrypt_jwe).
    /// Fails on tampering, malformed tokens, and expired envelopes.
    pub fn decrypt_jwe<T: DeserializeOwned>(&self, token: &str) -> Result<T, CommonError> {
        let invalid = |msg: &str| CommonError::InvalidRequest {
            msg: msg.to_string(),
            source: None,
        };

        let parts: Vec<&str> = token.split('.').collect();
        let &[header, nonce, ciphertext] = parts.as_slice() else {
            return Err(invalid("envelope is malformed"));
        };

        let nonce_bytes = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|_| invalid("envelope is malformed"))?;

        if nonce_bytes.len() != 12 {
            return Err(invalid("envelope is malformed"));
        }

        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|_| invalid("envelope is malformed"))?;

        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&self.sealing_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: header.as_bytes(),
                },
            )
            .map_err(|_| invalid("envelope failed to decrypt"))?;

        let claims: SealedClaims<T> =
            serde_json::from_slice(&plaintext).map_err(|_| invalid("envelope is malformed"))?;

        if claims.exp < Utc::now().timestamp() {
            return Err(invalid("envelope has expired"));
        }

        Ok(claims.payload)
    }
}
