// Owner identity and draft encryption
//
// KeyedIdentity seals drafts with an HMAC-SHA256 counter-mode keystream and an
// HMAC-SHA256 tag over nonce and ciphertext (encrypt-then-MAC), hex encoded.

use crate::errors::CryptoError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 32;

/// The current owner and their private encrypt/decrypt capability
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when nobody is signed in
    fn owner(&self) -> Option<String>;

    async fn encrypt(&self, owner: &str, plaintext: &str) -> Result<String, CryptoError>;

    async fn decrypt(&self, owner: &str, ciphertext: &str) -> Result<String, CryptoError>;
}

/// Identity holding a symmetric secret for its own drafts
#[derive(Clone)]
pub struct KeyedIdentity {
    owner: String,
    encryption_key: [u8; 32],
    authentication_key: [u8; 32],
}

fn mac(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

fn derive(secret: &[u8], label: &[u8]) -> Result<[u8; 32], CryptoError> {
    let digest = mac(secret, &[label])?.finalize().into_bytes();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    Ok(key)
}

impl KeyedIdentity {
    pub fn new(owner: impl Into<String>, secret: &[u8]) -> Result<Self, CryptoError> {
        if secret.len() < 16 {
            return Err(CryptoError::InvalidKey(
                "secret must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Self {
            owner: owner.into(),
            encryption_key: derive(secret, b"scheduled-post/encryption")?,
            authentication_key: derive(secret, b"scheduled-post/authentication")?,
        })
    }

    /// Build from a hex encoded secret
    pub fn from_hex(owner: impl Into<String>, secret_hex: &str) -> Result<Self, CryptoError> {
        let secret = hex::decode(secret_hex.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("secret is not hex: {}", e)))?;
        Self::new(owner, &secret)
    }

    fn check_owner(&self, owner: &str) -> Result<(), CryptoError> {
        if owner != self.owner {
            return Err(CryptoError::WrongOwner(owner.to_string()));
        }
        Ok(())
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) -> Result<(), CryptoError> {
        for (counter, chunk) in data.chunks_mut(BLOCK_LEN).enumerate() {
            let counter = (counter as u64).to_be_bytes();
            let block = mac(&self.encryption_key, &[nonce, &counter])?
                .finalize()
                .into_bytes();
            for (byte, key) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for KeyedIdentity {
    fn owner(&self) -> Option<String> {
        Some(self.owner.clone())
    }

    async fn encrypt(&self, owner: &str, plaintext: &str) -> Result<String, CryptoError> {
        self.check_owner(owner)?;

        let nonce: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let mut body = plaintext.as_bytes().to_vec();
        self.apply_keystream(&nonce, &mut body)?;
        let tag = mac(&self.authentication_key, &[&nonce, &body])?
            .finalize()
            .into_bytes();

        let mut sealed = Vec::with_capacity(NONCE_LEN + body.len() + TAG_LEN);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&body);
        sealed.extend_from_slice(&tag);
        Ok(hex::encode(sealed))
    }

    async fn decrypt(&self, owner: &str, ciphertext: &str) -> Result<String, CryptoError> {
        self.check_owner(owner)?;

        let sealed = hex::decode(ciphertext.trim())
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "ciphertext too short: {} bytes",
                sealed.len()
            )));
        }

        let (nonce, rest) = sealed.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        mac(&self.authentication_key, &[nonce, body])?
            .verify_slice(tag)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let mut plain = body.to_vec();
        self.apply_keystream(nonce, &mut plain)?;
        String::from_utf8(plain).map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))
    }
}

/// Identity used when no owner is signed in
#[derive(Debug, Clone, Copy, Default)]
pub struct SignedOut;

#[async_trait]
impl IdentityProvider for SignedOut {
    fn owner(&self) -> Option<String> {
        None
    }

    async fn encrypt(&self, owner: &str, _plaintext: &str) -> Result<String, CryptoError> {
        Err(CryptoError::WrongOwner(owner.to_string()))
    }

    async fn decrypt(&self, owner: &str, _ciphertext: &str) -> Result<String, CryptoError> {
        Err(CryptoError::WrongOwner(owner.to_string()))
    }
}
