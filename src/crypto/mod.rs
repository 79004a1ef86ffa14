//! 聊天内容落库加密：ChaCha20-Poly1305，存储格式为 base64(nonce || ciphertext)。

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;

/// 历史消息解密失败时返回给客户端的占位文本
pub const DECRYPT_PLACEHOLDER: &str = "[Encrypted message]";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("ciphertext too short")]
    CiphertextTooShort,

    #[error("invalid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("plaintext is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Clone)]
pub struct MessageCipher {
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageCipher(..)")
    }
}

impl MessageCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let data = BASE64.decode(encoded)?;
        if data.len() < NONCE_SIZE {
            return Err(CryptoError::CiphertextTooShort);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// 读取历史时使用：解密失败不影响整批消息
    pub fn decrypt_or_placeholder(&self, encoded: &str) -> String {
        match self.decrypt(encoded) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("Failed to decrypt stored message: {}", e);
                DECRYPT_PLACEHOLDER.to_string()
            }
        }
    }
}

pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<String, CryptoError> {
    MessageCipher::new(key)?.encrypt(plaintext)
}

pub fn decrypt(ciphertext: &str, key: &[u8]) -> Result<String, CryptoError> {
    MessageCipher::new(key)?.decrypt(ciphertext)
}
