//! Encrypted secret store for database passwords.
//!
//! Catalog rows only carry secret names; the values live here, encrypted
//! with AES-256-GCM. The pipeline reads secrets; writes happen only through
//! the engine/database CRUD paths.

use crate::models::errors::BackupError;
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use sqlx::SqlitePool;
use std::env;

/// Encryption key size (32 bytes for AES-256)
const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM (12 bytes)
const NONCE_SIZE: usize = 12;

pub struct SecretStore {
    pool: SqlitePool,
    encryption_key: Vec<u8>,
}

impl SecretStore {
    pub fn new(pool: SqlitePool) -> Result<Self, BackupError> {
        let encryption_key = Self::get_or_generate_key()?;
        Ok(Self {
            pool,
            encryption_key,
        })
    }

    /// Build a store with an explicit key. Used by tests.
    pub fn with_key(pool: SqlitePool, key: Vec<u8>) -> Result<Self, BackupError> {
        if key.len() != KEY_SIZE {
            return Err(BackupError::Storage(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }
        Ok(Self {
            pool,
            encryption_key: key,
        })
    }

    fn get_or_generate_key() -> Result<Vec<u8>, BackupError> {
        if let Ok(key_base64) = env::var("SECRET_ENCRYPTION_KEY") {
            let key = general_purpose::STANDARD
                .decode(&key_base64)
                .map_err(|e| BackupError::Storage(format!("invalid encryption key format: {}", e)))?;
            if key.len() != KEY_SIZE {
                return Err(BackupError::Storage(format!(
                    "encryption key must be {} bytes, got {}",
                    KEY_SIZE,
                    key.len()
                )));
            }
            return Ok(key);
        }

        // Development fallback: generate a key and tell the operator to pin it.
        tracing::warn!("SECRET_ENCRYPTION_KEY not set, generating temporary key");
        let mut key = vec![0u8; KEY_SIZE];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut key);

        let key_base64 = general_purpose::STANDARD.encode(&key);
        tracing::warn!(
            "Generated encryption key (add to .env): SECRET_ENCRYPTION_KEY={}",
            key_base64
        );

        Ok(key)
    }

    fn encrypt(&self, plaintext: &str) -> Result<String, BackupError> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| BackupError::Storage(format!("failed to create cipher: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| BackupError::Storage(format!("encryption failed: {}", e)))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(&combined))
    }

    fn decrypt(&self, encrypted: &str) -> Result<String, BackupError> {
        let cipher = Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| BackupError::Storage(format!("failed to create cipher: {}", e)))?;

        let combined = general_purpose::STANDARD
            .decode(encrypted)
            .map_err(|e| BackupError::Storage(format!("invalid encrypted data format: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(BackupError::Storage("encrypted data too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| BackupError::Storage(format!("decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| BackupError::Storage(format!("invalid UTF-8 in decrypted data: {}", e)))
    }

    /// Store or replace a secret.
    pub async fn set_secret(&self, name: &str, value: &str) -> Result<(), BackupError> {
        let encrypted = self.encrypt(value)?;
        let now = crate::utils::now_utc().to_string();
        sqlx::query(
            "INSERT INTO secrets (name, value_encrypted, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (name) DO UPDATE SET
                 value_encrypted = excluded.value_encrypted,
                 updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(&encrypted)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_secret(&self, name: &str) -> Result<Option<String>, BackupError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT value_encrypted FROM secrets WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|encrypted| self.decrypt(&encrypted)).transpose()
    }

    pub async fn delete_secret(&self, name: &str) -> Result<bool, BackupError> {
        let result = sqlx::query("DELETE FROM secrets WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
