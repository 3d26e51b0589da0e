use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_port: u16,
    /// Secret for verifying the platform's bearer tokens. Token issuance
    /// lives in the authentication service, not here.
    pub auth_token_secret: String,
    /// Dedicated secret for signing patient join links.
    pub join_link_secret: String,
    pub join_link_ttl_hours: i64,
    /// AES-256 key for chat/file/room-token encryption at rest. Sourced from
    /// configuration so decryption survives restarts.
    pub encryption_key: [u8; 32],
    /// Per-connection outbound queue depth before a slow participant is
    /// disconnected.
    pub outbound_queue_size: usize,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/telecare".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .unwrap_or(3000);

        let auth_token_secret = env::var("AUTH_TOKEN_SECRET")
            .unwrap_or_else(|_| "your-secret-key-change-this-in-production".to_string());

        let join_link_secret = env::var("JOIN_LINK_SECRET")
            .unwrap_or_else(|_| "join-link-secret-change-this-in-production".to_string());

        let join_link_ttl_hours = env::var("JOIN_LINK_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let encryption_key = match env::var("TELEMEDICINE_ENCRYPTION_KEY") {
            Ok(encoded) => parse_encryption_key(&encoded)?,
            // Deterministic dev-only key so local restarts keep decrypting.
            Err(_) => derive_dev_key("telecare-dev-encryption-key"),
        };

        let outbound_queue_size = env::var("OUTBOUND_QUEUE_SIZE")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .unwrap_or(64)
            .max(1);

        Ok(Config {
            database_url,
            server_port,
            auth_token_secret,
            join_link_secret,
            join_link_ttl_hours,
            encryption_key,
            outbound_queue_size,
        })
    }
}

fn parse_encryption_key(encoded: &str) -> anyhow::Result<[u8; 32]> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| anyhow!("TELEMEDICINE_ENCRYPTION_KEY is not valid base64"))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("TELEMEDICINE_ENCRYPTION_KEY must decode to exactly 32 bytes"))?;
    Ok(key)
}

fn derive_dev_key(seed: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}
