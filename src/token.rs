//! Session token minting and verification.
//!
//! Not a JWT: the claim set is canonical JSON, HMAC-SHA256'd under the
//! storage-proxy secret, and the token is the two parts base64url-joined with
//! a `.`. There is no algorithm field to negotiate, so a malformed token and
//! an "unknown algorithm" are the same failure mode — both collapse to
//! `InvalidToken`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOp {
    Upload,
    Download,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub op: SessionOp,
    pub volume: String,
    pub vfid: String,
    pub relpath: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    pub exp: i64,
}

pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn mint(&self, claims: &SessionClaims) -> StorageResult<String> {
        let body = serde_json::to_vec(claims)
            .map_err(|e| StorageError::InvalidApiParameters(e.to_string()))?;
        let tag = self.sign(&body)?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(body),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    pub fn verify(&self, token: &str, now: i64) -> StorageResult<SessionClaims> {
        let (body_part, tag_part) = token
            .split_once('.')
            .ok_or_else(|| StorageError::InvalidToken("malformed token".into()))?;

        let body = URL_SAFE_NO_PAD
            .decode(body_part)
            .map_err(|_| StorageError::InvalidToken("malformed token body".into()))?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_part)
            .map_err(|_| StorageError::InvalidToken("malformed token signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| StorageError::InvalidToken("invalid secret".into()))?;
        mac.update(&body);
        mac.verify_slice(&tag)
            .map_err(|_| StorageError::InvalidToken("signature mismatch".into()))?;

        let claims: SessionClaims = serde_json::from_slice(&body)
            .map_err(|_| StorageError::InvalidToken("malformed claims".into()))?;

        if claims.exp < now {
            return Err(StorageError::InvalidToken("token expired".into()));
        }
        match claims.op {
            SessionOp::Upload if claims.session.is_none() || claims.size.is_none() => {
                return Err(StorageError::InvalidToken(
                    "upload token missing session or size".into(),
                ))
            }
            _ => {}
        }

        Ok(claims)
    }

    fn sign(&self, body: &[u8]) -> StorageResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| StorageError::InvalidToken("invalid secret".into()))?;
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
