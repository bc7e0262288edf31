use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value, json};
use sha2::Sha256;
use thiserror::Error;

use crate::config::{StorageConfig, mb_to_bytes};

type HmacSha256 = Hmac<Sha256>;

/// How long a presigned upload form stays valid.
pub const POST_POLICY_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct PresignedPostRequest {
    /// Object key the client uploads to.
    pub file_path: String,
    pub file_type: Option<String>,
    pub max_file_size_mb: Option<u64>,
}

/// A browser-form upload target: POST `form_data` plus the file to `post_url`.
#[derive(Debug, Clone, PartialEq)]
pub struct PresignedPost {
    pub post_url: String,
    pub form_data: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to sign upload policy: {0}")]
    Signing(String),
    #[error("upload size limit of {0} MB is too large")]
    SizeLimitOverflow(u64),
    #[error("failed to encode upload policy: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[async_trait]
pub trait PresignedPostGenerator: Send + Sync {
    async fn generate(
        &self,
        config: &StorageConfig,
        request: &PresignedPostRequest,
    ) -> Result<PresignedPost, StorageError>;
}

impl std::fmt::Debug for dyn PresignedPostGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PresignedPostGenerator")
    }
}

/// Signs S3 POST policies (AWS Signature Version 4) without talking to the
/// storage service.
#[derive(Debug, Clone, Default)]
pub struct S3PostPolicySigner;

#[async_trait]
impl PresignedPostGenerator for S3PostPolicySigner {
    async fn generate(
        &self,
        config: &StorageConfig,
        request: &PresignedPostRequest,
    ) -> Result<PresignedPost, StorageError> {
        self.sign_at(config, request, Utc::now())
    }
}

impl S3PostPolicySigner {
    pub fn sign_at(
        &self,
        config: &StorageConfig,
        request: &PresignedPostRequest,
        now: DateTime<Utc>,
    ) -> Result<PresignedPost, StorageError> {
        let short_date = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = format!(
            "{}/{short_date}/{}/s3/aws4_request",
            config.access_key, config.region
        );
        let expiration = (now + Duration::seconds(POST_POLICY_TTL_SECS))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut conditions = vec![
            json!({ "bucket": config.bucket }),
            json!({ "key": request.file_path }),
        ];
        if let Some(file_type) = &request.file_type {
            conditions.push(json!({ "Content-Type": file_type }));
        }
        if let Some(max_mb) = request.max_file_size_mb {
            let max_bytes = mb_to_bytes(max_mb).ok_or(StorageError::SizeLimitOverflow(max_mb))?;
            conditions.push(json!(["content-length-range", 0, max_bytes]));
        }
        conditions.push(json!({ "x-amz-date": amz_date }));
        conditions.push(json!({ "x-amz-algorithm": "AWS4-HMAC-SHA256" }));
        conditions.push(json!({ "x-amz-credential": credential }));

        let policy = json!({ "expiration": expiration, "conditions": conditions });
        let encoded_policy = STANDARD.encode(serde_json::to_vec(&policy)?);

        let signing_key = signing_key(&config.secret_key, &short_date, &config.region)?;
        let signature = hex(&hmac(&signing_key, encoded_policy.as_bytes())?);

        let mut form_data = Map::new();
        form_data.insert("bucket".into(), config.bucket.clone().into());
        form_data.insert("key".into(), request.file_path.clone().into());
        if let Some(file_type) = &request.file_type {
            form_data.insert("Content-Type".into(), file_type.clone().into());
        }
        form_data.insert("x-amz-date".into(), amz_date.into());
        form_data.insert("x-amz-algorithm".into(), "AWS4-HMAC-SHA256".into());
        form_data.insert("x-amz-credential".into(), credential.into());
        form_data.insert("policy".into(), encoded_policy.into());
        form_data.insert("x-amz-signature".into(), signature.into());

        Ok(PresignedPost {
            post_url: config.bucket_url(),
            form_data,
        })
    }
}

fn signing_key(secret: &str, short_date: &str, region: &str) -> Result<Vec<u8>, StorageError> {
    let date_key = hmac(format!("AWS4{secret}").as_bytes(), short_date.as_bytes())?;
    let region_key = hmac(&date_key, region.as_bytes())?;
    let service_key = hmac(&region_key, b"s3")?;
    hmac(&service_key, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| StorageError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
