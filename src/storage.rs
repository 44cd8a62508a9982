use async_trait::async_trait;
use aws_sdk_s3 as s3;
use axum::body::Bytes;
use s3::primitives::ByteStream;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object upload failed: {0}")]
    Upload(String),
}

// 1. StorageService Contract
/// StorageService
///
/// Abstract contract for the object storage that keeps uploaded featured images.
/// Handlers only see this trait, so the S3 client can be replaced by the in-memory
/// [`MockStorageService`] in tests.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if it is missing. Used by the local setup against MinIO.
    async fn ensure_bucket_exists(&self);

    /// Stores `bytes` under `key` and returns the public URL the object is served from.
    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

// 2. The Real Implementation (S3/MinIO)
/// S3StorageClient
///
/// `StorageService` over the AWS SDK. Path-style addressing keeps it compatible with
/// MinIO and other S3 gateways.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_url: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// The URL an object under `key` is reachable at once uploaded.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_url, self.bucket_name, key)
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(bucket = %self.bucket_name, "create_bucket: {:?}", e);
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key);

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(self.object_url(&key))
    }
}

/// sanitize_key
///
/// Drops `..`, `.` and empty segments so a key can never climb out of its prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

// 3. The Mock Implementation (For Tests)
/// MockStorageService
///
/// In-memory `StorageService`. Records every stored key so tests can assert an upload
/// happened (or did not).
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, every upload fails.
    pub should_fail: bool,
    stored: Arc<Mutex<Vec<String>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Keys stored so far, in upload order.
    pub fn stored_keys(&self) -> Vec<String> {
        self.stored
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(
        &self,
        key: &str,
        _bytes: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        if self.should_fail {
            return Err(StorageError::Upload(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }

        let key = sanitize_key(key);
        if let Ok(mut stored) = self.stored.lock() {
            stored.push(key.clone());
        }

        Ok(format!("http://localhost:9000/mock-bucket/{key}"))
    }
}

/// StorageState
///
/// The shared handle to the storage layer held by the application state.
pub type StorageState = Arc<dyn StorageService>;
