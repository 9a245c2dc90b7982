use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    types::{Delete, ObjectIdentifier},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::StorageConfig;

/// S3 caps a single DeleteObjects call at this many keys.
const DELETE_BATCH: usize = 1000;

/// A stored asset: the public url plus the handle needed to delete it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub url: String,
    pub storage_id: String,
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn upload(&self, body: Bytes, content_type: &str) -> anyhow::Result<StoredObject>;
    async fn delete(&self, storage_id: &str) -> anyhow::Result<()>;
    async fn delete_many(&self, storage_ids: &[String]) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl Storage {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn upload(&self, body: Bytes, content_type: &str) -> anyhow::Result<StoredObject> {
        let ext = ext_from_mime(content_type).unwrap_or("bin");
        let key = format!("recipes/{}.{}", Uuid::new_v4(), ext);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {}", key))?;
        Ok(StoredObject {
            url: format!("{}/{}", self.public_url, key),
            storage_id: key,
        })
    }

    async fn delete(&self, storage_id: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(storage_id)
            .send()
            .await
            .with_context(|| format!("s3 delete_object {}", storage_id))?;
        Ok(())
    }

    async fn delete_many(&self, storage_ids: &[String]) -> anyhow::Result<()> {
        for chunk in storage_ids.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .context("build object identifiers")?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .context("build delete request")?;
            let out = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .context("s3 delete_objects")?;
            let failed: Vec<&str> = out.errors().iter().filter_map(|e| e.key()).collect();
            if !failed.is_empty() {
                anyhow::bail!("s3 delete_objects failed for {:?}", failed);
            }
        }
        Ok(())
    }
}

/// Retries every gateway call a bounded number of times with linear backoff.
pub struct RetryingStorage {
    inner: Arc<dyn StorageClient>,
    attempts: u32,
    backoff: Duration,
}

impl RetryingStorage {
    pub fn new(inner: Arc<dyn StorageClient>, attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            backoff,
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut call: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.attempts => {
                    warn!(error = %e, op, attempt, "storage call failed; retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("{} failed after {} attempts", op, attempt))),
            }
        }
    }
}

#[async_trait]
impl StorageClient for RetryingStorage {
    async fn upload(&self, body: Bytes, content_type: &str) -> anyhow::Result<StoredObject> {
        let stored = self
            .with_retry("upload", || self.inner.upload(body.clone(), content_type))
            .await?;
        debug!(storage_id = %stored.storage_id, "asset uploaded");
        Ok(stored)
    }

    async fn delete(&self, storage_id: &str) -> anyhow::Result<()> {
        self.with_retry("delete", || self.inner.delete(storage_id)).await?;
        debug!(storage_id, "asset deleted");
        Ok(())
    }

    async fn delete_many(&self, storage_ids: &[String]) -> anyhow::Result<()> {
        if storage_ids.is_empty() {
            return Ok(());
        }
        self.with_retry("delete_many", || self.inner.delete_many(storage_ids))
            .await?;
        debug!(count = storage_ids.len(), "assets deleted");
        Ok(())
    }
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}
