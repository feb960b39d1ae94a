//! S3-compatible implementation of `BaseObjectStore` (Cloudflare R2 in
//! production, MinIO in development).
//!
//! Every key handed to this store is relative; the configured root prefix is
//! applied here and stripped again from listings.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info};

use super::errors::StorageError;
use super::BaseObjectStore;
use crate::config::StorageConfig;

/// `DeleteObjects` accepts at most this many keys per request
const DELETE_BATCH_SIZE: usize = 1000;

pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    root_prefix: String,
    http: reqwest::Client,
}

impl S3ObjectStore {
    pub async fn from_config(
        config: &StorageConfig,
        fetch_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "archiver",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| StorageError::Download {
                url: String::new(),
                source: Box::new(e),
            })?;

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            root_prefix: normalize_prefix(&config.root_prefix),
            http,
        })
    }

    fn full_key(&self, key: &str) -> String {
        join_key(&self.root_prefix, key)
    }

    fn strip_root<'a>(&self, full_key: &'a str) -> &'a str {
        strip_root(&self.root_prefix, full_key)
    }

    async fn delete_batch(&self, prefix: &str, keys: Vec<String>) -> Result<usize, StorageError> {
        let delete_error = |source: super::errors::BoxError| StorageError::Delete {
            prefix: prefix.to_string(),
            source,
        };

        let count = keys.len();
        let objects = keys
            .into_iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| delete_error(Box::new(e)))?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| delete_error(Box::new(e)))?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| delete_error(Box::new(e)))?;

        if let Some(first) = output.errors().first() {
            return Err(delete_error(
                format!(
                    "{} object(s) not deleted, first: {} ({})",
                    output.errors().len(),
                    first.key().unwrap_or("?"),
                    first.message().unwrap_or("no message"),
                )
                .into(),
            ));
        }

        Ok(count)
    }
}

#[async_trait]
impl BaseObjectStore for S3ObjectStore {
    async fn upload(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        let full_key = self.full_key(key);
        let size = body.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: full_key.clone(),
                source: Box::new(e),
            })?;

        debug!(key = %full_key, size, content_type, "object uploaded");
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Bytes, StorageError> {
        let download_error = |e: reqwest::Error| StorageError::Download {
            url: url.to_string(),
            source: Box::new(e),
        };

        let response = self.http.get(url).send().await.map_err(download_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::DownloadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(download_error)
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let full_key = self.full_key(key);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None)
            }
            Err(e) => {
                return Err(StorageError::Read {
                    key: full_key,
                    source: Box::new(e),
                })
            }
        };

        let data = output.body.collect().await.map_err(|e| StorageError::Read {
            key: full_key.clone(),
            source: Box::new(e),
        })?;

        Ok(Some(data.into_bytes()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::List {
                    prefix: full_prefix.clone(),
                    source: Box::new(e),
                })?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| self.strip_root(key).to_string()),
            );

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(StorageError::Delete {
                prefix: self.root_prefix.clone(),
                source: "refusing to delete the whole root prefix".into(),
            });
        }

        // Trailing slash so `snapshots/abc` never matches `snapshots/abcd/...`
        let full_prefix = format!("{}/", self.full_key(prefix));
        let mut deleted = 0;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .send()
                .await
                .map_err(|e| StorageError::Delete {
                    prefix: full_prefix.clone(),
                    source: Box::new(e),
                })?;

            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|object| object.key().map(str::to_string))
                .collect();

            if keys.is_empty() {
                break;
            }

            for chunk in keys.chunks(DELETE_BATCH_SIZE) {
                deleted += self.delete_batch(&full_prefix, chunk.to_vec()).await?;
            }

            if !page.is_truncated().unwrap_or(false) {
                break;
            }
        }

        if deleted > 0 {
            info!(prefix = %full_prefix, deleted, "objects deleted");
        }

        Ok(deleted)
    }
}

fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

fn join_key(root: &str, key: &str) -> String {
    let key = key.trim_start_matches('/');
    if root.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", root, key)
    }
}

fn strip_root<'a>(root: &str, full_key: &'a str) -> &'a str {
    if root.is_empty() {
        return full_key;
    }
    full_key
        .strip_prefix(root)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(full_key)
}
