//! S3-compatible remote endpoint (§4.B), built on `aws-sdk-s3`.
//!
//! S3 has no real directories or rename: a "directory" is represented by a
//! zero-byte object whose key ends in `/`, and `rename` is implemented as
//! copy-then-delete (`supports_atomic_rename` is false).

use std::sync::Arc;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use chrono::{TimeZone, Utc};
use tokio::io::AsyncReadExt;

use super::{AdapterCapabilities, BoxedReader, StorageAdapter};
use crate::error::{EngineError, Result};
use crate::model::SyncItem;
use crate::path;

/// Connection parameters for one S3-compatible bucket. Credentials are
/// injected by the caller (§6); this adapter never reads or stores secrets.
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Key prefix every canonical path is nested under, without a trailing slash.
    pub prefix: String,
    pub force_path_style: bool,
}

pub struct S3Adapter {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Adapter {
    pub async fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "syncmesh-engine",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    pub fn from_client(client: Arc<Client>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client: Client::clone(&client),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    fn key(&self, relative: &str) -> String {
        if self.prefix.is_empty() {
            relative.to_string()
        } else if relative.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    fn directory_key(&self, relative: &str) -> String {
        format!("{}/", self.key(relative))
    }

    fn relative_from_key(&self, key: &str) -> Result<String> {
        let prefix_len = if self.prefix.is_empty() { 0 } else { self.prefix.len() + 1 };
        let stripped = if key.len() > prefix_len { &key[prefix_len..] } else { "" };
        path::normalize(stripped)
    }

    fn is_not_found(err: &aws_sdk_s3::error::SdkError<impl std::fmt::Debug>) -> bool {
        format!("{:?}", err).contains("NoSuchKey") || format!("{:?}", err).contains("NotFound")
    }
}

#[async_trait]
impl StorageAdapter for S3Adapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            supports_timestamps: true,
            supports_permissions: false,
            supports_etags: true,
            supports_symlinks: false,
            supports_atomic_rename: false,
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<SyncItem>> {
        let list_prefix = self.key(prefix);
        let mut out = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(&list_prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let response = request.send().await?;

            for obj in response.contents() {
                let Some(key) = obj.key() else { continue };
                let relative = self.relative_from_key(key)?;
                if relative.is_empty() {
                    continue;
                }
                if key.ends_with('/') {
                    out.push(SyncItem::directory(relative));
                    continue;
                }
                let mut item = SyncItem::file(relative, obj.size().unwrap_or(0) as u64);
                if let Some(ts) = obj.last_modified().and_then(|d| d.secs().try_into().ok()) {
                    if let Some(when) = Utc.timestamp_opt(ts, 0).single() {
                        item = item.with_modified(when);
                    }
                }
                if let Some(etag) = obj.e_tag() {
                    item = item.with_etag(etag.trim_matches('"').to_string());
                }
                out.push(item);
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(out)
    }

    async fn stat(&self, path_str: &str) -> Result<Option<SyncItem>> {
        let key = self.key(path_str);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(response) => {
                let mut item = SyncItem::file(path_str.to_string(), response.content_length().unwrap_or(0) as u64);
                if let Some(ts) = response.last_modified().and_then(|d| d.secs().try_into().ok()) {
                    if let Some(when) = Utc.timestamp_opt(ts, 0).single() {
                        item = item.with_modified(when);
                    }
                }
                if let Some(etag) = response.e_tag() {
                    item = item.with_etag(etag.trim_matches('"').to_string());
                }
                Ok(Some(item))
            }
            Err(e) if Self::is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path_str: &str) -> Result<BoxedReader> {
        let key = self.key(path_str);
        let response = self.client.get_object().bucket(&self.bucket).key(&key).send().await?;
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| EngineError::TransientIo(format!("failed to read object body: {:?}", e)))?
            .into_bytes();
        Ok(Box::new(std::io::Cursor::new(bytes.to_vec())))
    }

    async fn write(&self, path_str: &str, mut content: BoxedReader, size_hint: Option<u64>) -> Result<()> {
        let key = self.key(path_str);
        let mut buf = Vec::with_capacity(size_hint.unwrap_or(0) as usize);
        content.read_to_end(&mut buf).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(buf))
            .send()
            .await?;
        Ok(())
    }

    async fn delete(&self, path_str: &str) -> Result<()> {
        let key = self.key(path_str);
        match self.client.delete_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(()),
            Err(e) if Self::is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_directory(&self, path_str: &str) -> Result<()> {
        let key = self.directory_key(path_str);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from_static(b""))
            .send()
            .await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let source_key = self.key(from);
        let dest_key = self.key(to);
        let copy_source = format!("{}/{}", self.bucket, source_key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&dest_key)
            .copy_source(&copy_source)
            .send()
            .await?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&source_key)
            .send()
            .await?;
        Ok(())
    }

    async fn hash(&self, path_str: &str) -> Result<String> {
        let key = self.key(path_str);
        let response = self.client.head_object().bucket(&self.bucket).key(&key).send().await?;
        response
            .e_tag()
            .map(|e| e.trim_matches('"').to_string())
            .ok_or_else(|| EngineError::Adapter(format!("object has no etag: {}", path_str)))
    }

    async fn test_connection(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| EngineError::Adapter(format!("bucket unreachable: {:?}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_with_prefix(prefix: &str) -> S3Adapter {
        S3Adapter {
            client: Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new("us-east-1"))
                    .credentials_provider(Credentials::new("x", "y", None, None, "test"))
                    .build(),
            ),
            bucket: "bucket".to_string(),
            prefix: prefix.to_string(),
        }
    }

    #[test]
    fn key_joins_prefix_and_relative_path() {
        let adapter = adapter_with_prefix("sync-root");
        assert_eq!(adapter.key("a/b.txt"), "sync-root/a/b.txt");
    }

    #[test]
    fn key_without_prefix_is_unprefixed() {
        let adapter = adapter_with_prefix("");
        assert_eq!(adapter.key("a/b.txt"), "a/b.txt");
    }

    #[test]
    fn relative_from_key_strips_prefix() {
        let adapter = adapter_with_prefix("sync-root");
        assert_eq!(adapter.relative_from_key("sync-root/a/b.txt").unwrap(), "a/b.txt");
    }
}
