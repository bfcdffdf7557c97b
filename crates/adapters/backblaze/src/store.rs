//! Object store port: the bucket operations the backup agent needs.
//!
//! [`B2Bucket`](crate::client::B2Bucket) implements it against the B2 native
//! API; unit tests use an in-memory map.

use std::future::Future;

use serde::Deserialize;

use plughub_app::ports::ByteStream;

use crate::error::B2Error;

/// One stored object version.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
}

/// A flat key/value bucket.
pub trait ObjectStore: Send + Sync + 'static {
    /// Bucket name shown as the agent name.
    fn bucket_name(&self) -> &str;

    /// Every object whose name starts with `prefix`, ordered by name.
    fn list_files(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<FileInfo>, B2Error>> + Send;

    /// Store `body` (exactly `content_length` bytes) under `name`.
    fn upload(
        &self,
        name: &str,
        content_length: u64,
        body: ByteStream,
    ) -> impl Future<Output = Result<FileInfo, B2Error>> + Send;

    /// Stream the object named `name`.
    fn download(&self, name: &str) -> impl Future<Output = Result<ByteStream, B2Error>> + Send;

    /// Remove one object version.
    fn delete(&self, file: &FileInfo) -> impl Future<Output = Result<(), B2Error>> + Send;
}
