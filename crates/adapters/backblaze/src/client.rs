//! Minimal B2 native API (v2) client.
//!
//! Only the calls the backup agent needs: account authorization, bucket
//! lookup, paged file listing, single-part upload, download by name and
//! version deletion. An expired account token is refreshed once per call.

use std::sync::Arc;

use futures::TryStreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use plughub_app::ports::{BackupAgentError, ByteStream};

use crate::error::B2Error;
use crate::store::{FileInfo, ObjectStore};

/// Public B2 endpoint used to authorize an account.
pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com";

const MAX_FILE_COUNT: u32 = 1000;

/// What the application key is allowed to do.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allowed {
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub bucket_id: Option<String>,
    pub bucket_name: Option<String>,
    pub name_prefix: Option<String>,
}

/// Result of `b2_authorize_account`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
    #[serde(default)]
    pub allowed: Allowed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketInfo {
    pub bucket_id: String,
    pub bucket_name: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFileNamesResponse {
    files: Vec<FileInfo>,
    next_file_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrl {
    upload_url: String,
    authorization_token: String,
}

#[derive(Deserialize)]
struct Ignored {}

/// Authenticated client for one application key.
pub struct B2Client {
    http: reqwest::Client,
    auth_url: String,
    key_id: String,
    application_key: String,
    session: RwLock<Option<Session>>,
}

impl B2Client {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        auth_url: impl Into<String>,
        key_id: impl Into<String>,
        application_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth_url: auth_url.into(),
            key_id: key_id.into(),
            application_key: application_key.into(),
            session: RwLock::new(None),
        }
    }

    /// Call `b2_authorize_account` and keep the session.
    ///
    /// # Errors
    ///
    /// Returns [`B2Error::Api`] with status 401 for a rejected key and
    /// [`B2Error::Http`] when B2 cannot be reached.
    pub async fn authorize(&self) -> Result<Session, B2Error> {
        let response = self
            .http
            .get(format!(
                "{}/b2api/v2/b2_authorize_account",
                self.auth_url.trim_end_matches('/')
            ))
            .basic_auth(&self.key_id, Some(&self.application_key))
            .send()
            .await?;
        let session: Session = decode(response).await?;
        tracing::debug!(account_id = %session.account_id, "authorized against Backblaze");
        *self.session.write().await = Some(session.clone());
        Ok(session)
    }

    async fn session(&self) -> Result<Session, B2Error> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }
        self.authorize().await
    }

    async fn api<Req, Resp>(&self, operation: &str, body: &Req) -> Result<Resp, B2Error>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let session = self.session().await?;
        match self.api_with(&session, operation, body).await {
            Err(err) if err.is_unauthorized() => {
                tracing::debug!(operation, "authorization token rejected, re-authorizing");
                let session = self.authorize().await?;
                self.api_with(&session, operation, body).await
            }
            other => other,
        }
    }

    async fn api_with<Req, Resp>(
        &self,
        session: &Session,
        operation: &str,
        body: &Req,
    ) -> Result<Resp, B2Error>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/b2api/v2/{operation}", session.api_url))
            .header(reqwest::header::AUTHORIZATION, &session.authorization_token)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    /// Look up a bucket by name.
    ///
    /// # Errors
    ///
    /// Returns [`B2Error::BucketNotFound`] when the key cannot see it.
    pub async fn find_bucket(&self, bucket_name: &str) -> Result<BucketInfo, B2Error> {
        let account_id = self.session().await?.account_id;
        let response: ListBucketsResponse = self
            .api(
                "b2_list_buckets",
                &serde_json::json!({"accountId": account_id, "bucketName": bucket_name}),
            )
            .await?;
        response
            .buckets
            .into_iter()
            .find(|bucket| bucket.bucket_name == bucket_name)
            .ok_or_else(|| B2Error::BucketNotFound(bucket_name.to_string()))
    }

    /// Every file under `prefix`, following `nextFileName` pages.
    ///
    /// # Errors
    ///
    /// Returns the first failing page's error.
    pub async fn list_file_names(
        &self,
        bucket_id: &str,
        prefix: &str,
    ) -> Result<Vec<FileInfo>, B2Error> {
        let mut files = Vec::new();
        let mut start_file_name: Option<String> = None;
        loop {
            let page: ListFileNamesResponse = self
                .api(
                    "b2_list_file_names",
                    &serde_json::json!({
                        "bucketId": bucket_id,
                        "prefix": prefix,
                        "startFileName": start_file_name,
                        "maxFileCount": MAX_FILE_COUNT,
                    }),
                )
                .await?;
            files.extend(page.files);
            match page.next_file_name {
                Some(next) => start_file_name = Some(next),
                None => return Ok(files),
            }
        }
    }

    /// Upload one file in a single request.
    ///
    /// # Errors
    ///
    /// Returns the upload error; the body stream is consumed so the call is
    /// not retried.
    pub async fn upload_file(
        &self,
        bucket_id: &str,
        file_name: &str,
        content_length: u64,
        body: ByteStream,
    ) -> Result<FileInfo, B2Error> {
        let target: UploadUrl = self
            .api("b2_get_upload_url", &serde_json::json!({"bucketId": bucket_id}))
            .await?;
        let response = self
            .http
            .post(&target.upload_url)
            .header(reqwest::header::AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", urlencoding::encode(file_name).as_ref())
            .header(reqwest::header::CONTENT_TYPE, "b2/x-auto")
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .header("X-Bz-Content-Sha1", "do_not_verify")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;
        decode(response).await
    }

    /// Stream a file by name.
    ///
    /// # Errors
    ///
    /// Returns [`B2Error::Api`] with status 404 when the file does not exist.
    pub async fn download_file_by_name(
        &self,
        bucket_name: &str,
        file_name: &str,
    ) -> Result<reqwest::Response, B2Error> {
        let session = self.session().await?;
        match self.download_with(&session, bucket_name, file_name).await {
            Err(err) if err.is_unauthorized() => {
                let session = self.authorize().await?;
                self.download_with(&session, bucket_name, file_name).await
            }
            other => other,
        }
    }

    async fn download_with(
        &self,
        session: &Session,
        bucket_name: &str,
        file_name: &str,
    ) -> Result<reqwest::Response, B2Error> {
        let response = self
            .http
            .get(format!(
                "{}/file/{bucket_name}/{}",
                session.download_url,
                urlencoding::encode(file_name).replace("%2F", "/")
            ))
            .header(reqwest::header::AUTHORIZATION, &session.authorization_token)
            .send()
            .await?;
        check(response).await
    }

    /// Delete one file version.
    ///
    /// # Errors
    ///
    /// Returns [`B2Error::Api`] when B2 refuses the deletion.
    pub async fn delete_file_version(&self, file: &FileInfo) -> Result<(), B2Error> {
        let _: Ignored = self
            .api(
                "b2_delete_file_version",
                &serde_json::json!({"fileName": file.file_name, "fileId": file.file_id}),
            )
            .await?;
        Ok(())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, B2Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let (code, message) = match response.json::<ErrorBody>().await {
        Ok(body) => (body.code, body.message),
        Err(_) => (
            "unknown".to_string(),
            status.canonical_reason().unwrap_or("error").to_string(),
        ),
    };
    Err(B2Error::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, B2Error> {
    Ok(check(response).await?.json().await?)
}

/// One bucket seen through a [`B2Client`].
pub struct B2Bucket {
    client: Arc<B2Client>,
    bucket: BucketInfo,
}

impl B2Bucket {
    #[must_use]
    pub fn new(client: Arc<B2Client>, bucket: BucketInfo) -> Self {
        Self { client, bucket }
    }
}

impl ObjectStore for B2Bucket {
    fn bucket_name(&self) -> &str {
        &self.bucket.bucket_name
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<FileInfo>, B2Error> {
        self.client
            .list_file_names(&self.bucket.bucket_id, prefix)
            .await
    }

    async fn upload(
        &self,
        name: &str,
        content_length: u64,
        body: ByteStream,
    ) -> Result<FileInfo, B2Error> {
        self.client
            .upload_file(&self.bucket.bucket_id, name, content_length, body)
            .await
    }

    async fn download(&self, name: &str) -> Result<ByteStream, B2Error> {
        let response = self
            .client
            .download_file_by_name(&self.bucket.bucket_name, name)
            .await?;
        Ok(Box::pin(response.bytes_stream().map_err(|err| {
            BackupAgentError::with_source("Failed to download backup", err)
        })))
    }

    async fn delete(&self, file: &FileInfo) -> Result<(), B2Error> {
        self.client.delete_file_version(file).await
    }
}
