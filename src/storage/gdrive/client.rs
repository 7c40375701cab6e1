//! Minimal Google Drive v3 REST client.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::credentials::{CredentialError, TokenSource};
use crate::storage::FileMeta;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents";
const PAGE_SIZE: &str = "1000";
const DOWNLOAD_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Drive request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Drive API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("upload source failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DriveError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DriveError::Api { status, .. } => Some(*status),
            DriveError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// A file or folder resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// int64 encoded as a string by the API; absent for folders.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn meta(&self) -> FileMeta {
        let modified = self.modified_time.map(SystemTime::from).unwrap_or(SystemTime::UNIX_EPOCH);
        if self.is_folder() {
            FileMeta::directory(modified)
        } else {
            let len = self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);
            FileMeta::file(len, modified)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Authorized Drive API access.
#[derive(Debug, Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    api_base: String,
    upload_base: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http,
            tokens,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
        }
    }

    /// Point the client at another endpoint (test servers, proxies).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    pub fn principal(&self) -> String {
        self.tokens.principal()
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, DriveError> {
        let token = self.tokens.access_token().await?;
        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(DriveError::Api {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn get(&self, id: &str) -> Result<DriveFile, DriveError> {
        let request = self
            .http
            .get(format!("{}/files/{}", self.api_base, id))
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]);
        Ok(self.send(request).await?.json().await?)
    }

    pub async fn list_children(&self, parent: &str) -> Result<Vec<DriveFile>, DriveError> {
        self.query(&format!("'{}' in parents and trashed = false", escape_query(parent)))
            .await
    }

    pub async fn find_child(&self, parent: &str, name: &str) -> Result<Option<DriveFile>, DriveError> {
        let q = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(parent)
        );
        Ok(self.query(&q).await?.into_iter().next())
    }

    async fn query(&self, q: &str) -> Result<Vec<DriveFile>, DriveError> {
        let fields = format!("nextPageToken,files({})", FILE_FIELDS);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q),
                ("fields", fields.as_str()),
                ("pageSize", PAGE_SIZE),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let request = self.http.get(format!("{}/files", self.api_base)).query(&params);
            let page: FileList = self.send(request).await?.json().await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
    }

    /// Stream the content of a file starting at `start`.
    pub async fn download(&self, id: &str, start: u64) -> Result<tokio::io::DuplexStream, DriveError> {
        let mut request = self
            .http
            .get(format!("{}/files/{}", self.api_base, id))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")]);
        if start > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", start));
        }
        let response = self.send(request).await?;

        let (mut writer, reader) = tokio::io::duplex(DOWNLOAD_BUFFER);
        let file_id = id.to_string();
        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let result = match chunk {
                    Ok(bytes) => writer.write_all(&bytes).await,
                    Err(e) => Err(std::io::Error::other(e)),
                };
                if let Err(e) = result {
                    tracing::warn!(file_id = %file_id, error = %e, "Drive download aborted");
                    return;
                }
            }
            let _ = writer.shutdown().await;
        });
        Ok(reader)
    }

    pub async fn create_folder(&self, parent: &str, name: &str) -> Result<DriveFile, DriveError> {
        let request = self
            .http
            .post(format!("{}/files", self.api_base))
            .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
            .json(&json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent],
            }));
        Ok(self.send(request).await?.json().await?)
    }

    /// Create a file, or replace the content of `existing`.
    pub async fn upload<R>(&self, parent: &str, name: &str, existing: Option<&str>, content: R) -> Result<DriveFile, DriveError>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let request = match existing {
            Some(id) => self
                .http
                .patch(format!("{}/files/{}", self.upload_base, id))
                .query(&[("uploadType", "media"), ("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(reqwest::Body::wrap_stream(ReaderStream::new(content))),
            None => {
                let boundary = format!("ftpserver-{}", uuid::Uuid::new_v4().simple());
                let metadata = json!({ "name": name, "parents": [parent] });
                let (head, tail) = multipart_frame(&boundary, &metadata);
                let body = std::io::Cursor::new(head)
                    .chain(content)
                    .chain(std::io::Cursor::new(tail));
                self.http
                    .post(format!("{}/files", self.upload_base))
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS), ("supportsAllDrives", "true")])
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            }
        };
        Ok(self.send(request).await?.json().await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), DriveError> {
        let request = self
            .http
            .delete(format!("{}/files/{}", self.api_base, id))
            .query(&[("supportsAllDrives", "true")]);
        self.send(request).await?;
        Ok(())
    }

    /// Rename and/or move a file.
    pub async fn update(
        &self,
        id: &str,
        new_name: &str,
        add_parent: Option<&str>,
        remove_parent: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut params = vec![("fields", FILE_FIELDS), ("supportsAllDrives", "true")];
        if let Some(parent) = add_parent {
            params.push(("addParents", parent));
        }
        if let Some(parent) = remove_parent {
            params.push(("removeParents", parent));
        }
        let request = self
            .http
            .patch(format!("{}/files/{}", self.api_base, id))
            .query(&params)
            .json(&json!({ "name": new_name }));
        Ok(self.send(request).await?.json().await?)
    }
}

/// Escape a value for a Drive `q` string literal.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Bytes surrounding the media part of a `multipart/related` upload.
fn multipart_frame(boundary: &str, metadata: &serde_json::Value) -> (Vec<u8>, Vec<u8>) {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
        b = boundary,
        m = metadata
    );
    let tail = format!("\r\n--{}--\r\n", boundary);
    (head.into_bytes(), tail.into_bytes())
}
