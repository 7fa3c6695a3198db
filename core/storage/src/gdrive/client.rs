//! Google Drive API client scoped to the hidden `appDataFolder`.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use notesync_common::{Error, Result};

use super::auth::TokenManager;
use crate::provider::{report, Progress};

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 4 * 256 * 1024;

const APPDATA: &str = "appDataFolder";
const FILE_FIELDS: &str = "id,name,size,modifiedTime,appProperties";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub app_properties: HashMap<String, String>,
}

impl DriveFile {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED => Error::AuthRequired,
        StatusCode::NOT_FOUND => Error::NotFound(format!("Drive resource: {}", body)),
        StatusCode::FORBIDDEN | StatusCode::INSUFFICIENT_STORAGE => {
            Error::ProviderQuotaOrPermission(format!("{} - {}", status, body))
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            Error::Network(format!("{} - {}", status, body))
        }
        s if s.is_server_error() => Error::Network(format!("{} - {}", status, body)),
        _ => Error::InvalidInput(format!("Drive API error: {} - {}", status, body)),
    }
}

fn transport(context: &str, e: reqwest::Error) -> Error {
    Error::Network(format!("{}: {}", context, e))
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    token_manager: Arc<TokenManager>,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(token_manager: Arc<TokenManager>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("NoteSync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ProviderInit(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_manager,
        })
    }

    async fn auth_header(&self) -> Result<String> {
        let token = self.token_manager.get_access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// List snapshot files, newest first. `limit` caps the result.
    pub async fn list_files(&self, limit: Option<usize>) -> Result<Vec<DriveFile>> {
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;
        let page_size = limit.unwrap_or(100).clamp(1, 1000).to_string();
        let fields = format!("files({}),nextPageToken", FILE_FIELDS);

        loop {
            let url = format!("{}/files", DRIVE_API_BASE);
            let auth = self.auth_header().await?;

            let mut request = self
                .http
                .get(&url)
                .header(header::AUTHORIZATION, auth)
                .query(&[
                    ("spaces", APPDATA),
                    ("q", "trashed = false"),
                    ("orderBy", "modifiedTime desc"),
                    ("fields", fields.as_str()),
                    ("pageSize", page_size.as_str()),
                ]);

            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| transport("Failed to list snapshots", e))?;

            let list_response: FileListResponse = self.handle_response(response).await?;
            all_files.extend(list_response.files);

            if let Some(limit) = limit {
                if all_files.len() >= limit {
                    all_files.truncate(limit);
                    break;
                }
            }

            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Start a resumable upload session.
    pub async fn start_resumable_upload(
        &self,
        name: &str,
        total_size: u64,
        app_properties: &HashMap<String, String>,
    ) -> Result<String> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [APPDATA],
            "appProperties": app_properties,
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport("Failed to start resumable upload", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        // Extract upload URI from Location header
        let upload_uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Network("No upload URI in response".to_string()))?
            .to_str()
            .map_err(|e| Error::Network(format!("Invalid upload URI: {}", e)))?
            .to_string();

        Ok(upload_uri)
    }

    /// Upload a chunk to a resumable upload session.
    ///
    /// Returns the file once the final chunk is accepted.
    pub async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: &[u8],
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<DriveFile>> {
        let content_range = if data.is_empty() {
            format!("bytes */{}", total_size)
        } else {
            let end_byte = start_byte + data.len() as u64 - 1;
            format!("bytes {}-{}/{}", start_byte, end_byte, total_size)
        };

        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header(header::CONTENT_RANGE, content_range)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| transport("Failed to upload chunk", e))?;

        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let file: DriveFile = response
                .json()
                .await
                .map_err(|e| transport("Failed to parse upload response", e))?;
            Ok(Some(file))
        } else if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }

    /// Upload `data` as a new file using a resumable session.
    pub async fn upload_resumable(
        &self,
        name: &str,
        data: &[u8],
        app_properties: &HashMap<String, String>,
        progress: &Option<Progress>,
    ) -> Result<DriveFile> {
        let total_size = data.len() as u64;
        let upload_uri = self
            .start_resumable_upload(name, total_size, app_properties)
            .await?;

        report(progress, 0.0);

        if data.is_empty() {
            return self
                .upload_chunk(&upload_uri, data, 0, total_size)
                .await?
                .ok_or_else(|| Error::Network("Upload did not complete".to_string()));
        }

        let mut bytes_uploaded = 0u64;
        for chunk in data.chunks(CHUNK_SIZE) {
            let result = self
                .upload_chunk(&upload_uri, chunk, bytes_uploaded, total_size)
                .await?;

            bytes_uploaded += chunk.len() as u64;
            report(progress, bytes_uploaded as f64 / total_size as f64);

            if let Some(file) = result {
                debug!("Upload complete: {}", file.id);
                return Ok(file);
            }
        }

        Err(Error::Network("Upload did not complete".to_string()))
    }

    /// Download file content, reporting progress as bytes arrive.
    pub async fn download(&self, file_id: &str, progress: &Option<Progress>) -> Result<Vec<u8>> {
        let url = format!("{}/files/{}", DRIVE_API_BASE, file_id);
        let auth = self.auth_header().await?;

        let response = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| transport("Failed to start download", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let total = response.content_length();
        let mut data = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        report(progress, 0.0);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport("Stream read error", e))?;
            data.extend_from_slice(&chunk);
            if let Some(total) = total.filter(|t| *t > 0) {
                report(progress, data.len() as f64 / total as f64);
            }
        }
        report(progress, 1.0);

        Ok(data)
    }

    /// Delete a file.
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{}", DRIVE_API_BASE, file_id);
        let auth = self.auth_header().await?;

        let response = self
            .http
            .delete(&url)
            .header(header::AUTHORIZATION, auth)
            .send()
            .await
            .map_err(|e| transport("Failed to delete file", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }

    /// Revoke a token at Google. Best effort.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(super::auth::GOOGLE_REVOKE_URL)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| transport("Failed to revoke token", e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| transport("Failed to parse response", e))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_file_deserialization() {
        let json = r#"{
            "id": "abc123",
            "name": "notesync-20240101T000000Z.snapshot",
            "size": "12345",
            "modifiedTime": "2024-01-01T00:00:00.000Z",
            "appProperties": {"contentHash": "h", "entryCount": "4"}
        }"#;

        let file: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "abc123");
        assert_eq!(file.size_bytes(), Some(12345));
        assert_eq!(file.app_properties.get("entryCount").unwrap(), "4");
        assert!(file.modified_time.is_some());
    }

    #[test]
    fn test_drive_file_minimal() {
        let file: DriveFile = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(file.size_bytes(), None);
        assert!(file.app_properties.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            Error::AuthRequired
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "quota"),
            Error::ProviderQuotaOrPermission(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, "").is_retryable());
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            Error::NotFound(_)
        ));
    }
}
