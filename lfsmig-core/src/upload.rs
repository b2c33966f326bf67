//! LFS upload client
//!
//! Speaks the legacy LFS object API:
//! - POST `{oid, size}` to `<endpoint>/objects`
//! - HTTP 200 means the server already has the object
//! - otherwise the response carries `_links.upload` with a URL and headers
//!   to replay on a PUT of the raw bytes

use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConvertError, Result};
use crate::lfs::LfsPointer;
use crate::object::ObjectId;

pub const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

#[derive(Debug, Serialize)]
struct ObjectRequest<'a> {
    oid: &'a str,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    #[serde(rename = "_links")]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    upload: Option<UploadLink>,
}

/// Where and how to PUT an object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadLink {
    pub href: String,
    #[serde(default)]
    pub header: BTreeMap<String, String>,
}

/// What the server needed for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    AlreadyPresent,
    Uploaded,
}

/// HTTP client for one LFS endpoint
pub struct LfsClient {
    objects_url: Url,
    authorization: Option<String>,
    http: reqwest::Client,
}

impl LfsClient {
    /// Create a client for `endpoint`. Credentials in the URL's user-info
    /// are sent as HTTP basic auth on the object request.
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut url = Url::parse(endpoint)
            .map_err(|e| ConvertError::Config(format!("Invalid LFS URL {:?}: {}", endpoint, e)))?;

        let authorization = if url.username().is_empty() && url.password().is_none() {
            None
        } else {
            let user_info = match url.password() {
                Some(password) => format!("{}:{}", url.username(), password),
                None => url.username().to_string(),
            };
            Some(format!(
                "Basic {}",
                base64::engine::general_purpose::STANDARD.encode(user_info.as_bytes())
            ))
        };
        url.set_username("")
            .and_then(|_| url.set_password(None))
            .map_err(|_| ConvertError::Config(format!("LFS URL cannot carry credentials: {}", endpoint)))?;

        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let objects_url = url
            .join("objects")
            .map_err(|e| ConvertError::Config(format!("Invalid LFS URL {:?}: {}", endpoint, e)))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(ConvertError::Http)?;

        Ok(Self {
            objects_url,
            authorization,
            http,
        })
    }

    pub fn objects_url(&self) -> &Url {
        &self.objects_url
    }

    /// Make sure the server holds `pointer`'s content, uploading `file` if not
    pub async fn upload(&self, id: &ObjectId, pointer: &LfsPointer, file: &Path) -> Result<UploadOutcome> {
        let link = match self.request_upload(pointer).await? {
            Some(link) => link,
            None => return Ok(UploadOutcome::AlreadyPresent),
        };
        self.put_object(id, pointer, &link, file).await?;
        Ok(UploadOutcome::Uploaded)
    }

    /// POST the object request; `None` when the object is already stored
    pub async fn request_upload(&self, pointer: &LfsPointer) -> Result<Option<UploadLink>> {
        let mut request = self
            .http
            .post(self.objects_url.clone())
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
            .body(serde_json::to_vec(&ObjectRequest {
                oid: &pointer.oid,
                size: pointer.size,
            }).map_err(|e| ConvertError::Protocol(e.to_string()))?);
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status == StatusCode::OK {
            return Ok(None);
        }
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ConvertError::Protocol(format!(
                "POST {} for {} failed ({}): {}",
                self.objects_url,
                pointer.oid,
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        let parsed: ObjectResponse = serde_json::from_slice(&body).map_err(|e| {
            ConvertError::Protocol(format!("Invalid object response for {}: {}", pointer.oid, e))
        })?;
        parsed
            .links
            .and_then(|l| l.upload)
            .map(Some)
            .ok_or_else(|| ConvertError::Protocol(format!("No upload link for {}", pointer.oid)))
    }

    async fn put_object(&self, id: &ObjectId, pointer: &LfsPointer, link: &UploadLink, file: &Path) -> Result<()> {
        let url = Url::parse(&link.href)
            .map_err(|e| ConvertError::Protocol(format!("Invalid upload href {:?}: {}", link.href, e)))?;
        let body = tokio::fs::File::open(file).await.map_err(ConvertError::io(*id, file))?;

        let mut request = self.http.put(url).header(CONTENT_LENGTH, pointer.size);
        for (name, value) in &link.header {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request.body(reqwest::Body::from(body)).send().await?;
        let status = resp.status();
        // Drain the response so the upload is known to be complete
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(ConvertError::Protocol(format!(
                "PUT {} failed ({}): {}",
                link.href,
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        tracing::info!("Uploaded {}", pointer);
        Ok(())
    }
}
