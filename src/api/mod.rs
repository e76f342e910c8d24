// REST backend client
// Self identity, paginated dialogs and messages, and file uploads.

use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::models::{Chatroom, FileAttachment, HistoryMessage, Page, SelfInfo};

pub mod pagination;

pub use pagination::PageCursor;

const CSRF_COOKIE: &str = "csrftoken";
const CSRF_HEADER: &str = "X-CSRFToken";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid cookie header: {0}")]
    Cookie(#[from] reqwest::header::InvalidHeaderValue),
    #[error("no csrftoken cookie available for upload")]
    MissingCsrfToken,
    #[error("cannot read {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The HTTP calls the chat session depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn fetch_self(&self) -> Result<SelfInfo, ApiError>;
    async fn fetch_chatrooms(&self, page: u32) -> Result<Page<Chatroom>, ApiError>;
    async fn fetch_messages(&self, page: u32) -> Result<Page<HistoryMessage>, ApiError>;
    async fn upload_files(&self, paths: &[PathBuf]) -> Result<Vec<FileAttachment>, ApiError>;
}

/// Extracts the CSRF token from a `Cookie` header value.
pub fn csrf_from_cookie(cookie: &str) -> Option<String> {
    cookie.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == CSRF_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    csrf_token: Option<String>,
}

impl ApiClient {
    /// `cookie` is sent verbatim on every request.
    pub fn new(base_url: &str, cookie: Option<&str>) -> Result<Self, ApiError> {
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };

        let mut headers = HeaderMap::new();
        if let Some(cookie) = cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie)?);
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base,
            csrf_token: cookie.and_then(csrf_from_cookie),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, page: Option<u32>) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let mut request = self.client.get(url.clone());
        if let Some(page) = page {
            request = request.query(&[("page", page)]);
        }
        debug!("GET {} (page {:?})", url, page);

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { url: url.to_string(), status: status.as_u16() });
        }
        Ok(response.json().await?)
    }
}

async fn file_part(path: &Path) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::File {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(Part::bytes(bytes).file_name(name))
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn fetch_self(&self) -> Result<SelfInfo, ApiError> {
        self.get_json("self/", None).await
    }

    async fn fetch_chatrooms(&self, page: u32) -> Result<Page<Chatroom>, ApiError> {
        self.get_json("dialogs/", Some(page)).await
    }

    async fn fetch_messages(&self, page: u32) -> Result<Page<HistoryMessage>, ApiError> {
        self.get_json("messages/", Some(page)).await
    }

    async fn upload_files(&self, paths: &[PathBuf]) -> Result<Vec<FileAttachment>, ApiError> {
        let token = self.csrf_token.as_deref().ok_or(ApiError::MissingCsrfToken)?;

        let mut form = Form::new();
        for path in paths {
            form = form.part("files", file_part(path).await?);
        }

        let url = self.endpoint("upload/")?;
        info!("Uploading {} file(s) to {}", paths.len(), url);
        let response = self
            .client
            .post(url.clone())
            .header(CSRF_HEADER, token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { url: url.to_string(), status: status.as_u16() });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_token_is_read_from_cookie_header() {
        assert_eq!(
            csrf_from_cookie("sessionid=abc; csrftoken=XYZ123; theme=dark").as_deref(),
            Some("XYZ123")
        );
        assert_eq!(csrf_from_cookie("csrftoken="), None);
        assert_eq!(csrf_from_cookie("sessionid=abc"), None);
    }

    #[test]
    fn endpoints_resolve_against_base_without_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/api", None).unwrap();
        assert_eq!(client.endpoint("dialogs/").unwrap().as_str(), "http://localhost:8000/api/dialogs/");
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/api/");
    }

    #[tokio::test]
    async fn upload_without_csrf_token_is_refused() {
        let client = ApiClient::new("http://localhost:8000/", Some("sessionid=abc")).unwrap();
        let result = client.upload_files(&[PathBuf::from("/nonexistent")]).await;
        assert!(matches!(result, Err(ApiError::MissingCsrfToken)));
    }

    #[tokio::test]
    async fn upload_reports_unreadable_file() {
        let client = ApiClient::new("http://localhost:8000/", Some("csrftoken=t")).unwrap();
        let missing = PathBuf::from("/definitely/not/here.txt");
        match client.upload_files(&[missing.clone()]).await {
            Err(ApiError::File { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected result {:?}", other.map(|files| files.len())),
        }
    }
}
