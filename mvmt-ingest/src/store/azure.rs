//! Azure Blob Storage backend (REST API).
//!
//! Two ways to authenticate:
//! - **SharedKey**: account name + key from a connection string. Every
//!   request is signed with HMAC-SHA256 over the canonical request.
//! - **SAS**: a container URL with a shared-access-signature query string,
//!   appended to every request unchanged.
//!
//! # API Reference
//! - Put Blob: `PUT /{container}/{blob}` with `x-ms-blob-type: BlockBlob`
//! - Get/Set Blob Tags: `GET|PUT /{container}/{blob}?comp=tags`
//! - List Blobs: `GET /{container}?restype=container&comp=list`
//! - Authorize with Shared Key:
//!   https://learn.microsoft.com/rest/api/storageservices/authorize-with-shared-key

use super::{RemoteStore, StoreError, StoreResult, Tags};
use crate::credentials::ConnectionString;
use crate::error::{CredentialError, IngestError, IngestResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Method, StatusCode, Url};
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

/// REST API version; blob tags need 2019-12-12 or later
const API_VERSION: &str = "2021-08-06";

/// Per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Tag>\s*<Key>(.*?)</Key>\s*<Value>(.*?)</Value>\s*</Tag>")
        .expect("tag pattern is valid")
});

static BLOB_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<Blob>\s*<Name>(.*?)</Name>").expect("blob name pattern is valid")
});

static NEXT_MARKER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<NextMarker>(.*?)</NextMarker>").expect("marker pattern is valid")
});

/// How requests are authorized
#[derive(Clone)]
pub enum BlobAuth {
    /// Account key (already base64-decoded)
    SharedKey { account: String, key: Vec<u8> },
    /// SAS query string without the leading `?`
    Sas(String),
}

impl std::fmt::Debug for BlobAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobAuth::SharedKey { account, .. } => {
                write!(f, "SharedKey {{ account: {}, key: <redacted> }}", account)
            }
            BlobAuth::Sas(_) => write!(f, "Sas(<redacted>)"),
        }
    }
}

/// Azure Blob container client
pub struct AzureBlobStore {
    http_client: Client,
    /// Service endpoint, e.g. `https://acct.blob.core.windows.net/`
    endpoint: Url,
    container: String,
    auth: BlobAuth,
}

impl AzureBlobStore {
    pub fn new(endpoint: Url, container: &str, auth: BlobAuth) -> IngestResult<Self> {
        if container.is_empty() {
            return Err(IngestError::Configuration(
                "Blob container name is empty".to_string(),
            ));
        }
        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| IngestError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            endpoint,
            container: container.to_string(),
            auth,
        })
    }

    /// From a container SAS URL: `https://acct.blob.core.windows.net/container?sv=...&sig=...`
    pub fn from_sas_url(sas_url: &str) -> IngestResult<Self> {
        let url = Url::parse(sas_url)
            .map_err(|e| CredentialError::InvalidConnectionString(format!("SAS URL: {}", e)))?;

        let sas = url
            .query()
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                CredentialError::InvalidConnectionString("SAS URL has no query string".to_string())
            })?
            .to_string();

        let container = url
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                CredentialError::InvalidConnectionString(
                    "SAS URL does not name a container".to_string(),
                )
            })?;

        // Endpoint is everything before the container segment
        let mut endpoint = url.clone();
        endpoint.set_query(None);
        if let Ok(mut segments) = endpoint.path_segments_mut() {
            segments.pop();
        }

        Self::new(endpoint, &container, BlobAuth::Sas(sas))
    }

    /// From a parsed connection string and container name
    pub fn from_connection_string(cs: &ConnectionString, container: &str) -> IngestResult<Self> {
        let endpoint = Url::parse(&cs.blob_endpoint()?)
            .map_err(|e| CredentialError::InvalidConnectionString(format!("BlobEndpoint: {}", e)))?;

        let auth = if let Some(sas) = &cs.shared_access_signature {
            BlobAuth::Sas(sas.trim_start_matches('?').to_string())
        } else {
            let account = cs.account_name.clone().ok_or_else(|| {
                CredentialError::InvalidConnectionString("AccountName missing".to_string())
            })?;
            let encoded = cs.account_key.as_deref().ok_or_else(|| {
                CredentialError::InvalidConnectionString(
                    "neither AccountKey nor SharedAccessSignature present".to_string(),
                )
            })?;
            let key = BASE64.decode(encoded).map_err(|e| {
                CredentialError::InvalidConnectionString(format!("AccountKey is not base64: {}", e))
            })?;
            BlobAuth::SharedKey { account, key }
        };

        Self::new(endpoint, container, auth)
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// URL of the container, or of a blob within it, with `query` appended
    fn url(&self, blob: Option<&str>, query: &[(&str, &str)]) -> StoreResult<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidName(self.endpoint.to_string()))?;
            segments.pop_if_empty().push(&self.container);
            if let Some(name) = blob {
                segments.push(name);
            }
        }

        if let BlobAuth::Sas(sas) = &self.auth {
            url.set_query(Some(sas));
        }
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Build, sign and send one request
    async fn send(
        &self,
        method: Method,
        url: Url,
        mut headers: Vec<(&'static str, String)>,
        body: Option<Bytes>,
    ) -> StoreResult<reqwest::Response> {
        headers.push(("x-ms-date", rfc1123_now()));
        headers.push(("x-ms-version", API_VERSION.to_string()));
        let content_length = body.as_ref().map(|b| b.len()).unwrap_or(0);

        if let BlobAuth::SharedKey { account, key } = &self.auth {
            let string_to_sign =
                string_to_sign(method.as_str(), &url, &headers, content_length, account);
            let authorization = format!("SharedKey {}:{}", account, sign(key, &string_to_sign)?);
            headers.push(("authorization", authorization));
        }

        let mut request = self.http_client.request(method.clone(), url.clone());
        for (name, value) in &headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        debug!(method = %method, path = %url.path(), "Blob request");
        Ok(request.send().await?)
    }

    async fn get_bytes(&self, name: &str) -> StoreResult<Bytes> {
        let url = self.url(Some(name), &[])?;
        let response = self.send(Method::GET, url, Vec::new(), None).await?;
        let response = check_status(response, name).await?;
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl RemoteStore for AzureBlobStore {
    fn location(&self) -> String {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container);
        }
        url.set_query(None);
        url.to_string()
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        let url = self.url(Some(name), &[])?;
        let response = self.send(Method::HEAD, url, Vec::new(), None).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(StoreError::Http {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    async fn upload(&self, name: &str, data: Bytes) -> StoreResult<()> {
        let url = self.url(Some(name), &[])?;
        let headers = vec![
            ("content-type", "application/octet-stream".to_string()),
            ("if-none-match", "*".to_string()),
            ("x-ms-blob-type", "BlockBlob".to_string()),
        ];
        let response = self.send(Method::PUT, url, headers, Some(data)).await?;
        match response.status() {
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(StoreError::AlreadyExists(name.to_string()))
            }
            _ => check_status(response, name).await.map(|_| ()),
        }
    }

    async fn get_tags(&self, name: &str) -> StoreResult<Tags> {
        let url = self.url(Some(name), &[("comp", "tags")])?;
        let response = self.send(Method::GET, url, Vec::new(), None).await?;
        let body = check_status(response, name).await?.text().await?;
        Ok(parse_tags_xml(&body))
    }

    async fn set_tags(&self, name: &str, tags: &Tags) -> StoreResult<()> {
        let url = self.url(Some(name), &[("comp", "tags")])?;
        let headers = vec![("content-type", "application/xml; charset=utf-8".to_string())];
        let body = Bytes::from(tags_to_xml(tags));
        let response = self.send(Method::PUT, url, headers, Some(body)).await?;
        check_status(response, name).await.map(|_| ())
    }

    async fn list(&self) -> StoreResult<Vec<(String, Bytes)>> {
        let mut names = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![("restype", "container"), ("comp", "list")];
            if let Some(m) = marker.as_deref() {
                query.push(("marker", m));
            }
            let url = self.url(None, &query)?;
            let response = self.send(Method::GET, url, Vec::new(), None).await?;
            let body = check_status(response, &self.container).await?.text().await?;

            let page = parse_blob_list_xml(&body);
            names.extend(page.names);
            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        names.sort();
        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            let data = self.get_bytes(&name).await?;
            objects.push((name, data));
        }
        Ok(objects)
    }
}

/// Map non-success statuses to errors, keeping the service's message
async fn check_status(response: reqwest::Response, name: &str) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(name.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Http {
        status: status.as_u16(),
        body,
    })
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Shared Key string-to-sign for the Blob service (version 2015-02-21+)
///
/// Header names in `headers` must be lowercase.
pub(crate) fn string_to_sign(
    method: &str,
    url: &Url,
    headers: &[(&str, String)],
    content_length: usize,
    account: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut canonical_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(n, _)| n.starts_with("x-ms-"))
        .map(|(n, v)| (*n, v.trim()))
        .collect();
    canonical_headers.sort();

    let mut canonical_params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    canonical_params.sort();

    let mut out = String::new();
    for part in [
        method,
        header_value(headers, "content-encoding"),
        header_value(headers, "content-language"),
        length.as_str(),
        header_value(headers, "content-md5"),
        header_value(headers, "content-type"),
        "", // Date: x-ms-date is used instead
        header_value(headers, "if-modified-since"),
        header_value(headers, "if-match"),
        header_value(headers, "if-none-match"),
        header_value(headers, "if-unmodified-since"),
        header_value(headers, "range"),
    ] {
        out.push_str(part);
        out.push('\n');
    }
    for (name, value) in canonical_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push('/');
    out.push_str(account);
    out.push_str(url.path());
    for (name, value) in canonical_params {
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&value);
    }
    out
}

fn header_value<'a>(headers: &'a [(&str, String)], name: &str) -> &'a str {
    headers
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

fn sign(key: &[u8], string_to_sign: &str) -> StoreResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StoreError::InvalidResponse(format!("HMAC key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub(crate) fn tags_to_xml(tags: &Tags) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><Tags><TagSet>"#);
    for (key, value) in tags {
        xml.push_str(&format!(
            "<Tag><Key>{}</Key><Value>{}</Value></Tag>",
            xml_escape(key),
            xml_escape(value)
        ));
    }
    xml.push_str("</TagSet></Tags>");
    xml
}

pub(crate) fn parse_tags_xml(xml: &str) -> Tags {
    TAG_PATTERN
        .captures_iter(xml)
        .map(|c| (xml_unescape(&c[1]), xml_unescape(&c[2])))
        .collect()
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct BlobListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

pub(crate) fn parse_blob_list_xml(xml: &str) -> BlobListPage {
    BlobListPage {
        names: BLOB_NAME_PATTERN
            .captures_iter(xml)
            .map(|c| xml_unescape(&c[1]))
            .collect(),
        next_marker: NEXT_MARKER_PATTERN
            .captures(xml)
            .map(|c| xml_unescape(c[1].trim()))
            .filter(|m| !m.is_empty()),
    }
}
