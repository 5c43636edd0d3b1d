//! S3-compatible object store over plain HTTP with AWS Signature Version 4.
//!
//! Objects are addressed path-style (`{endpoint}/{bucket}/{key}`), which both AWS
//! and MinIO accept.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::blob::BlobStore;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

pub struct S3BlobStore {
    client: Client,
    endpoint: Url,
    bucket: String,
    credentials: S3Credentials,
}

impl S3BlobStore {
    /// `endpoint` defaults to the regional AWS endpoint when `None`.
    pub fn new(endpoint: Option<&str>, bucket: &str, credentials: S3Credentials) -> Result<Self> {
        let endpoint = match endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", credentials.region),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid S3 endpoint '{endpoint}': {e}")))?;
        if endpoint.host_str().is_none() {
            return Err(Error::Config(format!("S3 endpoint '{endpoint}' has no host")));
        }
        info!(%endpoint, bucket, "using S3 endpoint");

        Ok(Self {
            client: Client::new(),
            endpoint,
            bucket: bucket.to_string(),
            credentials,
        })
    }

    fn object_path(&self, key: &str) -> String {
        let base = self.endpoint.path().trim_end_matches('/');
        format!("{base}/{}/{}", uri_encode(&self.bucket), uri_encode(key))
    }

    fn host(&self) -> String {
        // `host_str` is checked in `new`
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    fn error(key: &str, reason: impl ToString) -> Error {
        Error::BlobStore {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Vec<u8>,
        extra_headers: BTreeMap<String, String>,
    ) -> Result<StatusCode> {
        let path = self.object_path(key);
        let url = format!("{}://{}{path}", self.endpoint.scheme(), self.host());
        let payload_hash = hex::encode(Sha256::digest(&body));
        let now = Utc::now();

        let mut headers = extra_headers;
        headers.insert("host".into(), self.host());
        headers.insert("x-amz-content-sha256".into(), payload_hash.clone());
        headers.insert("x-amz-date".into(), amz_date(&now));

        let authorization = sign(
            &self.credentials,
            method.as_str(),
            &path,
            &headers,
            &payload_hash,
            &now,
        )?;

        let mut req = self
            .client
            .request(method, &url)
            .header("authorization", authorization);
        for (name, value) in &headers {
            if name != "host" {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        let res = req.body(body).send().await?;
        Ok(res.status())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let status = self
            .send(Method::HEAD, key, Vec::new(), BTreeMap::new())
            .await?;
        debug!(key, %status, "head object");
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(Self::error(key, format!("HEAD returned {s}"))),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<String> {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        for (name, value) in metadata {
            headers.insert(
                format!("x-amz-meta-{}", name.to_lowercase()),
                value.trim().to_string(),
            );
        }

        let status = self.send(Method::PUT, key, bytes, headers).await?;
        if !status.is_success() {
            return Err(Self::error(key, format!("PUT returned {status}")));
        }
        info!(key, "document uploaded");
        Ok(self.locator(key))
    }

    fn locator(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }
}

fn amz_date(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Builds the `Authorization` header value. `headers` must hold lowercase names
/// and include `host`, `x-amz-content-sha256` and `x-amz-date`; all of them are signed.
fn sign(
    credentials: &S3Credentials,
    method: &str,
    path: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
    now: &DateTime<Utc>,
) -> Result<String> {
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{}/{SERVICE}/aws4_request", credentials.region);

    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{name}:{}\n", value.trim()))
        .collect();
    let signed_headers = headers.keys().cloned().collect::<Vec<_>>().join(";");
    let canonical_request =
        format!("{method}\n{path}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let string_to_sign = format!(
        "{ALGORITHM}\n{}\n{scope}\n{}",
        amz_date(now),
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_access_key, &date, &credentials.region)?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    ))
}

fn signing_key(secret: &str, date: &str, region: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| Error::Config(format!("unusable signing key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Percent-encodes everything but unreserved characters and `/`.
fn uri_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
