use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderValue, LAST_MODIFIED, USER_AGENT};
use sha2::Sha256;
use tracing::debug;
use url::Url;

use crate::config::{ArchiverConfig, StorageAccount};
use crate::domain::CopyStatus;
use crate::error::ArchiverError;
use crate::store::{
    AccessGrant, BlobProperties, BlobUrl, CopyHandle, CopyState, DeleteOptions, ObjectStore,
};

type HmacSha256 = Hmac<Sha256>;

pub const STORAGE_VERSION: &str = "2020-12-06";

const COPY_STATUS: &str = "x-ms-copy-status";
const COPY_SOURCE: &str = "x-ms-copy-source";

/// Blob REST client. Requests are authorised with an account SAS per
/// configured account; `grant` issues container SAS tokens bound to a
/// stored access policy.
pub struct BlobRestStore {
    client: Client,
    endpoint: String,
    keys: HashMap<String, String>,
    account_sas: HashMap<String, String>,
}

impl BlobRestStore {
    pub fn new(config: &ArchiverConfig) -> Result<Self, ArchiverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pipeline-archiver/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiverError::StoreHttp(err.to_string()))?,
        );
        headers.insert("x-ms-version", HeaderValue::from_static(STORAGE_VERSION));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ArchiverError::StoreHttp(err.to_string()))?;

        let expiry = Utc::now() + chrono::Duration::minutes(config.grant_ttl_minutes);
        let mut keys = HashMap::new();
        let mut account_sas = HashMap::new();
        for StorageAccount { account, key } in config.accounts() {
            account_sas.insert(account.clone(), account_sas_query(&account, &key, expiry)?);
            keys.insert(account, key);
        }

        Ok(Self {
            client,
            endpoint: config.endpoint_suffix.clone(),
            keys,
            account_sas,
        })
    }

    fn signed(&self, url: &BlobUrl) -> Result<Url, ArchiverError> {
        self.signed_raw(url.account(), &url.to_string())
    }

    fn signed_raw(&self, account: &str, raw: &str) -> Result<Url, ArchiverError> {
        let sas = self
            .account_sas
            .get(account)
            .ok_or_else(|| ArchiverError::InvalidConfig(format!("no key for account {account}")))?;
        let mut url = Url::parse(raw).map_err(|_| ArchiverError::InvalidBlobUrl(raw.to_string()))?;
        url.set_query(Some(sas.as_str()));
        Ok(url)
    }

    fn handle_status(url: &BlobUrl, response: Response) -> Result<Response, ArchiverError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "blob request failed".to_string());
        Err(ArchiverError::StoreStatus {
            status,
            url: url.to_string(),
            message: error_code(&message),
        })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, ArchiverError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(ArchiverError::StoreHttp(err.to_string()));
                }
            }
        }
    }

    fn head(&self, url: &BlobUrl) -> Result<Response, ArchiverError> {
        let signed = self.signed(url)?;
        self.send_with_retries(|| self.client.head(signed.clone()))
    }
}

impl ObjectStore for BlobRestStore {
    fn begin_copy(&self, source: &str, destination: &BlobUrl) -> Result<CopyHandle, ArchiverError> {
        let signed = self.signed(destination)?;
        let response = self.send_with_retries(|| {
            self.client
                .put(signed.clone())
                .header(COPY_SOURCE, source)
                .header(CONTENT_LENGTH, 0)
        })?;
        let response = Self::handle_status(destination, response)?;
        let status = header(&response, COPY_STATUS).and_then(|value| CopyStatus::from_header(&value));
        debug!(destination = %destination, status = ?status, "copy started");
        Ok(CopyHandle {
            destination: destination.clone(),
            status,
        })
    }

    fn copy_state(&self, url: &BlobUrl) -> Result<Option<CopyState>, ArchiverError> {
        let response = self.head(url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::handle_status(url, response)?;
        Ok(Some(CopyState {
            http_status: response.status().as_u16(),
            status: header(&response, COPY_STATUS).and_then(|value| CopyStatus::from_header(&value)),
            source_url: header(&response, COPY_SOURCE),
        }))
    }

    fn read(&self, url: &BlobUrl) -> Result<Vec<u8>, ArchiverError> {
        let signed = self.signed(url)?;
        let response = self.send_with_retries(|| self.client.get(signed.clone()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ArchiverError::NotFound(url.to_string()));
        }
        let response = Self::handle_status(url, response)?;
        let bytes = response
            .bytes()
            .map_err(|err| ArchiverError::StoreHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn write(&self, url: &BlobUrl, content: &[u8]) -> Result<(), ArchiverError> {
        let signed = self.signed(url)?;
        let response = self.send_with_retries(|| {
            self.client
                .put(signed.clone())
                .header("x-ms-blob-type", "BlockBlob")
                .body(content.to_vec())
        })?;
        Self::handle_status(url, response)?;
        Ok(())
    }

    fn delete(&self, url: &BlobUrl, options: DeleteOptions) -> Result<bool, ArchiverError> {
        let signed = self.signed(url)?;
        let response = self.send_with_retries(|| {
            let request = self.client.delete(signed.clone());
            if options.include_snapshots {
                request.header("x-ms-delete-snapshots", "include")
            } else {
                request
            }
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::handle_status(url, response)?;
        Ok(true)
    }

    fn list(
        &self,
        account: &str,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobUrl>, ArchiverError> {
        let endpoint = self.endpoint.as_str();
        let probe = BlobUrl::new(account, endpoint, container, "");
        let container_url = probe.container_url();
        let mut blobs = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut url = self.signed_raw(account, &container_url)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                if !prefix.is_empty() {
                    query.append_pair("prefix", prefix);
                }
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }
            let response = self.send_with_retries(|| self.client.get(url.clone()))?;
            let response = Self::handle_status(&probe, response)?;
            let body = response
                .text()
                .map_err(|err| ArchiverError::StoreHttp(err.to_string()))?;
            let page = parse_list_page(&body)?;
            blobs.extend(
                page.names
                    .iter()
                    .map(|name| BlobUrl::new(account, endpoint, container, name)),
            );
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(blobs)
    }

    fn properties(&self, url: &BlobUrl) -> Result<BlobProperties, ArchiverError> {
        let response = self.head(url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ArchiverError::NotFound(url.to_string()));
        }
        let response = Self::handle_status(url, response)?;
        let raw = header(&response, LAST_MODIFIED.as_str())
            .ok_or_else(|| ArchiverError::StoreHttp(format!("no Last-Modified for {url}")))?;
        let last_modified = DateTime::parse_from_rfc2822(&raw)
            .map_err(|err| ArchiverError::StoreHttp(format!("bad Last-Modified {raw}: {err}")))?
            .with_timezone(&Utc);
        Ok(BlobProperties { last_modified })
    }

    fn grant(
        &self,
        account: &str,
        container: &str,
        policy: &str,
    ) -> Result<AccessGrant, ArchiverError> {
        let key = self
            .keys
            .get(account)
            .ok_or_else(|| ArchiverError::InvalidConfig(format!("no key for account {account}")))?;
        Ok(AccessGrant {
            query: container_sas_query(account, key, container, policy)?,
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

pub fn parse_list_page(body: &str) -> Result<ListPage, ArchiverError> {
    let invalid = |err: quick_xml::Error| ArchiverError::StoreHttp(format!("blob listing: {err}"));
    Ok(ListPage {
        names: element_texts(body, &["Blob", "Name"]).map_err(invalid)?,
        next_marker: element_texts(body, &["NextMarker"])
            .map_err(invalid)?
            .into_iter()
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty()),
    })
}

/// Text of every element whose innermost ancestors are `path`.
fn element_texts(body: &str, path: &[&str]) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<String> = None;
    let mut texts = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                stack.push(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
                if ends_with(&stack, path) {
                    current = Some(String::new());
                }
            }
            Event::Text(text) => {
                if let Some(value) = current.as_mut() {
                    value.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(value) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::End(_) => {
                if ends_with(&stack, path) {
                    texts.extend(current.take());
                }
                stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(texts)
}

fn ends_with(stack: &[String], path: &[&str]) -> bool {
    stack.len() >= path.len()
        && stack[stack.len() - path.len()..]
            .iter()
            .zip(path)
            .all(|(name, expected)| name == expected)
}

fn error_code(body: &str) -> String {
    element_texts(body, &["Error", "Code"])
        .ok()
        .and_then(|codes| codes.into_iter().next())
        .unwrap_or_else(|| body.trim().to_string())
}

fn header(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

pub fn account_sas_string_to_sign(account: &str, expiry: &str) -> String {
    let fields = [
        account,
        "racwdl",
        "b",
        "sco",
        "",
        expiry,
        "",
        "https",
        STORAGE_VERSION,
        "",
    ];
    format!("{}\n", fields.join("\n"))
}

pub fn container_sas_string_to_sign(account: &str, container: &str, policy: &str) -> String {
    let resource = format!("/blob/{account}/{container}");
    let fields = [
        "",
        "",
        "",
        resource.as_str(),
        policy,
        "",
        "",
        STORAGE_VERSION,
        "c",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
    ];
    fields.join("\n")
}

pub fn sign(key: &str, string_to_sign: &str) -> Result<String, ArchiverError> {
    let decoded = STANDARD
        .decode(key.trim())
        .map_err(|_| ArchiverError::InvalidConfig("storage key is not valid base64".to_string()))?;
    let mut mac = HmacSha256::new_from_slice(&decoded)
        .map_err(|err| ArchiverError::InvalidConfig(err.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn account_sas_query(
    account: &str,
    key: &str,
    expiry: DateTime<Utc>,
) -> Result<String, ArchiverError> {
    let expiry = expiry.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let signature = sign(key, &account_sas_string_to_sign(account, &expiry))?;
    Ok(url::form_urlencoded::Serializer::new(String::new())
        .append_pair("sv", STORAGE_VERSION)
        .append_pair("ss", "b")
        .append_pair("srt", "sco")
        .append_pair("sp", "racwdl")
        .append_pair("se", &expiry)
        .append_pair("spr", "https")
        .append_pair("sig", &signature)
        .finish())
}

fn container_sas_query(
    account: &str,
    key: &str,
    container: &str,
    policy: &str,
) -> Result<String, ArchiverError> {
    let signature = sign(key, &container_sas_string_to_sign(account, container, policy))?;
    Ok(url::form_urlencoded::Serializer::new(String::new())
        .append_pair("sv", STORAGE_VERSION)
        .append_pair("sr", "c")
        .append_pair("si", policy)
        .append_pair("sig", &signature)
        .finish())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_sas_layout() {
        let value = container_sas_string_to_sign("cluster", "inputs", "read-only");
        assert_eq!(
            value,
            "\n\n\n/blob/cluster/inputs\nread-only\n\n\n2020-12-06\nc\n\n\n\n\n\n\n"
        );
    }

    #[test]
    fn account_sas_layout() {
        let value = account_sas_string_to_sign("lims", "2026-10-16T10:00:00Z");
        assert_eq!(
            value,
            "lims\nracwdl\nb\nsco\n\n2026-10-16T10:00:00Z\n\nhttps\n2020-12-06\n\n"
        );
    }

    #[test]
    fn sign_rejects_invalid_key() {
        assert!(sign("not base64!", "payload").is_err());
        let signature = sign("a2V5", "payload").unwrap();
        assert_eq!(STANDARD.decode(signature).unwrap().len(), 32);
    }

    #[test]
    fn list_page_names_and_marker() {
        let body = "<EnumerationResults ContainerName=\"staging\"><Blobs>\
            <Blob><Name>copied-files/Mutect2.abc.txt</Name></Blob>\
            <Blob><Name>copied-files/a&amp;b.txt</Name></Blob>\
            <Blob><Name>copied-files/&#252;n&#xEF;.txt</Name></Blob>\
            <Blob><Name><![CDATA[copied-files/<raw>.txt]]></Name></Blob>\
            </Blobs><NextMarker>page2</NextMarker></EnumerationResults>";
        let page = parse_list_page(body).unwrap();
        assert_eq!(
            page.names,
            vec![
                "copied-files/Mutect2.abc.txt",
                "copied-files/a&b.txt",
                "copied-files/ünï.txt",
                "copied-files/<raw>.txt",
            ]
        );
        assert_eq!(page.next_marker.as_deref(), Some("page2"));

        let last =
            parse_list_page("<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>")
                .unwrap();
        assert_eq!(last, ListPage::default());
    }

    #[test]
    fn error_code_extracted_from_xml() {
        let body = "<?xml version=\"1.0\"?><Error><Code>CannotVerifyCopySource</Code></Error>";
        assert_eq!(error_code(body), "CannotVerifyCopySource");
        assert_eq!(error_code("upstream timeout"), "upstream timeout");
    }
}
