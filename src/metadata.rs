use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::MetadataSettings;
use crate::domain::{AnalysisId, ExperimentId, LineageRef};
use crate::error::ArchiverError;
use crate::fields::AnalysisFields;

/// Identifier issued by the metadata service for a freshly created record.
/// It lives in a different namespace than `AnalysisId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ancestry {
    Experiment(ExperimentId),
    Analyses(Vec<AnalysisId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageNode {
    pub id: AnalysisId,
    pub analysis_type: String,
    pub subtype: String,
    pub reference: String,
    pub ancestry: Ancestry,
}

/// Analysis record as returned by the LIMS API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisRecord {
    pub fk_ax_uid: Option<u64>,
    #[serde(default)]
    pub s_analysis_type: Option<String>,
    #[serde(default)]
    pub s_analysis_subtype: Option<String>,
    #[serde(default)]
    pub s_reference_file: Option<String>,
    #[serde(default)]
    pub fk_experiments: Vec<u64>,
    #[serde(default)]
    pub fk_analyses: Vec<u64>,
}

impl TryFrom<AnalysisRecord> for LineageNode {
    type Error = ArchiverError;

    fn try_from(record: AnalysisRecord) -> Result<Self, Self::Error> {
        let id = record.fk_ax_uid.map(AnalysisId::new).ok_or_else(|| {
            ArchiverError::MalformedLineageGraph("analysis record without fk_ax_uid".to_string())
        })?;
        let ancestry = match (record.fk_experiments.as_slice(), record.fk_analyses.as_slice()) {
            ([experiment], []) => Ancestry::Experiment(ExperimentId::new(*experiment)),
            ([], analyses) if !analyses.is_empty() => {
                Ancestry::Analyses(analyses.iter().copied().map(AnalysisId::new).collect())
            }
            _ => {
                return Err(ArchiverError::MalformedLineageGraph(format!(
                    "{id} must have exactly one experiment or at least one ancestor analysis"
                )));
            }
        };
        Ok(LineageNode {
            id,
            analysis_type: record.s_analysis_type.unwrap_or_default(),
            subtype: record.s_analysis_subtype.unwrap_or_default(),
            reference: record.s_reference_file.unwrap_or_default(),
            ancestry,
        })
    }
}

pub trait MetadataService: Send + Sync {
    /// Every analysis linked to `id`, including `id` itself when it is an analysis.
    fn query_related(&self, id: LineageRef) -> Result<Vec<LineageNode>, ArchiverError>;
    fn create(&self, fields: &AnalysisFields, collection: &str) -> Result<ServiceId, ArchiverError>;
    fn get_by_id(&self, id: ServiceId, collection: &str) -> Result<LineageNode, ArchiverError>;
    fn find_experiment(
        &self,
        external_id: &str,
        collection: &str,
    ) -> Result<Option<ExperimentId>, ArchiverError>;
    /// Uid of the first sample linked to the experiment.
    fn experiment_sample(&self, experiment: ExperimentId) -> Result<Option<String>, ArchiverError>;
    fn sample_name(&self, sample: &str) -> Result<Option<String>, ArchiverError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentRecord {
    i_xp_uid: Option<u64>,
    #[serde(default)]
    fk_samples: Vec<SampleLink>,
}

#[derive(Debug, Deserialize)]
struct SampleLink {
    s_sample_uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SampleRecord {
    name: Option<String>,
}

pub struct MetadataHttpClient {
    client: Client,
    api_url: String,
    lab_group: String,
    modules: Vec<String>,
    collection: String,
    token: String,
}

impl MetadataHttpClient {
    /// Builds the client and exchanges the configured credentials for a token.
    pub fn connect(settings: &MetadataSettings) -> Result<Self, ArchiverError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pipeline-archiver/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))?;

        let mut this = Self {
            client,
            api_url: settings.api_url(),
            lab_group: settings.lab_group.clone(),
            modules: settings.modules.clone(),
            collection: settings.collection.clone(),
            token: String::new(),
        };
        this.token = this.authenticate(&settings.username, &settings.password)?;
        Ok(this)
    }

    fn authenticate(&self, username: &str, password: &str) -> Result<String, ArchiverError> {
        let url = format!("{}/auth/login", self.api_url);
        let body = serde_json::json!({ "username": username, "password": password });
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        let response = Self::handle_status(response)?;
        let token: TokenResponse = response
            .json()
            .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))?;
        Ok(token.token)
    }

    fn lab_url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.api_url, self.lab_group)
    }

    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ArchiverError> {
        let response = self.send_with_retries(|| {
            self.client
                .get(url)
                .bearer_auth(&self.token)
                .query(query)
        })?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))
    }

    fn search(
        &self,
        path: &str,
        keyword: &str,
        field: &str,
    ) -> Result<Vec<Value>, ArchiverError> {
        let url = self.lab_url(path);
        let value = self.get_json(&url, &[("by_keywords", keyword), ("search_on", field)])?;
        Ok(data_array(value))
    }

    fn handle_status(response: Response) -> Result<Response, ArchiverError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "metadata request failed".to_string());
        Err(ArchiverError::MetadataStatus { status, message })
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
                    return Err(ArchiverError::MetadataHttp(err.to_string()));
                }
            }
        }
    }
}

impl MetadataService for MetadataHttpClient {
    fn query_related(&self, id: LineageRef) -> Result<Vec<LineageNode>, ArchiverError> {
        let keyword = id.to_string();
        let mut nodes = Vec::new();
        for module in &self.modules {
            let records = self.search(&format!("ax/{module}"), &keyword, "s_uid")?;
            nodes.extend(related_nodes(id, records)?);
        }
        debug!(related = %keyword, count = nodes.len(), "queried related analyses");
        Ok(nodes)
    }

    fn create(&self, fields: &AnalysisFields, collection: &str) -> Result<ServiceId, ArchiverError> {
        let url = self.lab_url(&format!("ax/{collection}"));
        let response = self.send_with_retries(|| {
            self.client.post(&url).bearer_auth(&self.token).json(fields)
        })?;
        let response = Self::handle_status(response)?;
        let envelope: Envelope<u64> = response
            .json()
            .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))?;
        Ok(ServiceId(envelope.data))
    }

    fn get_by_id(&self, id: ServiceId, collection: &str) -> Result<LineageNode, ArchiverError> {
        let url = self.lab_url(&format!("ax/{collection}/{}", id.0));
        let response = self.send_with_retries(|| self.client.get(&url).bearer_auth(&self.token))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ArchiverError::NotFound(format!("{collection} record {}", id.0)));
        }
        let response = Self::handle_status(response)?;
        let envelope: Envelope<AnalysisRecord> = response
            .json()
            .map_err(|err| ArchiverError::MetadataHttp(err.to_string()))?;
        LineageNode::try_from(envelope.data)
    }

    fn find_experiment(
        &self,
        external_id: &str,
        collection: &str,
    ) -> Result<Option<ExperimentId>, ArchiverError> {
        let records = self.search(&format!("xp/{collection}"), external_id, "s_external_id")?;
        let first = records.into_iter().next();
        match first {
            Some(raw) => {
                let record: ExperimentRecord = parse_record(raw, "experiment")?;
                Ok(record.i_xp_uid.map(ExperimentId::new))
            }
            None => Ok(None),
        }
    }

    fn experiment_sample(&self, experiment: ExperimentId) -> Result<Option<String>, ArchiverError> {
        let records = self.search(
            &format!("xp/{}", self.collection),
            &experiment.to_string(),
            "s_uid",
        )?;
        for raw in records {
            let record: ExperimentRecord = parse_record(raw, "experiment")?;
            if record.i_xp_uid == Some(experiment.value()) {
                return Ok(record
                    .fk_samples
                    .into_iter()
                    .next()
                    .and_then(|sample| sample.s_sample_uid));
            }
        }
        Ok(None)
    }

    fn sample_name(&self, sample: &str) -> Result<Option<String>, ArchiverError> {
        let records = self.search("sa", sample, "s_uid")?;
        match records.into_iter().next() {
            Some(raw) => {
                let record: SampleRecord = parse_record(raw, "sample")?;
                Ok(record.name)
            }
            None => Ok(None),
        }
    }
}

/// Unwraps the `data.data` list the search endpoints answer with.
fn data_array(value: Value) -> Vec<Value> {
    let inner = value.get("data").cloned().unwrap_or(Value::Null);
    let list = match inner {
        Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    match list {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Keyword search also matches siblings (`AX7` finds `AX70`). Records that do
/// not form a lineage node are skipped unless they are the queried analysis.
fn related_nodes(id: LineageRef, records: Vec<Value>) -> Result<Vec<LineageNode>, ArchiverError> {
    let mut nodes = Vec::with_capacity(records.len());
    for raw in records {
        let record: AnalysisRecord = match parse_record(raw, "analysis") {
            Ok(record) => record,
            Err(err) => {
                warn!(related = %id, error = %err, "skipping unreadable analysis record");
                continue;
            }
        };
        let is_target = matches!(
            (id, record.fk_ax_uid),
            (LineageRef::Analysis(target), Some(uid)) if target == AnalysisId::new(uid)
        );
        match LineageNode::try_from(record) {
            Ok(node) => nodes.push(node),
            Err(err) if is_target => return Err(err),
            Err(err) => warn!(related = %id, error = %err, "skipping malformed analysis record"),
        }
    }
    Ok(nodes)
}

fn parse_record<T: serde::de::DeserializeOwned>(raw: Value, name: &str) -> Result<T, ArchiverError> {
    serde_json::from_value(raw).map_err(|err| ArchiverError::Json {
        name: format!("{name} record"),
        message: err.to_string(),
    })
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
