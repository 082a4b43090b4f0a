use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use url::Url;

use crate::config::ArchiverConfig;
use crate::domain::{AnalysisId, Category, CopyStatus, PipelineType, Study};
use crate::error::ArchiverError;

/// Characters escaped inside one path segment of a blob url. Commas are
/// included so a manifest line never splits inside a name.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b',')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Location of one blob, without any access query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobUrl {
    account: String,
    endpoint: String,
    container: String,
    path: String,
}

impl BlobUrl {
    pub fn new(account: &str, endpoint: &str, container: &str, path: &str) -> Self {
        Self {
            account: account.to_string(),
            endpoint: endpoint.to_string(),
            container: container.to_string(),
            path: path.trim_start_matches('/').to_string(),
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Blob name relative to its container.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        name.rfind('.')
            .filter(|idx| *idx > 0)
            .map(|idx| &name[idx + 1..])
    }

    /// Same account and container, different blob name.
    pub fn sibling(&self, path: &str) -> Self {
        Self::new(&self.account, &self.endpoint, &self.container, path)
    }

    pub fn container_url(&self) -> String {
        format!(
            "https://{}.{}/{}",
            self.account,
            self.endpoint,
            utf8_percent_encode(&self.container, SEGMENT)
        )
    }
}

impl fmt::Display for BlobUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container_url(), encode_path(&self.path))
    }
}

impl FromStr for BlobUrl {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ArchiverError::InvalidBlobUrl(value.to_string());
        let parsed = Url::parse(value.trim()).map_err(|_| invalid())?;
        let host = parsed.host_str().ok_or_else(invalid)?;
        let (account, endpoint) = host.split_once('.').ok_or_else(invalid)?;
        let mut segments = parsed
            .path_segments()
            .ok_or_else(invalid)?
            .map(|segment| percent_decode_str(segment).decode_utf8());
        let container = segments.next().ok_or_else(invalid)?.map_err(|_| invalid())?;
        let blob = segments
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?
            .join("/");
        if account.is_empty() || container.is_empty() || blob.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(account, endpoint, &container, &blob))
    }
}

/// Short-lived read grant for one container, rendered as a query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub query: String,
}

impl AccessGrant {
    pub fn apply(&self, url: &BlobUrl) -> String {
        if self.query.is_empty() {
            return url.to_string();
        }
        format!("{url}?{}", self.query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyHandle {
    pub destination: BlobUrl,
    pub status: Option<CopyStatus>,
}

/// Observed state of a blob that was (or is being) written by a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyState {
    pub http_status: u16,
    pub status: Option<CopyStatus>,
    pub source_url: Option<String>,
}

impl CopyState {
    pub fn is_success(&self) -> bool {
        self.status == Some(CopyStatus::Success)
    }

    /// Copy source with any grant query string removed.
    pub fn source(&self) -> Option<BlobUrl> {
        self.source_url
            .as_deref()
            .and_then(|value| value.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobProperties {
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    pub include_snapshots: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            include_snapshots: true,
        }
    }
}

/// Primitive operations of the blob store. Every call blocks.
pub trait ObjectStore: Send + Sync {
    /// Starts a store-side copy from `source` (a url that may carry a grant).
    fn begin_copy(&self, source: &str, destination: &BlobUrl) -> Result<CopyHandle, ArchiverError>;
    /// `None` when the blob does not exist.
    fn copy_state(&self, url: &BlobUrl) -> Result<Option<CopyState>, ArchiverError>;
    fn read(&self, url: &BlobUrl) -> Result<Vec<u8>, ArchiverError>;
    fn write(&self, url: &BlobUrl, content: &[u8]) -> Result<(), ArchiverError>;
    /// Returns `false` when the blob was already gone.
    fn delete(&self, url: &BlobUrl, options: DeleteOptions) -> Result<bool, ArchiverError>;
    fn list(&self, account: &str, container: &str, prefix: &str)
    -> Result<Vec<BlobUrl>, ArchiverError>;
    fn properties(&self, url: &BlobUrl) -> Result<BlobProperties, ArchiverError>;
    fn grant(&self, account: &str, container: &str, policy: &str)
    -> Result<AccessGrant, ArchiverError>;
}

/// Where every artifact of an execution lives.
#[derive(Debug, Clone)]
pub struct Layout {
    endpoint: String,
    cluster_account: String,
    workflows_container: String,
    executions_container: String,
    inputs_container: String,
    outputs_container: String,
    logs_container: String,
    lims_account: String,
    staging_container: String,
    dropbox_container: String,
    staging_directory: String,
    output_account: String,
}

impl Layout {
    pub fn new(config: &ArchiverConfig) -> Self {
        Self {
            endpoint: config.endpoint_suffix.clone(),
            cluster_account: config.cluster.credentials.account.clone(),
            workflows_container: config.cluster.workflows_container.clone(),
            executions_container: config.cluster.executions_container.clone(),
            inputs_container: config.cluster.inputs_container.clone(),
            outputs_container: config.cluster.outputs_container.clone(),
            logs_container: config.cluster.logs_container.clone(),
            lims_account: config.lims_storage.credentials.account.clone(),
            staging_container: config.lims_storage.staging_container.clone(),
            dropbox_container: config.lims_storage.dropbox_container.clone(),
            staging_directory: config.lims_storage.staging_directory.clone(),
            output_account: config.output_storage.account.clone(),
        }
    }

    pub fn lims_account(&self) -> &str {
        &self.lims_account
    }

    pub fn staging_container(&self) -> &str {
        &self.staging_container
    }

    pub fn cluster_account(&self) -> &str {
        &self.cluster_account
    }

    pub fn executions_container(&self) -> &str {
        &self.executions_container
    }

    fn cluster(&self, container: &str, path: &str) -> BlobUrl {
        BlobUrl::new(&self.cluster_account, &self.endpoint, container, path)
    }

    /// Resolves a workflow output path of the form `/{container}/{path}`
    /// (or a full url) in the cluster account.
    pub fn execution_file(&self, value: &str) -> Result<BlobUrl, ArchiverError> {
        if value.starts_with("https://") || value.starts_with("http://") {
            return value.parse();
        }
        let trimmed = value.trim_start_matches('/');
        let (container, path) = trimmed
            .split_once('/')
            .filter(|(container, path)| !container.is_empty() && !path.is_empty())
            .ok_or_else(|| ArchiverError::InvalidBlobUrl(value.to_string()))?;
        Ok(self.cluster(container, path))
    }

    pub fn trigger_url(&self, filename: &str, execution_id: &str) -> BlobUrl {
        self.cluster(
            &self.workflows_container,
            &format!("succeeded/{filename}.{execution_id}.json"),
        )
    }

    pub fn metadata_url(&self, filename: &str, execution_id: &str) -> BlobUrl {
        self.cluster(
            &self.outputs_container,
            &format!("{filename}.{execution_id}.metadata.json"),
        )
    }

    pub fn outputs_url(&self, filename: &str, execution_id: &str) -> BlobUrl {
        self.cluster(
            &self.outputs_container,
            &format!("{filename}.{execution_id}.outputs.json"),
        )
    }

    pub fn timing_url(&self, filename: &str, execution_id: &str) -> BlobUrl {
        self.cluster(
            &self.outputs_container,
            &format!("{filename}.{execution_id}.timing.html"),
        )
    }

    pub fn workflow_log_url(&self, execution_id: &str) -> BlobUrl {
        self.cluster(
            &self.logs_container,
            &format!("workflow.{execution_id}.log"),
        )
    }

    /// Copy of `url` inside a dated archive folder of the same container.
    pub fn dated_copy(&self, url: &BlobUrl, folder: &str) -> BlobUrl {
        url.sibling(&format!("{folder}/{}", url.path()))
    }

    pub fn library_input_url(&self, library_id: &str, file_name: &str) -> BlobUrl {
        self.cluster(&self.inputs_container, &format!("{library_id}/{file_name}"))
    }

    pub fn executions_prefix(&self, pipeline: PipelineType, execution_id: &str) -> String {
        format!("{pipeline}/{execution_id}")
    }

    pub fn staging_url(&self, group: AnalysisId, category: Category, file_name: &str) -> BlobUrl {
        BlobUrl::new(
            &self.lims_account,
            &self.endpoint,
            &self.staging_container,
            &format!("{group}/{category}/{file_name}"),
        )
    }

    pub fn is_staged(&self, url: &BlobUrl) -> bool {
        url.account() == self.lims_account && url.container() == self.staging_container
    }

    /// Dropbox destination for a staged copy; keeps the `{group}/...` path.
    pub fn dropbox_url(&self, staged: &BlobUrl) -> BlobUrl {
        BlobUrl::new(
            &self.lims_account,
            &self.endpoint,
            &self.dropbox_container,
            staged.path(),
        )
    }

    pub fn output_storage_url(
        &self,
        study: Study,
        patient_id: &str,
        library_id: &str,
        file_name: &str,
    ) -> BlobUrl {
        BlobUrl::new(
            &self.output_account,
            &self.endpoint,
            study.as_str(),
            &format!("{patient_id}/{library_id}/{file_name}"),
        )
    }

    pub fn manifest_prefix(&self) -> String {
        format!("{}/", self.staging_directory)
    }

    pub fn manifest_url(&self, pipeline: PipelineType, execution_id: &str) -> BlobUrl {
        BlobUrl::new(
            &self.lims_account,
            &self.endpoint,
            &self.staging_container,
            &format!("{}/{pipeline}.{execution_id}.txt", self.staging_directory),
        )
    }
}

/// Sunday-to-Saturday week folder, e.g. `oct_11-oct_17_26`.
pub fn dated_folder(date: NaiveDate) -> String {
    let start = date - Duration::days(i64::from(date.weekday().num_days_from_sunday()));
    let end = start + Duration::days(6);
    format!("{}-{}", start.format("%b_%-d"), end.format("%b_%-d_%y")).to_lowercase()
}
