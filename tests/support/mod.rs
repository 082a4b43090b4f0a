#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use pipeline_archiver::config::{
    ArchiverConfig, ClusterStorage, LimsStorage, MetadataSettings, StorageAccount,
};
use pipeline_archiver::domain::{AnalysisId, CopyStatus, ExperimentId, LineageRef};
use pipeline_archiver::error::ArchiverError;
use pipeline_archiver::fields::{AnalysisFields, Links};
use pipeline_archiver::metadata::{Ancestry, LineageNode, MetadataService, ServiceId};
use pipeline_archiver::store::{
    AccessGrant, BlobProperties, BlobUrl, CopyHandle, CopyState, DeleteOptions, ObjectStore,
};

pub const ENDPOINT: &str = "blob.core.windows.net";

pub fn test_config() -> ArchiverConfig {
    ArchiverConfig {
        schema_version: 1,
        endpoint_suffix: ENDPOINT.to_string(),
        grant_ttl_minutes: 60,
        cluster: ClusterStorage {
            credentials: StorageAccount {
                account: "cromwell".to_string(),
                key: "Y2x1c3Rlcg==".to_string(),
            },
            stored_policy: "archiver-read".to_string(),
            workflows_container: "workflows".to_string(),
            executions_container: "cromwell-executions".to_string(),
            inputs_container: "inputs".to_string(),
            templates_container: "workflow-templates".to_string(),
            outputs_container: "outputs".to_string(),
            logs_container: "workflow-logs".to_string(),
        },
        lims_storage: LimsStorage {
            credentials: StorageAccount {
                account: "lims".to_string(),
                key: "bGltcw==".to_string(),
            },
            staging_container: "staging".to_string(),
            dropbox_container: "dropbox".to_string(),
            staging_directory: "copied-files".to_string(),
        },
        output_storage: StorageAccount {
            account: "results".to_string(),
            key: "cmVzdWx0cw==".to_string(),
        },
        metadata: MetadataSettings {
            base_url: "https://lims.example.org".to_string(),
            api_version: "v2".to_string(),
            lab_group: "lab".to_string(),
            username: "archiver".to_string(),
            password: "secret".to_string(),
            researcher_email: "archiver@example.org".to_string(),
            reference_file_id: 12,
            collection: "genomics".to_string(),
            modules: Vec::new(),
        },
    }
}

pub fn blob(account: &str, container: &str, path: &str) -> BlobUrl {
    BlobUrl::new(account, ENDPOINT, container, path)
}

#[derive(Debug, Clone)]
struct StoredBlob {
    content: Vec<u8>,
    copy: Option<(CopyStatus, String)>,
}

/// Object store kept in memory. New copies take `copy_outcome` as their status.
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<BlobUrl, StoredBlob>>,
    pub calls: Mutex<usize>,
    pub copies: Mutex<Vec<BlobUrl>>,
    pub deleted: Mutex<Vec<BlobUrl>>,
    pub copy_outcome: Mutex<CopyStatus>,
    pub last_modified: DateTime<Utc>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            blobs: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(0),
            copies: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            copy_outcome: Mutex::new(CopyStatus::Pending),
            last_modified: Utc.with_ymd_and_hms(2026, 10, 14, 9, 30, 0).unwrap(),
        }
    }
}

impl MemoryStore {
    fn count(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn put(&self, url: &BlobUrl, content: &str) {
        self.blobs.lock().unwrap().insert(
            url.clone(),
            StoredBlob {
                content: content.as_bytes().to_vec(),
                copy: None,
            },
        );
    }

    pub fn exists(&self, url: &BlobUrl) -> bool {
        self.blobs.lock().unwrap().contains_key(url)
    }

    pub fn content(&self, url: &BlobUrl) -> Option<String> {
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .map(|blob| String::from_utf8_lossy(&blob.content).to_string())
    }

    pub fn set_copy_outcome(&self, status: CopyStatus) {
        *self.copy_outcome.lock().unwrap() = status;
    }

    /// Marks a copied blob with a new status, keeping its source.
    pub fn set_status(&self, url: &BlobUrl, status: CopyStatus) {
        if let Some(blob) = self.blobs.lock().unwrap().get_mut(url) {
            if let Some(copy) = blob.copy.as_mut() {
                copy.0 = status;
            }
        }
    }

    pub fn finish_copies(&self) {
        for blob in self.blobs.lock().unwrap().values_mut() {
            if let Some(copy) = blob.copy.as_mut() {
                if copy.0 == CopyStatus::Pending {
                    copy.0 = CopyStatus::Success;
                }
            }
        }
    }

    pub fn urls(&self) -> Vec<BlobUrl> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<BlobUrl> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<BlobUrl> {
        self.copies.lock().unwrap().clone()
    }
}

impl ObjectStore for MemoryStore {
    fn begin_copy(&self, source: &str, destination: &BlobUrl) -> Result<CopyHandle, ArchiverError> {
        self.count();
        let source_url: BlobUrl = source.parse()?;
        let mut blobs = self.blobs.lock().unwrap();
        let content = blobs
            .get(&source_url)
            .map(|blob| blob.content.clone())
            .ok_or_else(|| ArchiverError::StoreStatus {
                status: 404,
                url: source_url.to_string(),
                message: "BlobNotFound".to_string(),
            })?;
        let status = *self.copy_outcome.lock().unwrap();
        blobs.insert(
            destination.clone(),
            StoredBlob {
                content,
                copy: Some((status, source.to_string())),
            },
        );
        self.copies.lock().unwrap().push(destination.clone());
        Ok(CopyHandle {
            destination: destination.clone(),
            status: Some(status),
        })
    }

    fn copy_state(&self, url: &BlobUrl) -> Result<Option<CopyState>, ArchiverError> {
        self.count();
        Ok(self.blobs.lock().unwrap().get(url).map(|blob| CopyState {
            http_status: 200,
            status: blob.copy.as_ref().map(|(status, _)| *status),
            source_url: blob.copy.as_ref().map(|(_, source)| source.clone()),
        }))
    }

    fn read(&self, url: &BlobUrl) -> Result<Vec<u8>, ArchiverError> {
        self.count();
        self.blobs
            .lock()
            .unwrap()
            .get(url)
            .map(|blob| blob.content.clone())
            .ok_or_else(|| ArchiverError::NotFound(url.to_string()))
    }

    fn write(&self, url: &BlobUrl, content: &[u8]) -> Result<(), ArchiverError> {
        self.count();
        self.blobs.lock().unwrap().insert(
            url.clone(),
            StoredBlob {
                content: content.to_vec(),
                copy: None,
            },
        );
        Ok(())
    }

    fn delete(&self, url: &BlobUrl, _options: DeleteOptions) -> Result<bool, ArchiverError> {
        self.count();
        let removed = self.blobs.lock().unwrap().remove(url).is_some();
        if removed {
            self.deleted.lock().unwrap().push(url.clone());
        }
        Ok(removed)
    }

    fn list(
        &self,
        account: &str,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobUrl>, ArchiverError> {
        self.count();
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|url| {
                url.account() == account
                    && url.container() == container
                    && url.path().starts_with(prefix)
            })
            .cloned()
            .collect())
    }

    fn properties(&self, url: &BlobUrl) -> Result<BlobProperties, ArchiverError> {
        self.count();
        if !self.exists(url) {
            return Err(ArchiverError::NotFound(url.to_string()));
        }
        Ok(BlobProperties {
            last_modified: self.last_modified,
        })
    }

    fn grant(
        &self,
        _account: &str,
        container: &str,
        policy: &str,
    ) -> Result<AccessGrant, ArchiverError> {
        self.count();
        Ok(AccessGrant {
            query: format!("sv=2020-12-06&sr=c&si={policy}&sig={container}"),
        })
    }
}

/// Metadata service backed by a vector of nodes.
#[derive(Default)]
pub struct MemoryMetadata {
    nodes: Mutex<Vec<LineageNode>>,
    experiments: Mutex<HashMap<String, ExperimentId>>,
    samples: Mutex<HashMap<ExperimentId, (String, String)>>,
    created: Mutex<HashMap<ServiceId, AnalysisId>>,
    pub creates: Mutex<usize>,
    pub queries: Mutex<usize>,
}

impl MemoryMetadata {
    pub fn add_node(&self, node: LineageNode) {
        self.nodes.lock().unwrap().push(node);
    }

    pub fn add_analysis(&self, id: u64, analysis_type: &str, ancestry: Ancestry) {
        self.add_node(LineageNode {
            id: AnalysisId::new(id),
            analysis_type: analysis_type.to_string(),
            subtype: String::new(),
            reference: "hg38".to_string(),
            ancestry,
        });
    }

    /// Registers an experiment with its external id and patient sample.
    pub fn add_experiment(&self, id: u64, external_id: &str, patient: &str) {
        let experiment = ExperimentId::new(id);
        self.experiments
            .lock()
            .unwrap()
            .insert(external_id.to_string(), experiment);
        self.samples.lock().unwrap().insert(
            experiment,
            (format!("SA{id}"), patient.to_string()),
        );
    }

    pub fn create_count(&self) -> usize {
        *self.creates.lock().unwrap()
    }

    pub fn nodes(&self) -> Vec<LineageNode> {
        self.nodes.lock().unwrap().clone()
    }
}

impl MetadataService for MemoryMetadata {
    fn query_related(&self, id: LineageRef) -> Result<Vec<LineageNode>, ArchiverError> {
        *self.queries.lock().unwrap() += 1;
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .iter()
            .filter(|node| match (id, &node.ancestry) {
                (LineageRef::Experiment(xp), Ancestry::Experiment(linked)) => *linked == xp,
                (LineageRef::Analysis(ax), Ancestry::Analyses(parents)) => {
                    node.id == ax || parents.contains(&ax)
                }
                (LineageRef::Analysis(ax), Ancestry::Experiment(_)) => node.id == ax,
                _ => false,
            })
            .cloned()
            .collect())
    }

    fn create(&self, fields: &AnalysisFields, _collection: &str) -> Result<ServiceId, ArchiverError> {
        let mut creates = self.creates.lock().unwrap();
        *creates += 1;
        let mut nodes = self.nodes.lock().unwrap();
        let id = AnalysisId::new(900 + nodes.len() as u64);
        let ancestry = match &fields.links {
            Links::Experiments(ids) => Ancestry::Experiment(ExperimentId::new(ids[0])),
            Links::Analyses(ids) => {
                Ancestry::Analyses(ids.iter().copied().map(AnalysisId::new).collect())
            }
        };
        nodes.push(LineageNode {
            id,
            analysis_type: fields.analysis_type.clone(),
            subtype: fields.subtype.clone().unwrap_or_default(),
            reference: fields.reference.clone(),
            ancestry,
        });
        let service_id = ServiceId(50_000 + *creates as u64);
        self.created.lock().unwrap().insert(service_id, id);
        Ok(service_id)
    }

    fn get_by_id(&self, id: ServiceId, _collection: &str) -> Result<LineageNode, ArchiverError> {
        let analysis = self
            .created
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .ok_or_else(|| ArchiverError::NotFound(format!("service id {}", id.0)))?;
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|node| node.id == analysis)
            .cloned()
            .ok_or_else(|| ArchiverError::NotFound(analysis.to_string()))
    }

    fn find_experiment(
        &self,
        external_id: &str,
        _collection: &str,
    ) -> Result<Option<ExperimentId>, ArchiverError> {
        Ok(self.experiments.lock().unwrap().get(external_id).copied())
    }

    fn experiment_sample(&self, experiment: ExperimentId) -> Result<Option<String>, ArchiverError> {
        Ok(self
            .samples
            .lock()
            .unwrap()
            .get(&experiment)
            .map(|(sample, _)| sample.clone()))
    }

    fn sample_name(&self, sample: &str) -> Result<Option<String>, ArchiverError> {
        Ok(self
            .samples
            .lock()
            .unwrap()
            .values()
            .find(|(uid, _)| uid == sample)
            .map(|(_, name)| name.clone()))
    }
}
