use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ArchiverError;

pub const CONFIG_FILE_NAME: &str = "pipeline-archiver.json";
pub const DEFAULT_ENDPOINT_SUFFIX: &str = "blob.core.windows.net";

pub const CLUSTER_KEY_VAR: &str = "CLUSTER_STORAGE_KEY";
pub const LIMS_KEY_VAR: &str = "LIMS_STORAGE_KEY";
pub const OUTPUT_KEY_VAR: &str = "OUTPUT_STORAGE_KEY";
pub const LIMS_PASSWORD_VAR: &str = "LIMS_API_PASSWORD";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub endpoint_suffix: Option<String>,
    #[serde(default)]
    pub grant_ttl_minutes: Option<i64>,
    pub cluster: ClusterEntry,
    pub lims_storage: LimsStorageEntry,
    pub output_storage: AccountEntry,
    pub metadata: MetadataEntry,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccountEntry {
    pub account: String,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ClusterEntry {
    pub account: String,
    #[serde(default)]
    pub key: Option<String>,
    pub stored_policy: String,
    #[serde(default)]
    pub workflows_container: Option<String>,
    #[serde(default)]
    pub executions_container: Option<String>,
    #[serde(default)]
    pub inputs_container: Option<String>,
    #[serde(default)]
    pub templates_container: Option<String>,
    #[serde(default)]
    pub outputs_container: Option<String>,
    #[serde(default)]
    pub logs_container: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LimsStorageEntry {
    pub account: String,
    #[serde(default)]
    pub key: Option<String>,
    pub staging_container: String,
    pub dropbox_container: String,
    #[serde(default)]
    pub staging_directory: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MetadataEntry {
    pub base_url: String,
    #[serde(default)]
    pub api_version: Option<String>,
    pub lab_group: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub researcher_email: String,
    pub reference_file_id: u64,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub modules: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccount {
    pub account: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct ClusterStorage {
    pub credentials: StorageAccount,
    pub stored_policy: String,
    pub workflows_container: String,
    pub executions_container: String,
    pub inputs_container: String,
    pub templates_container: String,
    pub outputs_container: String,
    pub logs_container: String,
}

#[derive(Debug, Clone)]
pub struct LimsStorage {
    pub credentials: StorageAccount,
    pub staging_container: String,
    pub dropbox_container: String,
    pub staging_directory: String,
}

#[derive(Debug, Clone)]
pub struct MetadataSettings {
    pub base_url: String,
    pub api_version: String,
    pub lab_group: String,
    pub username: String,
    pub password: String,
    pub researcher_email: String,
    pub reference_file_id: u64,
    pub collection: String,
    pub modules: Vec<String>,
}

impl MetadataSettings {
    pub fn api_url(&self) -> String {
        format!(
            "{}/api/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version
        )
    }
}

/// Everything an invocation needs, built once at startup.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub schema_version: u32,
    pub endpoint_suffix: String,
    pub grant_ttl_minutes: i64,
    pub cluster: ClusterStorage,
    pub lims_storage: LimsStorage,
    pub output_storage: StorageAccount,
    pub metadata: MetadataSettings,
}

impl ArchiverConfig {
    pub fn accounts(&self) -> Vec<StorageAccount> {
        vec![
            self.cluster.credentials.clone(),
            self.lims_storage.credentials.clone(),
            self.output_storage.clone(),
        ]
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ArchiverConfig, ArchiverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(ArchiverError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ArchiverError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ArchiverError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        ProjectDirs::from("", "", "pipeline-archiver")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    pub fn resolve_config(config: Config) -> Result<ArchiverConfig, ArchiverError> {
        Self::resolve_config_with(config, |name| std::env::var(name).ok())
    }

    /// Resolves a parsed config; secrets missing from the file are taken
    /// from `lookup` (the process environment in production).
    pub fn resolve_config_with<F>(config: Config, lookup: F) -> Result<ArchiverConfig, ArchiverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cluster = config.cluster;
        let lims = config.lims_storage;
        let metadata = config.metadata;

        let cluster_key = secret(cluster.key, CLUSTER_KEY_VAR, &lookup)?;
        let lims_key = secret(lims.key, LIMS_KEY_VAR, &lookup)?;
        let output_key = secret(config.output_storage.key, OUTPUT_KEY_VAR, &lookup)?;
        let password = secret(metadata.password, LIMS_PASSWORD_VAR, &lookup)?;

        let grant_ttl_minutes = config.grant_ttl_minutes.unwrap_or(60);
        if grant_ttl_minutes <= 0 {
            return Err(ArchiverError::InvalidConfig(
                "grant_ttl_minutes must be positive".to_string(),
            ));
        }

        let staging_directory = lims
            .staging_directory
            .unwrap_or_else(|| "copied-files".to_string())
            .trim_matches('/')
            .to_string();
        if staging_directory.is_empty() {
            return Err(ArchiverError::InvalidConfig(
                "staging_directory must not be empty".to_string(),
            ));
        }

        let collection = metadata
            .collection
            .unwrap_or_else(|| "wholegenomesequencing".to_string());
        let modules = metadata
            .modules
            .filter(|modules| !modules.is_empty())
            .unwrap_or_else(|| vec![collection.clone()]);

        Ok(ArchiverConfig {
            schema_version: config.schema_version.unwrap_or(1),
            endpoint_suffix: config
                .endpoint_suffix
                .unwrap_or_else(|| DEFAULT_ENDPOINT_SUFFIX.to_string()),
            grant_ttl_minutes,
            cluster: ClusterStorage {
                credentials: StorageAccount {
                    account: cluster.account,
                    key: cluster_key,
                },
                stored_policy: cluster.stored_policy,
                workflows_container: cluster
                    .workflows_container
                    .unwrap_or_else(|| "workflows".to_string()),
                executions_container: cluster
                    .executions_container
                    .unwrap_or_else(|| "cromwell-executions".to_string()),
                inputs_container: cluster
                    .inputs_container
                    .unwrap_or_else(|| "inputs".to_string()),
                templates_container: cluster
                    .templates_container
                    .unwrap_or_else(|| "workflow-templates".to_string()),
                outputs_container: cluster
                    .outputs_container
                    .unwrap_or_else(|| "outputs".to_string()),
                logs_container: cluster
                    .logs_container
                    .unwrap_or_else(|| "cromwell-workflow-logs".to_string()),
            },
            lims_storage: LimsStorage {
                credentials: StorageAccount {
                    account: lims.account,
                    key: lims_key,
                },
                staging_container: lims.staging_container,
                dropbox_container: lims.dropbox_container,
                staging_directory,
            },
            output_storage: StorageAccount {
                account: config.output_storage.account,
                key: output_key,
            },
            metadata: MetadataSettings {
                base_url: metadata.base_url,
                api_version: metadata.api_version.unwrap_or_else(|| "v1".to_string()),
                lab_group: metadata.lab_group,
                username: metadata.username,
                password,
                researcher_email: metadata.researcher_email,
                reference_file_id: metadata.reference_file_id,
                collection,
                modules,
            },
        })
    }
}

fn secret<F>(value: Option<String>, var: &str, lookup: &F) -> Result<String, ArchiverError>
where
    F: Fn(&str) -> Option<String>,
{
    value
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup(var).filter(|value| !value.trim().is_empty()))
        .map(|value| value.trim().to_string())
        .ok_or_else(|| ArchiverError::InvalidConfig(format!("missing secret (set {var})")))
}
