use std::fs;

use assert_matches::assert_matches;
use tempfile::TempDir;

use pipeline_archiver::config::ConfigLoader;
use pipeline_archiver::domain::{AnalysisId, Category, PipelineType, Study};
use pipeline_archiver::error::ArchiverError;
use pipeline_archiver::store::{BlobUrl, Layout};

const CONFIG: &str = r#"{
  "schema_version": 1,
  "grant_ttl_minutes": 30,
  "cluster": {
    "account": "cromwell",
    "key": "Y2x1c3Rlcg==",
    "stored_policy": "archiver-read"
  },
  "lims_storage": {
    "account": "lims",
    "key": "bGltcw==",
    "staging_container": "staging",
    "dropbox_container": "dropbox"
  },
  "output_storage": { "account": "results", "key": "cmVzdWx0cw==" },
  "metadata": {
    "base_url": "https://lims.example.org",
    "lab_group": "lab",
    "username": "archiver",
    "password": "secret",
    "researcher_email": "archiver@example.org",
    "reference_file_id": 12
  }
}"#;

#[test]
fn config_file_resolves_into_layout() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pipeline-archiver.json");
    fs::write(&path, CONFIG).unwrap();

    let config = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.grant_ttl_minutes, 30);
    assert_eq!(config.cluster.stored_policy, "archiver-read");

    let layout = Layout::new(&config);
    assert_eq!(
        layout.trigger_url("mutect2", "run-1").to_string(),
        "https://cromwell.blob.core.windows.net/workflows/succeeded/mutect2.run-1.json"
    );
    assert_eq!(
        layout
            .staging_url(AnalysisId::new(7), Category::Results, "a.vcf")
            .to_string(),
        "https://lims.blob.core.windows.net/staging/AX7/results/a.vcf"
    );
    assert_eq!(
        layout.manifest_url(PipelineType::PairedSvCaller, "run-1").path(),
        "copied-files/PairedSVCaller.run-1.txt"
    );
    assert_eq!(
        layout
            .output_storage_url(Study::PdxSamples, "P1", "LIB1", "x.bam")
            .to_string(),
        "https://results.blob.core.windows.net/pdx-samples/P1/LIB1/x.bam"
    );

    let staged: BlobUrl = "https://lims.blob.core.windows.net/staging/AX7/results/a.vcf"
        .parse()
        .unwrap();
    assert!(layout.is_staged(&staged));
    assert_eq!(layout.dropbox_url(&staged).container(), "dropbox");
    assert_eq!(
        layout
            .execution_file("/cromwell-executions/Mutect2/run-1/call-Filter/f.vcf")
            .unwrap()
            .to_string(),
        "https://cromwell.blob.core.windows.net/cromwell-executions/Mutect2/run-1/call-Filter/f.vcf"
    );
}

#[test]
fn unreadable_and_malformed_config_files() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(missing.to_str().unwrap())),
        Err(ArchiverError::ConfigRead(_))
    );

    let broken = temp.path().join("broken.json");
    fs::write(&broken, "{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(Some(broken.to_str().unwrap())),
        Err(ArchiverError::ConfigParse(_))
    );
}
