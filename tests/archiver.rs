mod support;

use assert_matches::assert_matches;

use pipeline_archiver::app::{Archiver, CompletionEvent, PollSummary};
use pipeline_archiver::domain::{AnalysisId, ExperimentId, Study};
use pipeline_archiver::error::ArchiverError;
use pipeline_archiver::fields::StandardFields;
use pipeline_archiver::metadata::Ancestry;
use pipeline_archiver::output::JsonOutput;
use pipeline_archiver::store::{BlobUrl, DeleteOptions, ObjectStore};

use support::{MemoryMetadata, MemoryStore, blob, test_config};

const MUTECT_OUTPUTS: &[(&str, &str)] = &[
    ("filtered_vcf", "call-Filter/filtered.vcf"),
    ("filtered_vcf_idx", "call-Filter/filtered.vcf.idx"),
    ("maf_funcotated_file_index", "call-Funcotate/annotated.maf.idx"),
    ("filtering_stats", "call-Filter/filtering.stats"),
    ("mutect_stats", "call-Merge/merged.stats"),
    ("funcotated_file", "call-Funcotate/annotated.vcf"),
    ("funcotated_file_index", "call-Funcotate/annotated.vcf.idx"),
    ("maf_funcotated_file", "call-Funcotate/annotated.maf"),
    ("cbio_maf", "call-MafFormatter/cbio.maf"),
];

fn metadata_service() -> MemoryMetadata {
    let metadata = MemoryMetadata::default();
    metadata.add_experiment(1, "LIB-T", "PATIENT-1");
    metadata.add_experiment(2, "LIB-N", "PATIENT-1");
    metadata.add_analysis(10, "Pre-processing", Ancestry::Experiment(ExperimentId::new(1)));
    metadata.add_analysis(20, "Pre-processing", Ancestry::Experiment(ExperimentId::new(2)));
    metadata
}

fn inputs_url() -> BlobUrl {
    blob("cromwell", "inputs", "LIB-T/mutect2.inputs.json")
}

fn template_url() -> BlobUrl {
    blob("cromwell", "workflow-templates", "mutect2/Mutect2.wdl")
}

fn execution_file(path: &str) -> BlobUrl {
    blob("cromwell", "cromwell-executions", &format!("Mutect2/run-1/{path}"))
}

/// Everything the workflow engine leaves behind after a Mutect2 run.
fn seed_mutect_run(store: &MemoryStore, inputs: &str) {
    store.put(
        &blob("cromwell", "workflows", "succeeded/mutect2.run-1.json"),
        &format!(
            r#"{{"WorkflowInputsUrl": "{}", "WorkflowOptionsUrl": "{}", "WorkflowUrl": "{}"}}"#,
            inputs_url(),
            blob("cromwell", "inputs", "LIB-T/options.json"),
            template_url()
        ),
    );
    store.put(&inputs_url(), inputs);
    store.put(&blob("cromwell", "inputs", "LIB-T/options.json"), "{}");
    store.put(&template_url(), "workflow Mutect2 {}");
    store.put(&blob("cromwell", "outputs", "mutect2.run-1.metadata.json"), "{}");
    store.put(&blob("cromwell", "outputs", "mutect2.run-1.timing.html"), "<html/>");
    store.put(&blob("cromwell", "workflow-logs", "workflow.run-1.log"), "log");

    let outputs: Vec<String> = MUTECT_OUTPUTS
        .iter()
        .map(|(key, path)| {
            store.put(&execution_file(path), key);
            format!(r#""Mutect2.{key}": "/cromwell-executions/Mutect2/run-1/{path}""#)
        })
        .collect();
    store.put(
        &blob("cromwell", "outputs", "mutect2.run-1.outputs.json"),
        &format!(r#"{{"outputs": {{{}}}}}"#, outputs.join(",")),
    );
}

const MUTECT_INPUTS: &str = r#"{
    "Mutect2.tumor_id": "LIB-T",
    "Mutect2.normal_id": "LIB-N",
    "Mutect2.ref_fasta": "/inputs/refs/Homo_sapiens_assembly38.fasta",
    "Mutect2.study": "cascadia"
}"#;

fn event() -> CompletionEvent {
    CompletionEvent {
        filename: "mutect2".to_string(),
        execution_id: "run-1".to_string(),
    }
}

#[test]
fn completion_event_stages_and_poll_finishes() {
    let store = MemoryStore::default();
    seed_mutect_run(&store, MUTECT_INPUTS);
    store.put(&blob("lims", "staging", "copied-files/README.md"), "");
    store.put(&blob("lims", "staging", "copied-files/notes.txt"), "");
    let archiver = Archiver::new(test_config(), store, metadata_service(), StandardFields::new(12));
    let sink = JsonOutput;

    let staged = archiver.handle_completion(&event(), &sink).unwrap();
    assert_eq!(staged.pipeline, "Mutect2");
    assert_eq!(staged.study, Study::Cascadia);
    assert_eq!(staged.lineage.all().len(), 2);
    // 9 results, 4 output-storage copies, 5 general files per record, 2 dated copies
    assert_eq!(staged.entries, 25);

    let store = archiver_store(&archiver);
    let mutect = staged.lineage.primary[0];
    assert!(store.exists(&blob(
        "lims",
        "staging",
        &format!("{mutect}/results/filtered.vcf")
    )));
    assert!(store.exists(&blob(
        "results",
        "cascadia",
        "PATIENT-1/LIB-T-LIB-N-mutect2/cbio.maf"
    )));
    assert!(store.exists(&blob(
        "cromwell",
        "outputs",
        "oct_11-oct_17_26/mutect2.run-1.metadata.json"
    )));
    assert!(!store.exists(&blob("cromwell", "outputs", "mutect2.run-1.outputs.json")));
    assert!(!store.exists(&blob("cromwell", "outputs", "mutect2.run-1.timing.html")));
    assert!(!store.exists(&blob("cromwell", "inputs", "LIB-T/options.json")));
    assert!(store.exists(&blob("lims", "staging", "copied-files/Mutect2.run-1.txt")));

    let summary = archiver.poll(&sink).unwrap();
    assert_eq!(summary, PollSummary { pending: 1, completed: 0 });
    assert_eq!(store.deleted().len(), 3);

    store.finish_copies();
    let summary = archiver.poll(&sink).unwrap();
    assert_eq!(summary, PollSummary { pending: 1, completed: 0 });
    assert!(store.exists(&inputs_url()));

    store.finish_copies();
    let summary = archiver.poll(&sink).unwrap();
    assert_eq!(summary, PollSummary { pending: 0, completed: 1 });

    assert!(!store.exists(&inputs_url()));
    assert!(store.exists(&template_url()));
    assert!(!store.exists(&blob("cromwell", "workflows", "succeeded/mutect2.run-1.json")));
    assert!(!store.exists(&blob("cromwell", "workflow-logs", "workflow.run-1.log")));
    assert!(!store.exists(&execution_file("call-Filter/filtered.vcf")));
    assert!(!store.exists(&blob("lims", "staging", "copied-files/Mutect2.run-1.txt")));
    assert!(store.exists(&blob(
        "lims",
        "dropbox",
        &format!("{mutect}/results/filtered.vcf")
    )));
    assert!(store.exists(&blob(
        "cromwell",
        "workflow-logs",
        "oct_11-oct_17_26/workflow.run-1.log"
    )));

    let summary = archiver.poll(&sink).unwrap();
    assert_eq!(summary, PollSummary::default());
}

#[test]
fn poll_finishes_after_pass_stopped_before_manifest_delete() {
    let store = MemoryStore::default();
    seed_mutect_run(&store, MUTECT_INPUTS);
    let archiver = Archiver::new(test_config(), store, metadata_service(), StandardFields::new(12));
    let sink = JsonOutput;
    archiver.handle_completion(&event(), &sink).unwrap();
    let store = archiver_store(&archiver);

    assert_eq!(archiver.poll(&sink).unwrap(), PollSummary { pending: 1, completed: 0 });
    store.finish_copies();
    assert_eq!(archiver.poll(&sink).unwrap(), PollSummary { pending: 1, completed: 0 });
    store.finish_copies();

    let staged: Vec<BlobUrl> = store
        .urls()
        .into_iter()
        .filter(|url| url.account() == "lims" && url.container() == "staging")
        .filter(|url| !url.path().starts_with("copied-files/"))
        .collect();
    assert!(!staged.is_empty());
    for url in &staged {
        store.delete(url, DeleteOptions::default()).unwrap();
    }
    let manifest = blob("lims", "staging", "copied-files/Mutect2.run-1.txt");
    assert!(store.exists(&manifest));

    assert_eq!(archiver.poll(&sink).unwrap(), PollSummary { pending: 0, completed: 1 });
    assert!(!store.exists(&manifest));
    assert_eq!(archiver.poll(&sink).unwrap(), PollSummary::default());
}

#[test]
fn second_event_reuses_lineage_records() {
    let store = MemoryStore::default();
    seed_mutect_run(&store, MUTECT_INPUTS);
    let archiver = Archiver::new(test_config(), store, metadata_service(), StandardFields::new(12));

    let first = archiver.handle_completion(&event(), &JsonOutput).unwrap();
    let metadata = archiver_metadata(&archiver);
    assert_eq!(metadata.create_count(), 2);

    seed_mutect_run(archiver_store(&archiver), MUTECT_INPUTS);
    let second = archiver.handle_completion(&event(), &JsonOutput).unwrap();
    assert_eq!(first.lineage, second.lineage);
    assert_eq!(metadata.create_count(), 2);
}

#[test]
fn sub_workflow_trigger_is_rejected() {
    let store = MemoryStore::default();
    seed_mutect_run(&store, r#"{"Htc.input_bam": "/x/a.bam", "Htc.study": "cascadia"}"#);
    let archiver = Archiver::new(test_config(), store, metadata_service(), StandardFields::new(12));

    let result = archiver.handle_completion(&event(), &JsonOutput);
    assert_matches!(result, Err(ArchiverError::UnsupportedPipeline(_)));
    assert_eq!(archiver_metadata(&archiver).create_count(), 0);
}

#[test]
fn unknown_study_is_rejected_before_any_copy() {
    let store = MemoryStore::default();
    seed_mutect_run(
        &store,
        r#"{"Mutect2.tumor_id": "LIB-T", "Mutect2.normal_id": "LIB-N", "Mutect2.study": "elsewhere"}"#,
    );
    let archiver = Archiver::new(test_config(), store, metadata_service(), StandardFields::new(12));

    let result = archiver.handle_completion(&event(), &JsonOutput);
    assert_matches!(result, Err(ArchiverError::UnknownStudy(_)));
    assert!(archiver_store(&archiver).copies().is_empty());
}

#[test]
fn origin_walks_to_experiment() {
    let metadata = metadata_service();
    metadata.add_analysis(
        30,
        "Somatic Short Variant Calling",
        Ancestry::Analyses(vec![
            AnalysisId::new(10),
            AnalysisId::new(20),
        ]),
    );
    let archiver = Archiver::new(
        test_config(),
        MemoryStore::default(),
        metadata,
        StandardFields::new(12),
    );
    let origin = archiver.origin("AX30".parse().unwrap()).unwrap();
    assert_eq!(origin.analysis, "AX30");
    assert!(origin.experiment == "XP1" || origin.experiment == "XP2");
}

fn archiver_store(
    archiver: &Archiver<MemoryStore, MemoryMetadata, StandardFields>,
) -> &MemoryStore {
    archiver.store()
}

fn archiver_metadata(
    archiver: &Archiver<MemoryStore, MemoryMetadata, StandardFields>,
) -> &MemoryMetadata {
    archiver.metadata()
}
