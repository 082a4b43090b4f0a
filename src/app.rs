use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::completion::{Completion, complete};
use crate::config::ArchiverConfig;
use crate::domain::{AnalysisId, PipelineType, Study};
use crate::error::ArchiverError;
use crate::fields::FieldBuilder;
use crate::lineage::{find_origin_experiment, patient_id};
use crate::manifest::{Manifest, ManifestName};
use crate::metadata::MetadataService;
use crate::plan::plan_artifacts;
use crate::poller::{CopyPoll, check_status};
use crate::resolver::{ResolvedLineage, Resolver};
use crate::staging::Stager;
use crate::store::{BlobUrl, DeleteOptions, Layout, ObjectStore, dated_folder};
use crate::workflow::{ExecutionMetadata, Trigger, WorkflowInputs, WorkflowOutputs};

/// A workflow engine completion notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub filename: String,
    pub execution_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub pending: usize,
    pub completed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StagedSummary {
    pub pipeline: String,
    pub execution_id: String,
    pub study: Study,
    pub lineage: ResolvedLineage,
    pub manifest: String,
    pub entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OriginResult {
    pub analysis: String,
    pub experiment: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct Archiver<S: ObjectStore, M: MetadataService, F: FieldBuilder> {
    config: ArchiverConfig,
    layout: Layout,
    store: S,
    metadata: M,
    fields: F,
}

impl<S: ObjectStore, M: MetadataService, F: FieldBuilder> Archiver<S, M, F> {
    pub fn new(config: ArchiverConfig, store: S, metadata: M, fields: F) -> Self {
        let layout = Layout::new(&config);
        Self {
            config,
            layout,
            store,
            metadata,
            fields,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    fn stager(&self) -> Stager<'_, S> {
        Stager::new(&self.store, &self.layout, &self.config.cluster.stored_policy)
    }

    /// Advances every staged execution as far as its copies allow.
    pub fn poll(&self, sink: &dyn ProgressSink) -> Result<PollSummary, ArchiverError> {
        let started = Instant::now();
        let prefix = self.layout.manifest_prefix();
        sink.event(ProgressEvent {
            message: format!("phase=Poll; listing {prefix}"),
            elapsed: None,
        });
        let blobs = self.store.list(
            self.layout.lims_account(),
            self.layout.staging_container(),
            &prefix,
        )?;

        let stager = self.stager();
        let mut summary = PollSummary::default();
        for blob in blobs {
            if blob.extension() != Some("txt") {
                continue;
            }
            if let Err(err) = ManifestName::parse(blob.path()) {
                warn!(blob = %blob, error = %err, "skipping manifest");
                continue;
            }
            let manifest = Manifest::read(&self.store, &blob)?;
            let sources = match check_status(&self.store, &self.layout, &manifest)? {
                CopyPoll::Complete(sources) => sources,
                CopyPoll::Pending => {
                    summary.pending += 1;
                    continue;
                }
            };
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Complete; {}.{}",
                    manifest.pipeline, manifest.execution_id
                ),
                elapsed: Some(started.elapsed()),
            });
            match complete(&self.store, &self.layout, &stager, &manifest, &sources)? {
                Completion::Delivered { .. } => summary.completed += 1,
                Completion::Pending => summary.pending += 1,
            }
        }

        info!(
            pending = summary.pending,
            completed = summary.completed,
            "poll finished"
        );
        Ok(summary)
    }

    /// Resolves lineage records for a finished execution and stages its artifacts.
    pub fn handle_completion(
        &self,
        event: &CompletionEvent,
        sink: &dyn ProgressSink,
    ) -> Result<StagedSummary, ArchiverError> {
        let started = Instant::now();
        let layout = &self.layout;
        let trigger_url = layout.trigger_url(&event.filename, &event.execution_id);
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {}", trigger_url.path()),
            elapsed: None,
        });
        let trigger = Trigger::parse(&self.store.read(&trigger_url)?)?;
        let inputs_url: BlobUrl = trigger.inputs_url.parse()?;
        let inputs = WorkflowInputs::parse(&self.store.read(&inputs_url)?)?;

        let kind = inputs.pipeline_type()?;
        if !kind.is_standalone() {
            return Err(ArchiverError::UnsupportedPipeline(kind.to_string()));
        }
        let study = inputs.study(kind)?;
        let uploaded = self.store.properties(&inputs_url)?.last_modified.date_naive();
        info!(pipeline = %kind, execution = %event.execution_id, study = %study, "cleaning up execution");

        let metadata_url = layout.metadata_url(&event.filename, &event.execution_id);
        let outputs_url = layout.outputs_url(&event.filename, &event.execution_id);
        let execution = ExecutionMetadata::parse(&self.store.read(&metadata_url)?)?;
        let outputs = match kind {
            PipelineType::Mutect2
            | PipelineType::SequenzaWorkflow
            | PipelineType::WaspMapping
            | PipelineType::PairedSvCaller => WorkflowOutputs::parse(&self.store.read(&outputs_url)?)?,
            _ => WorkflowOutputs::parse(b"{}")?,
        };

        let resolver = Resolver::new(
            &self.metadata,
            &self.fields,
            &self.config.metadata.researcher_email,
            &self.config.metadata.collection,
        );
        let lineage = resolver.resolve_pipeline(kind, &inputs, uploaded)?;
        let plan = plan_artifacts(kind, &lineage, &inputs, &execution, &outputs)?;

        sink.event(ProgressEvent {
            message: format!("phase=Stage; {} artifacts", plan.artifacts.len()),
            elapsed: Some(started.elapsed()),
        });
        let stager = self.stager();
        let mut manifest = Manifest::new(kind, &event.execution_id);

        for copy in &plan.input_copies {
            let source = layout.execution_file(&copy.path)?;
            manifest.push(stager.copy_to_inputs(&source, &copy.library)?);
        }

        let mut patients: HashMap<AnalysisId, String> = HashMap::new();
        for artifact in &plan.artifacts {
            let source = layout.execution_file(&artifact.path)?;
            if let Some(entry) = stager.stage(&source, artifact.record, "results")? {
                manifest.push(entry);
            }
            if let Some(library) = &artifact.library {
                let patient = match patients.get(&artifact.record) {
                    Some(patient) => patient.clone(),
                    None => {
                        let patient = patient_id(&self.metadata, artifact.record)?;
                        patients.insert(artifact.record, patient.clone());
                        patient
                    }
                };
                manifest.push(stager.deliver_to_outputs(&source, study, &patient, library)?);
            }
        }

        let workflow_url: BlobUrl = trigger.workflow_url.parse()?;
        let log_url = layout.workflow_log_url(&event.execution_id);
        let general = [
            (&inputs_url, "source"),
            (&workflow_url, "source"),
            (&metadata_url, "documentation"),
            (&log_url, "documentation"),
            (&trigger_url, "documentation"),
        ];
        for record in lineage.all() {
            for (source, category) in general {
                if let Some(entry) = stager.stage(source, record, category)? {
                    manifest.push(entry);
                }
            }
        }

        let folder = dated_folder(uploaded);
        manifest.push(stager.archive(&metadata_url, &folder)?);
        manifest.push(stager.archive(&log_url, &folder)?);

        let written = manifest.write(&self.store, layout)?;
        info!(manifest = %written, entries = manifest.len(), "manifest written");

        let mut extras = vec![outputs_url, layout.timing_url(&event.filename, &event.execution_id)];
        if let Some(options) = trigger.options_url.as_deref() {
            extras.push(options.parse()?);
        }
        for extra in &extras {
            if self.store.delete(extra, DeleteOptions::default())? {
                info!(file = %extra, "deleted");
            }
        }

        Ok(StagedSummary {
            pipeline: kind.to_string(),
            execution_id: event.execution_id.clone(),
            study,
            lineage,
            manifest: written.to_string(),
            entries: manifest.len(),
        })
    }

    /// Experiment a lineage record ultimately derives from.
    pub fn origin(&self, analysis: AnalysisId) -> Result<OriginResult, ArchiverError> {
        let experiment = find_origin_experiment(&self.metadata, analysis)?;
        Ok(OriginResult {
            analysis: analysis.to_string(),
            experiment: experiment.to_string(),
        })
    }
}
