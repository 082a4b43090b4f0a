use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{AnalysisId, ExperimentId, LineageRef, PipelineType, Reference};
use crate::error::ArchiverError;
use crate::fields::{FieldBuilder, Links};
use crate::metadata::{LineageNode, MetadataService};
use crate::workflow::WorkflowInputs;

const PRE_PROCESSING: &str = "Pre-processing";
const MOUSE_READ_FILTERING: &str = "Mouse Read Filtering";

/// Identifies one logical analysis. Two records with equal keys are the same entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionKey {
    pub related: LineageRef,
    pub analysis_type: String,
    pub subtype: String,
    pub reference: Reference,
}

impl ResolutionKey {
    pub fn matches(&self, node: &LineageNode) -> bool {
        node.analysis_type == self.analysis_type
            && node.subtype == self.subtype
            && node.reference == self.reference.as_str()
    }
}

/// Lineage records an execution's artifacts attach to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLineage {
    /// One record per tumor for ReadCounterIchor; a single record otherwise.
    pub primary: Vec<AnalysisId>,
    /// HaplotypeCaller or cBioPortal record created alongside the primary one.
    pub dependent: Option<AnalysisId>,
}

impl ResolvedLineage {
    fn single(id: AnalysisId) -> Self {
        Self {
            primary: vec![id],
            dependent: None,
        }
    }

    pub fn first(&self) -> Result<AnalysisId, ArchiverError> {
        self.primary
            .first()
            .copied()
            .ok_or_else(|| ArchiverError::NotFound("resolved lineage record".to_string()))
    }

    pub fn all(&self) -> Vec<AnalysisId> {
        self.primary.iter().copied().chain(self.dependent).collect()
    }
}

pub struct Resolver<'a, M: ?Sized, F: ?Sized> {
    metadata: &'a M,
    fields: &'a F,
    researcher: &'a str,
    collection: &'a str,
}

impl<'a, M, F> Resolver<'a, M, F>
where
    M: MetadataService + ?Sized,
    F: FieldBuilder + ?Sized,
{
    pub fn new(metadata: &'a M, fields: &'a F, researcher: &'a str, collection: &'a str) -> Self {
        Self {
            metadata,
            fields,
            researcher,
            collection,
        }
    }

    pub fn key(&self, kind: PipelineType, related: LineageRef, reference: Reference) -> ResolutionKey {
        let descriptor = self.fields.descriptor(kind);
        ResolutionKey {
            related,
            analysis_type: descriptor.analysis_type.to_string(),
            subtype: descriptor.subtype.unwrap_or_default().to_string(),
            reference,
        }
    }

    /// Returns the record matching `key`, creating it only on a true miss.
    /// Two concurrent callers may both miss and both create; there is no lock.
    pub fn resolve(
        &self,
        key: &ResolutionKey,
        kind: PipelineType,
        links: Links,
        date: NaiveDate,
    ) -> Result<AnalysisId, ArchiverError> {
        let related = self.metadata.query_related(key.related)?;
        debug!(
            related = %key.related,
            candidates = related.len(),
            "checking for existing analysis"
        );
        if let Some(existing) = related.iter().find(|node| key.matches(node)) {
            info!(analysis = %existing.id, kind = %kind, "found existing analysis");
            return Ok(existing.id);
        }

        let fields = self
            .fields
            .build(kind, date, self.researcher, links, key.reference);
        let service_id = self.metadata.create(&fields, self.collection)?;
        let created = self.metadata.get_by_id(service_id, self.collection)?;
        info!(analysis = %created.id, kind = %kind, "created analysis");
        Ok(created.id)
    }

    /// Resolves every record a completed execution of `kind` needs.
    pub fn resolve_pipeline(
        &self,
        kind: PipelineType,
        inputs: &WorkflowInputs,
        date: NaiveDate,
    ) -> Result<ResolvedLineage, ArchiverError> {
        let reference = inputs.reference(kind)?;
        match kind {
            PipelineType::CleanPdx | PipelineType::UbamPrePro => {
                let experiment = self.experiment(inputs.sample_id(kind)?)?;
                let key = self.key(kind, LineageRef::Experiment(experiment), reference);
                let id = self.resolve(&key, kind, Links::experiments(&[experiment]), date)?;
                Ok(ResolvedLineage::single(id))
            }
            PipelineType::PreProcessing => {
                let experiment = self.experiment(inputs.sample_id(kind)?)?;
                let filtered = self.upstream(experiment, MOUSE_READ_FILTERING)?;
                let key = self.key(kind, LineageRef::Experiment(experiment), reference);
                let id = self.resolve(&key, kind, Links::analyses(&[filtered]), date)?;
                Ok(ResolvedLineage::single(id))
            }
            PipelineType::UbamGermlinePrePro => {
                let experiment = self.experiment(inputs.sample_id(kind)?)?;
                let key = self.key(kind, LineageRef::Experiment(experiment), reference);
                let pre = self.resolve(&key, kind, Links::experiments(&[experiment]), date)?;
                let htc = self.dependent(PipelineType::Htc, &[pre], reference, date)?;
                Ok(ResolvedLineage {
                    primary: vec![pre],
                    dependent: Some(htc),
                })
            }
            PipelineType::Mutect2 => {
                let (tumor, normal) = inputs.tumor_normal(kind)?;
                let pair = self.paired_upstream(tumor, normal)?;
                let key = self.key(kind, LineageRef::Analysis(pair[0]), reference);
                let mutect = self.resolve(&key, kind, Links::analyses(&pair), date)?;
                let cbio = self.dependent(PipelineType::Cbio, &[mutect], reference, date)?;
                Ok(ResolvedLineage {
                    primary: vec![mutect],
                    dependent: Some(cbio),
                })
            }
            PipelineType::ReadCounterIchor => {
                let normal = self.experiment(inputs.ichor_normal()?)?;
                let normal_pre = self.upstream(normal, PRE_PROCESSING)?;
                let mut primary = Vec::new();
                for tumor in inputs.ichor_tumors()? {
                    let tumor_pre = self.upstream(self.experiment(tumor)?, PRE_PROCESSING)?;
                    let key = self.key(kind, LineageRef::Analysis(tumor_pre), reference);
                    let links = Links::analyses(&[tumor_pre, normal_pre]);
                    primary.push(self.resolve(&key, kind, links, date)?);
                }
                Ok(ResolvedLineage {
                    primary,
                    dependent: None,
                })
            }
            PipelineType::SequenzaWorkflow
            | PipelineType::WaspMapping
            | PipelineType::PairedSvCaller => {
                let (tumor, normal) = inputs.tumor_normal(kind)?;
                let pair = self.paired_upstream(tumor, normal)?;
                let key = self.key(kind, LineageRef::Analysis(pair[0]), reference);
                let id = self.resolve(&key, kind, Links::analyses(&pair), date)?;
                Ok(ResolvedLineage::single(id))
            }
            PipelineType::Htc | PipelineType::Cbio => {
                Err(ArchiverError::UnsupportedPipeline(kind.to_string()))
            }
        }
    }

    fn dependent(
        &self,
        kind: PipelineType,
        parents: &[AnalysisId],
        reference: Reference,
        date: NaiveDate,
    ) -> Result<AnalysisId, ArchiverError> {
        let key = self.key(kind, LineageRef::Analysis(parents[0]), reference);
        self.resolve(&key, kind, Links::analyses(parents), date)
    }

    fn experiment(&self, external_id: &str) -> Result<ExperimentId, ArchiverError> {
        self.metadata
            .find_experiment(external_id, self.collection)?
            .ok_or_else(|| {
                ArchiverError::NotFound(format!("experiment with external id {external_id}"))
            })
    }

    /// Existing analysis of `analysis_type` attached to the experiment.
    fn upstream(
        &self,
        experiment: ExperimentId,
        analysis_type: &str,
    ) -> Result<AnalysisId, ArchiverError> {
        self.metadata
            .query_related(LineageRef::Experiment(experiment))?
            .into_iter()
            .find(|node| node.analysis_type == analysis_type)
            .map(|node| node.id)
            .ok_or_else(|| ArchiverError::NotFound(format!("{analysis_type} analysis of {experiment}")))
    }

    /// Tumor and normal pre-processing analyses, in that order.
    fn paired_upstream(&self, tumor: &str, normal: &str) -> Result<[AnalysisId; 2], ArchiverError> {
        let tumor = self.upstream(self.experiment(tumor)?, PRE_PROCESSING)?;
        let normal = self.upstream(self.experiment(normal)?, PRE_PROCESSING)?;
        Ok([tumor, normal])
    }
}
