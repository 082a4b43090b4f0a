use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{AnalysisId, ExperimentId, PipelineType, Reference};

const HG38_GENOME: &str = "Reference hg38 Genome: /inputs/pre-pro-refs/Homo_sapiens_assembly38.fasta";

/// Type, subtype and free-text requirements of the record a pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisDescriptor {
    pub analysis_type: &'static str,
    pub subtype: Option<&'static str>,
    pub requirements: &'static str,
}

/// Upstream records a new analysis points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Links {
    #[serde(rename = "fk_experiments")]
    Experiments(Vec<u64>),
    #[serde(rename = "fk_analyses")]
    Analyses(Vec<u64>),
}

impl Links {
    pub fn experiments(ids: &[ExperimentId]) -> Self {
        Links::Experiments(ids.iter().map(|id| id.value()).collect())
    }

    pub fn analyses(ids: &[AnalysisId]) -> Self {
        Links::Analyses(ids.iter().map(|id| id.value()).collect())
    }
}

/// Creation payload, serialized with the LIMS field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisFields {
    #[serde(rename = "d_submission_date")]
    pub submission_date: String,
    #[serde(rename = "s_analysis_type")]
    pub analysis_type: String,
    #[serde(rename = "s_analysis_subtype", skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(rename = "s_researcher")]
    pub researcher: String,
    #[serde(rename = "i_reference_file")]
    pub reference_file_id: u64,
    #[serde(rename = "s_reference_file")]
    pub reference: String,
    #[serde(rename = "s_additional_requirements")]
    pub additional_requirements: String,
    #[serde(flatten)]
    pub links: Links,
}

pub trait FieldBuilder: Send + Sync {
    fn descriptor(&self, kind: PipelineType) -> AnalysisDescriptor;

    fn build(
        &self,
        kind: PipelineType,
        date: NaiveDate,
        researcher: &str,
        links: Links,
        reference: Reference,
    ) -> AnalysisFields;
}

#[derive(Debug, Clone, Copy)]
pub struct StandardFields {
    pub reference_file_id: u64,
}

impl StandardFields {
    pub fn new(reference_file_id: u64) -> Self {
        Self { reference_file_id }
    }
}

impl FieldBuilder for StandardFields {
    fn descriptor(&self, kind: PipelineType) -> AnalysisDescriptor {
        match kind {
            PipelineType::CleanPdx => AnalysisDescriptor {
                analysis_type: "Mouse Read Filtering",
                subtype: None,
                requirements: "No results files kept, since the outputs of CleanPDX are only used as inputs to the pre-processing workflow.\nReference chimeric mm10/hg38 genome: workflow-templates/clean-pdx/refs/mouse_human_genome.fa",
            },
            PipelineType::PreProcessing
            | PipelineType::UbamPrePro
            | PipelineType::UbamGermlinePrePro => AnalysisDescriptor {
                analysis_type: "Pre-processing",
                subtype: Some("GATK Pre-processing Pipeline"),
                requirements: HG38_GENOME,
            },
            PipelineType::Htc => AnalysisDescriptor {
                analysis_type: "Germline Short Variant Calling",
                subtype: Some("GATK HaplotypeCaller"),
                requirements: HG38_GENOME,
            },
            PipelineType::Mutect2 => AnalysisDescriptor {
                analysis_type: "Somatic Short Variant Calling",
                subtype: Some("GATK Mutect2 Tumour-Normal Paired"),
                requirements: "Funcotator References: funcotator_dataSources.20230215s.tar.gz",
            },
            PipelineType::Cbio => AnalysisDescriptor {
                analysis_type: "MAF Annotation for cBioPortal",
                subtype: None,
                requirements: "MafFormatter run as a sub-workflow in Mutect2.",
            },
            PipelineType::ReadCounterIchor => AnalysisDescriptor {
                analysis_type: "Copy Number Analysis",
                subtype: Some("ichorCNA"),
                requirements: "ichorCNA v0.2.0, https://github.com/broadinstitute/ichorCNA",
            },
            PipelineType::SequenzaWorkflow => AnalysisDescriptor {
                analysis_type: "Copy Number Analysis",
                subtype: Some("Sequenza"),
                requirements: "Sequenza v3.0.0, https://sequenzatools.bitbucket.io/#/home \nReference hg38 Genome: /inputs/sequenza-refs/Homo_sapiens_assembly38.fasta.gz",
            },
            PipelineType::WaspMapping => AnalysisDescriptor {
                analysis_type: "Copy Number Analysis",
                subtype: Some("WASP"),
                requirements: "Wasp Mapping, https://github.com/bmvdgeijn/WASP \nReference hg38 Genome: /inputs/pre-pro-refs/Homo_sapiens_assembly38.fasta",
            },
            PipelineType::PairedSvCaller => AnalysisDescriptor {
                analysis_type: "Long Variant Calling",
                subtype: Some("SURVIVOR"),
                requirements: "PairedSVCaller.wdl (sv-caller) \nReference hg38 Genome: /inputs/pre-pro-refs/Homo_sapiens_assembly38.fasta",
            },
        }
    }

    fn build(
        &self,
        kind: PipelineType,
        date: NaiveDate,
        researcher: &str,
        links: Links,
        reference: Reference,
    ) -> AnalysisFields {
        let descriptor = self.descriptor(kind);
        AnalysisFields {
            submission_date: date.format("%Y-%m-%d").to_string(),
            analysis_type: descriptor.analysis_type.to_string(),
            subtype: descriptor.subtype.map(str::to_string),
            researcher: researcher.to_string(),
            reference_file_id: self.reference_file_id,
            reference: reference.as_str().to_string(),
            additional_requirements: descriptor.requirements.to_string(),
            links,
        }
    }
}
