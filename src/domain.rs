use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArchiverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentId(u64);

impl ExperimentId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "XP{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_prefixed(value, "XP").map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnalysisId(u64);

impl AnalysisId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AX{}", self.0)
    }
}

impl FromStr for AnalysisId {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_prefixed(value, "AX").map(Self)
    }
}

fn parse_prefixed(value: &str, prefix: &str) -> Result<u64, ArchiverError> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix(prefix)
        .or_else(|| trimmed.strip_prefix(&prefix.to_lowercase()))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ArchiverError::InvalidId(value.to_string()));
    }
    digits
        .parse()
        .map_err(|_| ArchiverError::InvalidId(value.to_string()))
}

/// Either end of a lineage edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineageRef {
    Experiment(ExperimentId),
    Analysis(AnalysisId),
}

impl fmt::Display for LineageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineageRef::Experiment(id) => id.fmt(f),
            LineageRef::Analysis(id) => id.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PipelineType {
    CleanPdx,
    PreProcessing,
    UbamPrePro,
    UbamGermlinePrePro,
    Htc,
    Mutect2,
    Cbio,
    ReadCounterIchor,
    SequenzaWorkflow,
    WaspMapping,
    PairedSvCaller,
}

impl PipelineType {
    pub const ALL: [PipelineType; 11] = [
        PipelineType::CleanPdx,
        PipelineType::PreProcessing,
        PipelineType::UbamPrePro,
        PipelineType::UbamGermlinePrePro,
        PipelineType::Htc,
        PipelineType::Mutect2,
        PipelineType::Cbio,
        PipelineType::ReadCounterIchor,
        PipelineType::SequenzaWorkflow,
        PipelineType::WaspMapping,
        PipelineType::PairedSvCaller,
    ];

    /// Workflow name as it prefixes the keys of `inputs.json`.
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineType::CleanPdx => "CleanPDX",
            PipelineType::PreProcessing => "PreProcessing",
            PipelineType::UbamPrePro => "UbamPrePro",
            PipelineType::UbamGermlinePrePro => "UbamGermlinePrePro",
            PipelineType::Htc => "Htc",
            PipelineType::Mutect2 => "Mutect2",
            PipelineType::Cbio => "Cbio",
            PipelineType::ReadCounterIchor => "ReadCounterIchor",
            PipelineType::SequenzaWorkflow => "SequenzaWorkflow",
            PipelineType::WaspMapping => "WaspMapping",
            PipelineType::PairedSvCaller => "PairedSVCaller",
        }
    }

    /// Htc and Cbio run as sub-workflows; their records are only created
    /// by the parent pipeline.
    pub fn is_standalone(self) -> bool {
        !matches!(self, PipelineType::Htc | PipelineType::Cbio)
    }

    /// Input key holding `name` for this workflow, e.g. `Mutect2.tumor_id`.
    pub fn input_key(self, name: &str) -> String {
        format!("{}.{name}", self.as_str())
    }
}

impl fmt::Display for PipelineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineType {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PipelineType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ArchiverError::UnsupportedPipeline(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Study {
    PdxSamples,
    NonCascadia,
    Cascadia,
}

impl Study {
    /// Output-storage container name for the study.
    pub fn as_str(self) -> &'static str {
        match self {
            Study::PdxSamples => "pdx-samples",
            Study::NonCascadia => "non-cascadia",
            Study::Cascadia => "cascadia",
        }
    }
}

impl fmt::Display for Study {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Study {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pdx-samples" => Ok(Study::PdxSamples),
            "non-cascadia" => Ok(Study::NonCascadia),
            "cascadia" => Ok(Study::Cascadia),
            other => Err(ArchiverError::UnknownStudy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    Hg38,
}

impl Reference {
    /// Maps the reference file a pipeline ran with to its genome build. Each
    /// pipeline takes its reference in one form only.
    pub fn from_file(kind: PipelineType, path: &str) -> Result<Self, ArchiverError> {
        let name = path.rsplit('/').next().unwrap_or(path);
        let expected = match kind {
            PipelineType::ReadCounterIchor => "gc_hg38_1000kb.wig",
            PipelineType::SequenzaWorkflow => "Homo_sapiens_assembly38.fasta.gz",
            _ => "Homo_sapiens_assembly38.fasta",
        };
        if name == expected {
            Ok(Reference::Hg38)
        } else {
            Err(ArchiverError::UnknownReference(name.to_string()))
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Reference::Hg38 => "hg38",
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staging sub-directory of a lineage record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Source,
    Documentation,
    Results,
}

impl Category {
    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "source" => Some(Category::Source),
            "documentation" => Some(Category::Documentation),
            "results" => Some(Category::Results),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Source => "source",
            Category::Documentation => "documentation",
            Category::Results => "results",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStatus {
    Pending,
    Success,
    Failed,
    Aborted,
}

impl CopyStatus {
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(CopyStatus::Pending),
            "success" => Some(CopyStatus::Success),
            "failed" => Some(CopyStatus::Failed),
            "aborted" => Some(CopyStatus::Aborted),
            _ => None,
        }
    }

    /// Whether a freshly started copy may be recorded in a manifest.
    pub fn is_accepted(self) -> bool {
        matches!(self, CopyStatus::Pending | CopyStatus::Success)
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CopyStatus::Pending => "pending",
            CopyStatus::Success => "success",
            CopyStatus::Failed => "failed",
            CopyStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
