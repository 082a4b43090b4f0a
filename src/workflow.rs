use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{PipelineType, Reference, Study};
use crate::error::ArchiverError;

/// Completion notice written by the workflow engine under `succeeded/`.
#[derive(Debug, Clone, Deserialize)]
pub struct Trigger {
    #[serde(rename = "WorkflowInputsUrl")]
    pub inputs_url: String,
    #[serde(rename = "WorkflowOptionsUrl", default)]
    pub options_url: Option<String>,
    #[serde(rename = "WorkflowUrl")]
    pub workflow_url: String,
}

impl Trigger {
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiverError> {
        serde_json::from_slice(bytes).map_err(|err| ArchiverError::Json {
            name: "trigger".to_string(),
            message: err.to_string(),
        })
    }
}

/// The submitted `inputs.json`; key order is preserved.
#[derive(Debug, Clone)]
pub struct WorkflowInputs {
    values: Map<String, Value>,
}

impl WorkflowInputs {
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiverError> {
        let values: Map<String, Value> =
            serde_json::from_slice(bytes).map_err(|err| ArchiverError::Json {
                name: "inputs.json".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { values })
    }

    /// The workflow name prefixing the first input key.
    pub fn pipeline_type(&self) -> Result<PipelineType, ArchiverError> {
        let first = self
            .values
            .keys()
            .next()
            .ok_or_else(|| ArchiverError::MissingInput("inputs.json is empty".to_string()))?;
        let name = first.split('.').next().unwrap_or(first);
        name.parse()
    }

    pub fn study(&self, kind: PipelineType) -> Result<Study, ArchiverError> {
        match self.values.get(&kind.input_key("study")) {
            Some(Value::String(value)) => value.parse(),
            _ => Err(ArchiverError::UnknownStudy(format!("{} not set", kind.input_key("study")))),
        }
    }

    /// Walks `{kind}.{path[0]}` then the remaining object keys.
    pub fn value(&self, kind: PipelineType, path: &[&str]) -> Result<&Value, ArchiverError> {
        let missing = || ArchiverError::MissingInput(kind.input_key(&path.join(".")));
        let (first, rest) = path.split_first().ok_or_else(missing)?;
        let mut current = self.values.get(&kind.input_key(first)).ok_or_else(missing)?;
        for segment in rest {
            current = current.get(*segment).ok_or_else(missing)?;
        }
        Ok(current)
    }

    pub fn text(&self, kind: PipelineType, path: &[&str]) -> Result<&str, ArchiverError> {
        self.value(kind, path)?
            .as_str()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ArchiverError::MissingInput(kind.input_key(&path.join("."))))
    }

    /// Reference genome the pipeline ran against. CleanPDX uses a fixed chimeric
    /// reference and is always recorded as hg38.
    pub fn reference(&self, kind: PipelineType) -> Result<Reference, ArchiverError> {
        let path: &[&str] = match kind {
            PipelineType::CleanPdx => return Ok(Reference::Hg38),
            PipelineType::PreProcessing
            | PipelineType::UbamPrePro
            | PipelineType::UbamGermlinePrePro => &["references", "reference_fasta", "ref_fasta"],
            PipelineType::Mutect2 => &["ref_fasta"],
            PipelineType::ReadCounterIchor => &["ichor_references", "gc_wig"],
            PipelineType::SequenzaWorkflow => &["ReferenceFastaGz"],
            PipelineType::WaspMapping | PipelineType::PairedSvCaller => &["references", "ref_fasta"],
            PipelineType::Htc | PipelineType::Cbio => {
                return Err(ArchiverError::UnsupportedPipeline(kind.to_string()));
            }
        };
        Reference::from_file(kind, self.text(kind, path)?)
    }

    /// External id of the sequenced library a single-sample pipeline ran on.
    pub fn sample_id(&self, kind: PipelineType) -> Result<&str, ArchiverError> {
        match kind {
            PipelineType::CleanPdx => self.text(kind, &["sample_ID"]),
            PipelineType::PreProcessing => {
                self.text(kind, &["sample_and_unmapped_bams", "base_file_name"])
            }
            PipelineType::UbamPrePro | PipelineType::UbamGermlinePrePro => {
                self.text(kind, &["sample_info", "base_file_name"])
            }
            _ => Err(ArchiverError::UnsupportedPipeline(format!(
                "{kind} is not a single-sample pipeline"
            ))),
        }
    }

    /// Output-storage directory for a single-sample pipeline.
    pub fn library_id(&self, kind: PipelineType) -> Result<&str, ArchiverError> {
        match kind {
            PipelineType::PreProcessing => {
                self.text(kind, &["sample_and_unmapped_bams", "final_gvcf_base_name"])
            }
            _ => self.sample_id(kind),
        }
    }

    /// (tumor, normal) external ids of a paired pipeline.
    pub fn tumor_normal(&self, kind: PipelineType) -> Result<(&str, &str), ArchiverError> {
        let (tumor, normal) = match kind {
            PipelineType::Mutect2 => ("tumor_id", "normal_id"),
            PipelineType::SequenzaWorkflow => ("tumorName", "normalName"),
            PipelineType::WaspMapping | PipelineType::PairedSvCaller => {
                ("sample_name", "normal_name")
            }
            _ => {
                return Err(ArchiverError::UnsupportedPipeline(format!(
                    "{kind} is not a paired pipeline"
                )));
            }
        };
        Ok((self.text(kind, &[tumor])?, self.text(kind, &[normal])?))
    }

    pub fn ichor_normal(&self) -> Result<&str, ArchiverError> {
        self.text(PipelineType::ReadCounterIchor, &["rc_normal_inputs", "normal_id"])
    }

    /// Tumor external ids in shard order.
    pub fn ichor_tumors(&self) -> Result<Vec<&str>, ArchiverError> {
        let kind = PipelineType::ReadCounterIchor;
        let missing = || ArchiverError::MissingInput(kind.input_key("rc_tumor_inputs"));
        let items = self.value(kind, &["rc_tumor_inputs"])?.as_array().ok_or_else(missing)?;
        if items.is_empty() {
            return Err(missing());
        }
        items
            .iter()
            .map(|item| {
                item.get("left")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ArchiverError::MissingInput(kind.input_key("rc_tumor_inputs[].left")))
            })
            .collect()
    }
}

/// Directory name for the paired pipelines' output-storage copies.
pub fn combined_id(kind: PipelineType, tumor: &str, normal: &str) -> String {
    let suffix = match kind {
        PipelineType::Mutect2 | PipelineType::Cbio => "mutect2",
        PipelineType::ReadCounterIchor => "ichor",
        PipelineType::SequenzaWorkflow => "sequenza",
        PipelineType::WaspMapping => "wasp",
        PipelineType::PairedSvCaller => "paired-sv-caller",
        _ => kind.as_str(),
    };
    format!("{tumor}-{normal}-{suffix}")
}

/// Execution `metadata.json`: call outputs per shard.
#[derive(Debug, Clone)]
pub struct ExecutionMetadata {
    document: Value,
}

impl ExecutionMetadata {
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiverError> {
        let document = serde_json::from_slice(bytes).map_err(|err| ArchiverError::Json {
            name: "metadata.json".to_string(),
            message: err.to_string(),
        })?;
        Ok(Self { document })
    }

    fn shards(&self, kind: PipelineType, call: &str) -> Option<&Vec<Value>> {
        self.document
            .get("calls")?
            .get(format!("{kind}.{call}"))?
            .as_array()
    }

    pub fn shard_count(&self, kind: PipelineType, call: &str) -> usize {
        self.shards(kind, call).map(Vec::len).unwrap_or(0)
    }

    pub fn call_output(
        &self,
        kind: PipelineType,
        call: &str,
        shard: usize,
        key: &str,
    ) -> Option<&Value> {
        self.shards(kind, call)?
            .get(shard)?
            .get("outputs")?
            .get(key)
            .filter(|value| !value.is_null())
    }
}

/// Execution `outputs.json`: workflow-level outputs.
#[derive(Debug, Clone)]
pub struct WorkflowOutputs {
    document: Value,
}

impl WorkflowOutputs {
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiverError> {
        let document = serde_json::from_slice(bytes).map_err(|err| ArchiverError::Json {
            name: "outputs.json".to_string(),
            message: err.to_string(),
        })?;
        Ok(Self { document })
    }

    pub fn output(&self, kind: PipelineType, key: &str) -> Option<&Value> {
        self.document
            .get("outputs")?
            .get(format!("{kind}.{key}"))
            .filter(|value| !value.is_null())
    }
}

/// Flattens a string or array-of-strings output into paths.
pub fn output_paths(value: &Value) -> Vec<String> {
    match value {
        Value::String(path) if !path.is_empty() => vec![path.clone()],
        Value::Array(items) => items.iter().flat_map(output_paths).collect(),
        _ => Vec::new(),
    }
}
