use crate::domain::{AnalysisId, PipelineType};
use crate::error::ArchiverError;
use crate::resolver::ResolvedLineage;
use crate::workflow::{ExecutionMetadata, WorkflowInputs, WorkflowOutputs, combined_id, output_paths};

/// One workflow output to stage as a result of `record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    pub path: String,
    pub record: AnalysisId,
    /// Output-storage library directory when the file is also delivered there.
    pub library: Option<String>,
}

/// A file copied into the cluster's inputs container for reuse by later runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCopy {
    pub path: String,
    pub library: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPlan {
    pub artifacts: Vec<PlannedArtifact>,
    pub input_copies: Vec<InputCopy>,
}

#[derive(Clone, Copy)]
enum Deliver {
    Yes,
    No,
}

struct PlanBuilder<'a> {
    kind: PipelineType,
    metadata: &'a ExecutionMetadata,
    outputs: &'a WorkflowOutputs,
    plan: ArtifactPlan,
}

impl<'a> PlanBuilder<'a> {
    fn add(&mut self, paths: Vec<String>, record: AnalysisId, library: Option<&str>) {
        self.plan.artifacts.extend(paths.into_iter().map(|path| PlannedArtifact {
            path,
            record,
            library: library.map(str::to_string),
        }));
    }

    fn call_paths(&self, call: &str, shard: usize, key: &str) -> Result<Vec<String>, ArchiverError> {
        let paths = self
            .metadata
            .call_output(self.kind, call, shard, key)
            .map(output_paths)
            .unwrap_or_default();
        if paths.is_empty() {
            return Err(ArchiverError::MissingOutput(format!(
                "{}.{call}[{shard}].{key}",
                self.kind
            )));
        }
        Ok(paths)
    }

    fn calls(
        &mut self,
        record: AnalysisId,
        shard: usize,
        library: &str,
        items: &[(&str, &str, Deliver)],
    ) -> Result<(), ArchiverError> {
        for (call, key, deliver) in items {
            let paths = self.call_paths(call, shard, key)?;
            let library = matches!(deliver, Deliver::Yes).then_some(library);
            self.add(paths, record, library);
        }
        Ok(())
    }

    /// CRAM conversion is optional; its outputs are staged only when produced.
    fn cram(&mut self, record: AnalysisId) {
        let produced = self
            .metadata
            .call_output(self.kind, "BamToCram", 0, "output_cram")
            .is_some();
        if !produced {
            return;
        }
        for key in ["output_cram", "output_cram_index", "output_cram_md5"] {
            let paths = self
                .metadata
                .call_output(self.kind, "BamToCram", 0, key)
                .map(output_paths)
                .unwrap_or_default();
            self.add(paths, record, None);
        }
    }

    fn outputs(
        &mut self,
        record: AnalysisId,
        library: &str,
        items: &[(&str, Deliver)],
    ) -> Result<(), ArchiverError> {
        for (key, deliver) in items {
            let paths = self
                .outputs
                .output(self.kind, key)
                .map(output_paths)
                .unwrap_or_default();
            if paths.is_empty() {
                return Err(ArchiverError::MissingOutput(format!("{}.{key}", self.kind)));
            }
            let library = matches!(deliver, Deliver::Yes).then_some(library);
            self.add(paths, record, library);
        }
        Ok(())
    }
}

const ALIGNED_QC: &[(&str, &str, Deliver)] = &[
    ("UnmappedBamToAlignedBam", "quality_yield_metrics", Deliver::No),
    ("UnmappedBamToAlignedBam", "duplicate_metrics", Deliver::No),
    ("UnmappedBamToAlignedBam", "output_bqsr_reports", Deliver::No),
    ("GetBamHeader", "output_file", Deliver::No),
];

const HAPLOTYPE_CALLER: &[(&str, &str, Deliver)] = &[
    ("AggregatedBamQC", "agg_alignment_summary_metrics", Deliver::No),
    ("AggregatedBamQC", "agg_gc_bias_detail_metrics", Deliver::No),
    ("CollectRawWgsMetrics", "metrics", Deliver::No),
    ("AggregatedBamQC", "read_group_alignment_summary_metrics", Deliver::No),
    ("AggregatedBamQC", "read_group_gc_bias_detail_metrics", Deliver::No),
    ("BamToGvcf", "vcf_detail_metrics", Deliver::No),
    ("BamToGvcf", "vcf_summary_metrics", Deliver::No),
    ("BamToGvcf", "output_vcf", Deliver::Yes),
    ("BamToGvcf", "output_vcf_index", Deliver::Yes),
    ("CollectWgsMetrics", "metrics", Deliver::Yes),
];

const ICHOR_SHARD: &[(&str, &str, Deliver)] = &[
    ("ichorCNA", "params", Deliver::Yes),
    ("ichorCNA", "rdata", Deliver::Yes),
    ("tumorRc", "output_wig", Deliver::No),
];

const ICHOR_REPORTS: &[(&str, &str, Deliver)] = &[
    ("ichorCNA", "cna", Deliver::No),
    ("ichorCNA", "seg", Deliver::No),
    ("ichorCNA", "segTxt", Deliver::No),
    ("ichorCNA", "corrected_depth", Deliver::No),
    ("ichorCNA", "correct", Deliver::No),
    ("ichorCNA", "genome_wide", Deliver::No),
    ("ichorCNA", "genome_wide_all_sols", Deliver::No),
    ("ichorCNA", "tpdf", Deliver::No),
    ("ichorCNA", "bias", Deliver::No),
];

const MUTECT2: &[(&str, Deliver)] = &[
    ("filtered_vcf", Deliver::Yes),
    ("filtered_vcf_idx", Deliver::Yes),
    ("maf_funcotated_file_index", Deliver::Yes),
    ("filtering_stats", Deliver::No),
    ("mutect_stats", Deliver::No),
    ("funcotated_file", Deliver::No),
    ("funcotated_file_index", Deliver::No),
    ("maf_funcotated_file", Deliver::No),
];

const SEQUENZA: &[(&str, Deliver)] = &[
    ("SequenzaTask.scnaRes", Deliver::No),
    ("SequenzaTask.binSeqz", Deliver::No),
    ("SequenzaTask.logs", Deliver::No),
];

const WASP: &[(&str, Deliver)] = &[
    ("snp_index", Deliver::Yes),
    ("haplotype", Deliver::Yes),
    ("snp_tab", Deliver::Yes),
    ("sorted_bam", Deliver::Yes),
    ("sorted_bam_index", Deliver::Yes),
];

const PAIRED_SV: &[(&str, Deliver)] = &[
    ("manta_filtered", Deliver::Yes),
    ("manta_unfiltered", Deliver::Yes),
    ("lumpy_filtered", Deliver::Yes),
    ("lumpy_unfiltered", Deliver::Yes),
    ("gridss_filtered", Deliver::Yes),
    ("gridss_unfiltered", Deliver::Yes),
    ("merged1", Deliver::Yes),
    ("merged2", Deliver::Yes),
    ("merged3", Deliver::Yes),
];

/// Result files of one execution and the records they belong to.
pub fn plan_artifacts(
    kind: PipelineType,
    lineage: &ResolvedLineage,
    inputs: &WorkflowInputs,
    metadata: &ExecutionMetadata,
    outputs: &WorkflowOutputs,
) -> Result<ArtifactPlan, ArchiverError> {
    let mut builder = PlanBuilder {
        kind,
        metadata,
        outputs,
        plan: ArtifactPlan::default(),
    };
    let record = lineage.first()?;
    let dependent = || {
        lineage
            .dependent
            .ok_or_else(|| ArchiverError::NotFound(format!("dependent record of {kind}")))
    };

    match kind {
        PipelineType::CleanPdx => {
            let library = inputs.library_id(kind)?;
            for path in builder.call_paths("Reheader", 0, "output_bam")? {
                builder.plan.input_copies.push(InputCopy {
                    path,
                    library: library.to_string(),
                });
            }
            builder.calls(
                record,
                0,
                library,
                &[
                    ("Flagstat", "output_file", Deliver::No),
                    ("GetBamHeader", "output_file", Deliver::No),
                ],
            )?;
        }
        PipelineType::PreProcessing => {
            let library = inputs.library_id(kind)?;
            builder.calls(
                record,
                0,
                library,
                &[
                    ("UnmappedBamToAlignedBam", "output_bam", Deliver::Yes),
                    ("UnmappedBamToAlignedBam", "output_bam_index", Deliver::Yes),
                    ("Flagstat", "output_file", Deliver::Yes),
                    ("CollectWgsMetrics", "metrics", Deliver::Yes),
                ],
            )?;
            builder.cram(record);
            builder.calls(record, 0, library, ALIGNED_QC)?;
        }
        PipelineType::UbamPrePro => {
            let library = inputs.library_id(kind)?;
            builder.calls(
                record,
                0,
                library,
                &[
                    ("Flagstat", "output_file", Deliver::Yes),
                    ("CollectWgsMetrics", "metrics", Deliver::Yes),
                    ("UnmappedBamToAlignedBam", "output_bam_index", Deliver::Yes),
                ],
            )?;
            builder.calls(record, 0, library, ALIGNED_QC)?;
            builder.cram(record);
        }
        PipelineType::UbamGermlinePrePro => {
            let library = inputs.library_id(kind)?;
            builder.calls(
                record,
                0,
                library,
                &[
                    ("UnmappedBamToAlignedBam", "output_bam", Deliver::Yes),
                    ("UnmappedBamToAlignedBam", "output_bam_index", Deliver::Yes),
                    ("Flagstat", "output_file", Deliver::Yes),
                ],
            )?;
            builder.cram(record);
            builder.calls(record, 0, library, ALIGNED_QC)?;
            builder.calls(dependent()?, 0, library, HAPLOTYPE_CALLER)?;
        }
        PipelineType::Mutect2 => {
            let (tumor, normal) = inputs.tumor_normal(kind)?;
            let library = combined_id(kind, tumor, normal);
            builder.outputs(record, &library, MUTECT2)?;
            builder.outputs(dependent()?, &library, &[("cbio_maf", Deliver::Yes)])?;
        }
        PipelineType::ReadCounterIchor => {
            let normal = inputs.ichor_normal()?;
            let tumors = inputs.ichor_tumors()?;
            if tumors.len() != lineage.primary.len() {
                return Err(ArchiverError::MissingOutput(format!(
                    "{kind}: {} tumors but {} records",
                    tumors.len(),
                    lineage.primary.len()
                )));
            }
            for (shard, (tumor, record)) in tumors.iter().zip(&lineage.primary).enumerate() {
                let library = combined_id(kind, tumor, normal);
                builder.calls(*record, shard, &library, ICHOR_SHARD)?;
                if shard == 0 {
                    builder.calls(
                        *record,
                        0,
                        &library,
                        &[("normalRc", "output_wig", Deliver::No)],
                    )?;
                }
                builder.calls(*record, shard, &library, ICHOR_REPORTS)?;
            }
        }
        PipelineType::SequenzaWorkflow => {
            let (tumor, normal) = inputs.tumor_normal(kind)?;
            builder.outputs(record, &combined_id(kind, tumor, normal), SEQUENZA)?;
        }
        PipelineType::WaspMapping => {
            let (tumor, normal) = inputs.tumor_normal(kind)?;
            builder.outputs(record, &combined_id(kind, tumor, normal), WASP)?;
        }
        PipelineType::PairedSvCaller => {
            let (tumor, normal) = inputs.tumor_normal(kind)?;
            builder.outputs(record, &combined_id(kind, tumor, normal), PAIRED_SV)?;
        }
        PipelineType::Htc | PipelineType::Cbio => {
            return Err(ArchiverError::UnsupportedPipeline(kind.to_string()));
        }
    }

    Ok(builder.plan)
}
