use std::collections::HashSet;

use tracing::debug;

use crate::domain::{AnalysisId, ExperimentId, LineageRef};
use crate::error::ArchiverError;
use crate::metadata::{Ancestry, MetadataService};

/// Walks ancestor links from `start` until a node rooted on an experiment
/// is reached. Uses an explicit stack; nodes already seen are skipped.
pub fn find_origin_experiment<M>(metadata: &M, start: AnalysisId) -> Result<ExperimentId, ArchiverError>
where
    M: MetadataService + ?Sized,
{
    let mut stack = vec![start];
    let mut visited = HashSet::new();

    while let Some(current) = stack.pop() {
        if !visited.insert(current) {
            continue;
        }
        let node = metadata
            .query_related(LineageRef::Analysis(current))?
            .into_iter()
            .find(|node| node.id == current)
            .ok_or_else(|| ArchiverError::NotFound(format!("analysis {current}")))?;

        match node.ancestry {
            Ancestry::Experiment(experiment) => {
                debug!(start = %start, experiment = %experiment, "lineage origin found");
                return Ok(experiment);
            }
            Ancestry::Analyses(ancestors) => stack.extend(ancestors),
        }
    }

    Err(ArchiverError::MalformedLineageGraph(format!(
        "no experiment reachable from {start}"
    )))
}

/// Patient directory name: the name of the first sample of the origin experiment.
pub fn patient_id<M>(metadata: &M, analysis: AnalysisId) -> Result<String, ArchiverError>
where
    M: MetadataService + ?Sized,
{
    let experiment = find_origin_experiment(metadata, analysis)?;
    let sample = metadata
        .experiment_sample(experiment)?
        .ok_or_else(|| ArchiverError::NotFound(format!("sample of {experiment}")))?;
    let name = metadata
        .sample_name(&sample)?
        .ok_or_else(|| ArchiverError::NotFound(format!("sample {sample}")))?;
    debug!(analysis = %analysis, patient = %name, "patient resolved");
    Ok(name)
}
