use serde::Serialize;

use crate::domain::{CopyStatus, PipelineType};
use crate::error::ArchiverError;
use crate::store::{BlobUrl, DeleteOptions, Layout, ObjectStore};

/// A copy that was accepted by the store and must be verified later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub destination: BlobUrl,
    pub initial_status: CopyStatus,
}

/// `{pipelineType}.{executionId}` parsed from a manifest blob name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestName {
    pub pipeline: PipelineType,
    pub execution_id: String,
}

impl ManifestName {
    pub fn parse(path: &str) -> Result<Self, ArchiverError> {
        let invalid = || ArchiverError::InvalidManifestName(path.to_string());
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let stem = file_name.strip_suffix(".txt").ok_or_else(invalid)?;
        let (pipeline, execution_id) = stem.split_once('.').ok_or_else(invalid)?;
        if execution_id.is_empty() || execution_id.contains('.') {
            return Err(invalid());
        }
        let pipeline = pipeline.parse().map_err(|_| invalid())?;
        Ok(Self {
            pipeline,
            execution_id: execution_id.to_string(),
        })
    }
}

/// Duplicate-free list of staged destinations for one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    #[serde(serialize_with = "serialize_pipeline")]
    pub pipeline: PipelineType,
    pub execution_id: String,
    #[serde(serialize_with = "serialize_urls")]
    entries: Vec<BlobUrl>,
}

impl Manifest {
    pub fn new(pipeline: PipelineType, execution_id: &str) -> Self {
        Self {
            pipeline,
            execution_id: execution_id.to_string(),
            entries: Vec::new(),
        }
    }

    /// Appends the entry unless its destination is already recorded.
    pub fn push(&mut self, entry: ManifestEntry) -> bool {
        self.push_url(entry.destination)
    }

    fn push_url(&mut self, url: BlobUrl) -> bool {
        if self.entries.contains(&url) {
            return false;
        }
        self.entries.push(url);
        true
    }

    pub fn entries(&self) -> &[BlobUrl] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn to_text(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn from_text(name: ManifestName, text: &str) -> Result<Self, ArchiverError> {
        let mut manifest = Self::new(name.pipeline, &name.execution_id);
        for segment in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            manifest.push_url(segment.parse()?);
        }
        Ok(manifest)
    }

    pub fn url(&self, layout: &Layout) -> BlobUrl {
        layout.manifest_url(self.pipeline, &self.execution_id)
    }

    pub fn write<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        layout: &Layout,
    ) -> Result<BlobUrl, ArchiverError> {
        let url = self.url(layout);
        store.write(&url, self.to_text().as_bytes())?;
        Ok(url)
    }

    pub fn read<S: ObjectStore + ?Sized>(store: &S, url: &BlobUrl) -> Result<Self, ArchiverError> {
        let name = ManifestName::parse(url.path())?;
        let bytes = store.read(url)?;
        let text = String::from_utf8_lossy(&bytes);
        Self::from_text(name, &text)
    }

    pub fn delete<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        layout: &Layout,
    ) -> Result<bool, ArchiverError> {
        store.delete(&self.url(layout), DeleteOptions::default())
    }
}

fn serialize_pipeline<S: serde::Serializer>(
    value: &PipelineType,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_str())
}

fn serialize_urls<S: serde::Serializer>(value: &[BlobUrl], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(value.iter().map(ToString::to_string))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn url(path: &str) -> BlobUrl {
        BlobUrl::new("lims", "blob.core.windows.net", "staging", path)
    }

    #[test]
    fn manifest_name_parses_type_and_id() {
        let name = ManifestName::parse("copied-files/Mutect2.6f1c-22ab.txt").unwrap();
        assert_eq!(name.pipeline, PipelineType::Mutect2);
        assert_eq!(name.execution_id, "6f1c-22ab");
        assert_matches!(
            ManifestName::parse("copied-files/notes.txt"),
            Err(ArchiverError::InvalidManifestName(_))
        );
        assert_matches!(
            ManifestName::parse("copied-files/Bwa.1234.txt"),
            Err(ArchiverError::InvalidManifestName(_))
        );
        assert_matches!(
            ManifestName::parse("copied-files/Mutect2.1234.json"),
            Err(ArchiverError::InvalidManifestName(_))
        );
    }

    #[test]
    fn text_form_ignores_empty_segments_and_duplicates() {
        let a = url("AX7/results/a.vcf");
        let b = url("AX7/results/b.vcf");
        let text = format!("{a},{b},,{a},");
        let name = ManifestName::parse("Mutect2.abc.txt").unwrap();
        let manifest = Manifest::from_text(name, &text).unwrap();
        assert_eq!(manifest.entries(), &[a.clone(), b.clone()]);
        assert_eq!(manifest.to_text(), format!("{a},{b}"));
    }

    #[test]
    fn text_form_keeps_names_with_separators() {
        let odd = url("AX7/results/tumor,normal#2.vcf");
        let plain = url("AX7/results/b.vcf");
        let mut manifest = Manifest::new(PipelineType::Mutect2, "abc");
        manifest.push_url(odd.clone());
        manifest.push_url(plain.clone());

        let name = ManifestName::parse("Mutect2.abc.txt").unwrap();
        let read = Manifest::from_text(name, &manifest.to_text()).unwrap();
        assert_eq!(read.entries(), &[odd, plain]);
    }

    #[test]
    fn push_is_duplicate_free() {
        let mut manifest = Manifest::new(PipelineType::CleanPdx, "x");
        let entry = ManifestEntry {
            destination: url("AX1/source/inputs.json"),
            initial_status: CopyStatus::Pending,
        };
        assert!(manifest.push(entry.clone()));
        assert!(!manifest.push(entry));
        assert_eq!(manifest.len(), 1);
    }
}
