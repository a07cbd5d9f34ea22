use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::FoldingSettings;
use crate::domain::{FileDescriptor, UNKNOWN_LABEL};
use crate::error::EclipError;
use crate::fs_util;

#[derive(Debug, Clone)]
pub struct DataStore {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub dir: Utf8PathBuf,
    pub download: Utf8PathBuf,
    pub artifact: Utf8PathBuf,
    pub script: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub log: Utf8PathBuf,
    pub metadata: Utf8PathBuf,
}

impl JobPaths {
    pub fn is_compressed(&self) -> bool {
        self.download != self.artifact
    }
}

impl DataStore {
    pub fn new(root: &Path) -> Result<Self, EclipError> {
        let root = Utf8PathBuf::from_path_buf(root.to_path_buf())
            .map_err(|_| EclipError::Filesystem("invalid data root path".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn experiment_dir(&self, cell_line: &str, protein: &str) -> Utf8PathBuf {
        self.root.join(path_label(cell_line)).join(path_label(protein))
    }

    pub fn job_paths(
        &self,
        cell_line: &str,
        protein: &str,
        file: &FileDescriptor,
        folding: &FoldingSettings,
    ) -> Option<JobPaths> {
        let download_name = file.file_name()?;
        let artifact_name = file.decompressed_name()?;
        let dir = self.experiment_dir(cell_line, protein);
        let label = path_label(protein);

        Some(JobPaths {
            download: dir.join(download_name),
            artifact: dir.join(artifact_name),
            script: dir.join(format!("run_{label}.slurm")),
            output: dir.join(format!("{label}{}", folding.output_suffix)),
            log: dir.join(format!("{label}{}", folding.log_suffix)),
            metadata: dir.join("metadata.json"),
            dir,
        })
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), EclipError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| EclipError::Filesystem(err.to_string()))
    }

    pub fn write_metadata(path: &Utf8Path, metadata: &ExperimentMetadata) -> Result<(), EclipError> {
        let content = serde_json::to_vec_pretty(metadata)
            .map_err(|err| EclipError::Filesystem(err.to_string()))?;
        fs_util::write_atomic(path.as_std_path(), &content)
    }

    pub fn read_metadata(path: &Utf8Path) -> Result<ExperimentMetadata, EclipError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| EclipError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| EclipError::Filesystem(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMetadata {
    pub accession: String,
    pub cell_line: String,
    pub protein: String,
    pub href: String,
    pub output_type: Option<String>,
    pub artifact: String,
    pub downloaded_at: String,
    pub tool: String,
    pub job_id: Option<String>,
}

/// Directory-safe form of an ENCODE label: one normal path component.
pub fn path_label(label: &str) -> String {
    let label = label.replace(['/', '\\'], "_");
    match label.as_str() {
        "" => UNKNOWN_LABEL.to_string(),
        "." | ".." => label.replace('.', "_"),
        _ => label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak_file(href: &str) -> FileDescriptor {
        FileDescriptor {
            href: Some(href.to_string()),
            ..FileDescriptor::default()
        }
    }

    #[test]
    fn layout_paths() {
        let store = DataStore::new_with_root(Utf8PathBuf::from("data"));
        let paths = store
            .job_paths(
                "K562",
                "PUM1",
                &peak_file("/files/ENCFF1/@@download/ENCFF1.bed.gz"),
                &FoldingSettings::default(),
            )
            .unwrap();

        assert_eq!(paths.dir, Utf8PathBuf::from("data/K562/PUM1"));
        assert_eq!(paths.download, Utf8PathBuf::from("data/K562/PUM1/ENCFF1.bed.gz"));
        assert_eq!(paths.artifact, Utf8PathBuf::from("data/K562/PUM1/ENCFF1.bed"));
        assert_eq!(paths.script, Utf8PathBuf::from("data/K562/PUM1/run_PUM1.slurm"));
        assert_eq!(paths.output, Utf8PathBuf::from("data/K562/PUM1/PUM1_out.txt"));
        assert_eq!(paths.log, Utf8PathBuf::from("data/K562/PUM1/PUM1_log.txt"));
        assert!(paths.is_compressed());
    }

    #[test]
    fn labels_cannot_escape_the_root() {
        let store = DataStore::new_with_root(Utf8PathBuf::from("data"));
        assert_eq!(
            store.experiment_dir("HepG2/x", "a\\b"),
            Utf8PathBuf::from("data/HepG2_x/a_b")
        );
        assert_eq!(store.experiment_dir("..", "."), Utf8PathBuf::from("data/__/_"));
        assert_eq!(store.experiment_dir("", "PUM1"), Utf8PathBuf::from("data/Unknown/PUM1"));
        assert_eq!(store.experiment_dir("../..", "x"), Utf8PathBuf::from("data/.._../x"));
    }

    #[test]
    fn missing_href_has_no_paths() {
        let store = DataStore::new_with_root(Utf8PathBuf::from("data"));
        assert!(
            store
                .job_paths("K562", "PUM1", &FileDescriptor::default(), &FoldingSettings::default())
                .is_none()
        );
    }

    #[test]
    fn metadata_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("K562/PUM1/metadata.json")).unwrap();
        let metadata = ExperimentMetadata {
            accession: "ENCSR111AAA".to_string(),
            cell_line: "K562".to_string(),
            protein: "PUM1".to_string(),
            href: "/files/ENCFF1/@@download/ENCFF1.bed.gz".to_string(),
            output_type: Some("peaks".to_string()),
            artifact: "ENCFF1.bed".to_string(),
            downloaded_at: "2024-01-01T00:00:00+00:00".to_string(),
            tool: "eclip-fold/0.1.0".to_string(),
            job_id: Some("42".to_string()),
        };

        DataStore::write_metadata(&path, &metadata).unwrap();
        assert_eq!(DataStore::read_metadata(&path).unwrap(), metadata);
    }
}
