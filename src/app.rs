use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{Config, FoldingSettings, SlurmSettings};
use crate::domain::{Experiment, ExperimentAccession, FileDescriptor, select_best_file};
use crate::encode::EncodeClient;
use crate::error::EclipError;
use crate::fs_util;
use crate::slurm::{JobSubmitter, render_batch_script};
use crate::store::{DataStore, ExperimentMetadata, JobPaths};

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
    pub no_submit: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchAction {
    Existing,
    Planned,
    Downloaded,
    Submitted,
    SubmissionRejected,
    DetailUnavailable,
    NoPeakFile,
    DownloadFailed,
}

impl FetchAction {
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            FetchAction::DetailUnavailable | FetchAction::NoPeakFile | FetchAction::DownloadFailed
        )
    }
}

impl fmt::Display for FetchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchAction::Existing => "existing",
            FetchAction::Planned => "planned",
            FetchAction::Downloaded => "downloaded",
            FetchAction::Submitted => "submitted",
            FetchAction::SubmissionRejected => "submission rejected",
            FetchAction::DetailUnavailable => "detail unavailable",
            FetchAction::NoPeakFile => "no peak file",
            FetchAction::DownloadFailed => "download failed",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub discovered: usize,
    pub items: Vec<FetchItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchItemResult {
    pub accession: String,
    pub cell_line: String,
    pub protein: String,
    pub action: FetchAction,
    pub file: Option<String>,
    pub artifact: Option<String>,
    pub script: Option<String>,
    pub job_id: Option<String>,
    pub message: Option<String>,
}

impl FetchItemResult {
    fn new(experiment: &Experiment, action: FetchAction) -> Self {
        Self {
            accession: experiment.accession.to_string(),
            cell_line: experiment.cell_line.clone(),
            protein: experiment.protein.clone(),
            action,
            file: None,
            artifact: None,
            script: None,
            job_id: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn report(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

pub struct App<E: EncodeClient, S: JobSubmitter> {
    store: DataStore,
    encode: E,
    submitter: S,
    slurm: SlurmSettings,
    folding: FoldingSettings,
}

impl<E: EncodeClient, S: JobSubmitter> App<E, S> {
    pub fn new(store: DataStore, encode: E, submitter: S, config: &Config) -> Self {
        Self {
            store,
            encode,
            submitter,
            slurm: config.slurm.clone(),
            folding: config.folding.clone(),
        }
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    pub fn fetch(
        &self,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, EclipError> {
        let experiments = self.discover(sink)?;
        let discovered = experiments.len();
        if experiments.is_empty() {
            tracing::warn!("no experiments found");
            return Ok(FetchResult {
                discovered,
                items: Vec::new(),
            });
        }
        report(sink, format!("phase=Resolve; found {discovered} eCLIP experiments"));

        let limit = options.limit.unwrap_or(usize::MAX);
        let mut items = Vec::new();
        for experiment in experiments.into_iter().take(limit) {
            items.push(self.fetch_experiment(experiment, &options, sink)?);
        }
        Ok(FetchResult { discovered, items })
    }

    /// Experiments from the search endpoint. A non-success status yields an
    /// empty list instead of an error.
    pub fn discover(&self, sink: &dyn ProgressSink) -> Result<Vec<Experiment>, EclipError> {
        report(sink, "encode.search".to_string());
        let start = Instant::now();
        let result = match self.encode.search_experiments() {
            Ok(experiments) => experiments,
            Err(EclipError::EncodeStatus { status, .. }) => {
                tracing::error!(status, "failed to fetch ENCODE experiments");
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        sink.event(ProgressEvent {
            message: format!("encode.search experiments={}", result.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(result)
    }

    /// Fetches the experiment detail and picks its peak file. `None` when the
    /// detail endpoint answers with a non-success status or when no
    /// `bed`/`narrowPeak` file is listed.
    pub fn best_file(
        &self,
        accession: &ExperimentAccession,
    ) -> Result<Option<FileDescriptor>, EclipError> {
        Ok(self
            .detail_files(accession)?
            .and_then(|files| select_best_file(&files).cloned()))
    }

    fn detail_files(
        &self,
        accession: &ExperimentAccession,
    ) -> Result<Option<Vec<FileDescriptor>>, EclipError> {
        let detail = match self.encode.fetch_experiment(accession) {
            Ok(detail) => detail,
            Err(EclipError::EncodeStatus { status, .. }) => {
                tracing::error!(%accession, status, "could not fetch experiment");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        for file in &detail.files {
            tracing::debug!(%accession, "{file}");
        }
        Ok(Some(detail.files))
    }

    fn fetch_experiment(
        &self,
        experiment: Experiment,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchItemResult, EclipError> {
        report(
            sink,
            format!(
                "phase=Resolve; {} in {} ({})",
                experiment.protein, experiment.cell_line, experiment.accession
            ),
        );

        let Some(files) = self.detail_files(&experiment.accession)? else {
            return Ok(FetchItemResult::new(&experiment, FetchAction::DetailUnavailable));
        };
        let Some(file) = select_best_file(&files) else {
            tracing::warn!(accession = %experiment.accession, "no BED narrowPeak file found");
            return Ok(FetchItemResult::new(&experiment, FetchAction::NoPeakFile));
        };

        self.retrieve(&experiment, file, options, sink)
    }

    /// Downloads, decompresses and submits one peak file. Returns
    /// immediately, without any network call, when the decompressed artifact
    /// already exists.
    pub fn retrieve(
        &self,
        experiment: &Experiment,
        file: &FileDescriptor,
        options: &FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchItemResult, EclipError> {
        let mut item = FetchItemResult::new(experiment, FetchAction::Planned);
        item.file = file.href.clone();

        let (Some(href), Some(paths)) = (
            file.href.as_deref(),
            self.store
                .job_paths(&experiment.cell_line, &experiment.protein, file, &self.folding),
        ) else {
            tracing::warn!(accession = %experiment.accession, "selected file has no download path");
            item.action = FetchAction::NoPeakFile;
            return Ok(item);
        };
        item.artifact = Some(paths.artifact.to_string());

        if !options.dry_run {
            DataStore::ensure_dir(&paths.dir)?;
        }
        if paths.artifact.as_std_path().exists() {
            report(sink, format!("phase=Store; already present {}", paths.artifact));
            item.action = FetchAction::Existing;
            return Ok(item);
        }
        if options.dry_run {
            item.script = Some(paths.script.to_string());
            return Ok(item);
        }

        report(sink, format!("encode.download {href} -> {}", paths.download));
        let start = Instant::now();
        match self.encode.download_file(href, paths.download.as_std_path()) {
            Ok(bytes) => sink.event(ProgressEvent {
                message: format!("encode.download bytes={bytes}"),
                elapsed: Some(start.elapsed()),
            }),
            Err(EclipError::EncodeStatus { status, message }) => {
                tracing::error!(href, status, "failed to download peak file");
                item.action = FetchAction::DownloadFailed;
                item.message = Some(message);
                return Ok(item);
            }
            Err(err) => return Err(err),
        }

        if paths.is_compressed() {
            fs_util::gunzip_in_place(paths.download.as_std_path())?;
            report(sink, format!("phase=Verify; unzipped {}", paths.artifact));
        }
        item.action = FetchAction::Downloaded;

        self.write_script(&experiment.protein, &paths)?;
        item.script = Some(paths.script.to_string());
        report(sink, format!("phase=Store; wrote {}", paths.script));

        if !options.no_submit {
            let ack = self.submitter.submit(paths.script.as_std_path())?;
            if ack.accepted {
                report(sink, format!("slurm.submit {}", ack.message));
                item.action = FetchAction::Submitted;
                item.job_id = ack.job_id;
            } else {
                tracing::warn!(script = %paths.script, "{}", ack.message);
                item.action = FetchAction::SubmissionRejected;
                item.message = Some(ack.message);
            }
        }

        let metadata = ExperimentMetadata {
            accession: experiment.accession.to_string(),
            cell_line: experiment.cell_line.clone(),
            protein: experiment.protein.clone(),
            href: href.to_string(),
            output_type: file.output_type.clone(),
            artifact: paths.artifact.to_string(),
            downloaded_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("eclip-fold/{}", env!("CARGO_PKG_VERSION")),
            job_id: item.job_id.clone(),
        };
        DataStore::write_metadata(&paths.metadata, &metadata)?;

        Ok(item)
    }

    fn write_script(&self, protein: &str, paths: &JobPaths) -> Result<(), EclipError> {
        let script = render_batch_script(&self.slurm, &self.folding, protein, paths);
        fs_util::write_atomic(paths.script.as_std_path(), script.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::output::JsonOutput;
    use crate::slurm::SubmissionAck;

    struct StatusEncode;

    impl EncodeClient for StatusEncode {
        fn search_experiments(&self) -> Result<Vec<Experiment>, EclipError> {
            Err(EclipError::EncodeStatus {
                status: 503,
                message: "unavailable".to_string(),
            })
        }

        fn fetch_experiment(&self, _accession: &ExperimentAccession) -> Result<Experiment, EclipError> {
            Err(EclipError::EncodeStatus {
                status: 404,
                message: "not found".to_string(),
            })
        }

        fn download_file(&self, _href: &str, _destination: &Path) -> Result<u64, EclipError> {
            Err(EclipError::EncodeHttp("unexpected download".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingSubmitter {
        calls: Mutex<usize>,
    }

    impl JobSubmitter for CountingSubmitter {
        fn submit(&self, _script: &Path) -> Result<SubmissionAck, EclipError> {
            *self.calls.lock().unwrap() += 1;
            Ok(SubmissionAck {
                accepted: true,
                job_id: Some("1".to_string()),
                message: "Submitted batch job 1".to_string(),
            })
        }
    }

    fn app(root: &Path) -> App<StatusEncode, CountingSubmitter> {
        let store = DataStore::new_with_root(Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap());
        App::new(store, StatusEncode, CountingSubmitter::default(), &Config::default())
    }

    #[test]
    fn search_status_failure_yields_no_experiments() {
        let temp = tempfile::tempdir().unwrap();
        let result = app(temp.path()).fetch(FetchOptions::default(), &JsonOutput).unwrap();
        assert_eq!(result.discovered, 0);
        assert!(result.items.is_empty());
    }

    #[test]
    fn detail_status_failure_yields_no_file() {
        let temp = tempfile::tempdir().unwrap();
        let acc: ExperimentAccession = "ENCSR000AAA".parse().unwrap();
        assert_eq!(app(temp.path()).best_file(&acc).unwrap(), None);
    }
}
