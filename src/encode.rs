use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::EncodeSettings;
use crate::domain::{Experiment, ExperimentAccession, FileDescriptor, UNKNOWN_LABEL};
use crate::error::EclipError;

pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;

pub trait EncodeClient: Send + Sync {
    fn search_experiments(&self) -> Result<Vec<Experiment>, EclipError>;
    fn fetch_experiment(&self, accession: &ExperimentAccession) -> Result<Experiment, EclipError>;
    fn download_file(&self, href: &str, destination: &Path) -> Result<u64, EclipError>;
}

#[derive(Clone)]
pub struct EncodeHttpClient {
    client: Client,
    settings: EncodeSettings,
}

impl EncodeHttpClient {
    pub fn new(settings: EncodeSettings) -> Result<Self, EclipError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eclip-fold/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EclipError::EncodeHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn search_url(settings: &EncodeSettings) -> String {
        format!(
            "{}/search/?type=Experiment&assay_title={}&status={}&internal_tags={}&format=json&limit=all",
            settings.base_url.trim_end_matches('/'),
            settings.assay_title,
            settings.status,
            settings.internal_tags,
        )
    }

    pub fn experiment_url(settings: &EncodeSettings, accession: &ExperimentAccession) -> String {
        format!(
            "{}/experiments/{}/?format=json",
            settings.base_url.trim_end_matches('/'),
            accession.as_str()
        )
    }

    pub fn file_url(settings: &EncodeSettings, href: &str) -> String {
        format!("{}{}", settings.base_url.trim_end_matches('/'), href)
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, EclipError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "ENCODE request failed".to_string());
        Err(EclipError::EncodeStatus { status, message })
    }

    fn get_text(&self, url: &str) -> Result<String, EclipError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| EclipError::EncodeHttp(err.to_string()))
    }
}

impl EncodeClient for EncodeHttpClient {
    fn search_experiments(&self) -> Result<Vec<Experiment>, EclipError> {
        let body = self.get_text(&Self::search_url(&self.settings))?;
        experiments_from_search(&body)
    }

    fn fetch_experiment(&self, accession: &ExperimentAccession) -> Result<Experiment, EclipError> {
        let body = self.get_text(&Self::experiment_url(&self.settings, accession))?;
        experiment_from_detail(&body, accession)
    }

    fn download_file(&self, href: &str, destination: &Path) -> Result<u64, EclipError> {
        let url = Self::file_url(&self.settings, href);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
        let mut response = Self::handle_status(response)?;

        let parent = destination
            .parent()
            .ok_or_else(|| EclipError::Filesystem("invalid download destination".to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("eclip-fold-download")
            .tempfile_in(parent)
            .map_err(|err| EclipError::Filesystem(err.to_string()))?;

        let mut buffer = [0u8; DOWNLOAD_CHUNK_SIZE];
        let mut written = 0u64;
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
            if read == 0 {
                break;
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| EclipError::Filesystem(err.to_string()))?;
            written += read as u64;
        }

        if destination.exists() {
            fs::remove_file(destination).map_err(|err| EclipError::Filesystem(err.to_string()))?;
        }
        temp.persist(destination)
            .map_err(|err| EclipError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

/// Parses a search response. Entries without a well-formed accession are
/// dropped with a warning.
pub fn experiments_from_search(body: &str) -> Result<Vec<Experiment>, EclipError> {
    let raw: Value =
        serde_json::from_str(body).map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
    let graph = raw
        .get("@graph")
        .and_then(|value| value.as_array())
        .cloned()
        .unwrap_or_default();

    let mut experiments = Vec::with_capacity(graph.len());
    for entry in &graph {
        let Some(accession) = entry.get("accession").and_then(|value| value.as_str()) else {
            tracing::warn!("search result without accession skipped");
            continue;
        };
        match accession.parse::<ExperimentAccession>() {
            Ok(accession) => experiments.push(experiment_from_value(entry, accession)),
            Err(err) => tracing::warn!("{err}; skipped"),
        }
    }
    Ok(experiments)
}

pub fn experiment_from_detail(
    body: &str,
    accession: &ExperimentAccession,
) -> Result<Experiment, EclipError> {
    let raw: Value =
        serde_json::from_str(body).map_err(|err| EclipError::EncodeHttp(err.to_string()))?;
    Ok(experiment_from_value(&raw, accession.clone()))
}

fn experiment_from_value(raw: &Value, accession: ExperimentAccession) -> Experiment {
    let cell_line = raw
        .get("biosample_ontology")
        .and_then(|value| value.get("term_name"))
        .and_then(|value| value.as_str())
        .unwrap_or(UNKNOWN_LABEL)
        .to_string();
    let protein = raw
        .get("target")
        .and_then(|value| value.get("label"))
        .and_then(|value| value.as_str())
        .unwrap_or(UNKNOWN_LABEL)
        .to_string();
    // Search results list files as bare @id strings; only embedded objects
    // carry the fields needed for selection.
    let files = raw
        .get("files")
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .filter_map(|item| serde_json::from_value::<FileDescriptor>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    Experiment {
        accession,
        cell_line,
        protein,
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_carries_fixed_filters() {
        let url = EncodeHttpClient::search_url(&EncodeSettings::default());
        assert_eq!(
            url,
            "https://www.encodeproject.org/search/?type=Experiment&assay_title=eCLIP&status=released&internal_tags=ENCORE&format=json&limit=all"
        );
    }

    #[test]
    fn detail_and_file_urls() {
        let settings = EncodeSettings {
            base_url: "http://localhost:8080/".to_string(),
            ..EncodeSettings::default()
        };
        let acc: ExperimentAccession = "ENCSR000AAA".parse().unwrap();
        assert_eq!(
            EncodeHttpClient::experiment_url(&settings, &acc),
            "http://localhost:8080/experiments/ENCSR000AAA/?format=json"
        );
        assert_eq!(
            EncodeHttpClient::file_url(&settings, "/files/X/@@download/X.bed.gz"),
            "http://localhost:8080/files/X/@@download/X.bed.gz"
        );
    }

    #[test]
    fn search_defaults_missing_labels() {
        let body = r#"{"@graph": [
            {"accession": "ENCSR111AAA", "biosample_ontology": {"term_name": "K562"}, "target": {"label": "PUM1"}},
            {"accession": "ENCSR222BBB"},
            {"accession": "not-an-accession"},
            {"target": {"label": "orphan"}}
        ]}"#;
        let experiments = experiments_from_search(body).unwrap();

        assert_eq!(experiments.len(), 2);
        assert_eq!(experiments[0].cell_line, "K562");
        assert_eq!(experiments[0].protein, "PUM1");
        assert_eq!(experiments[1].cell_line, "Unknown");
        assert_eq!(experiments[1].protein, "Unknown");
    }

    #[test]
    fn search_without_graph_is_empty() {
        assert!(experiments_from_search("{}").unwrap().is_empty());
    }

    #[test]
    fn detail_keeps_only_embedded_files() {
        let acc: ExperimentAccession = "ENCSR111AAA".parse().unwrap();
        let body = r#"{
            "accession": "ENCSR111AAA",
            "files": [
                "/files/ENCFF000AAA/",
                {"@id": "/files/ENCFF001AAA/", "file_format": "bed", "file_format_type": "narrowPeak",
                 "output_type": "peaks", "href": "/files/ENCFF001AAA/@@download/ENCFF001AAA.bed.gz"}
            ]
        }"#;
        let experiment = experiment_from_detail(body, &acc).unwrap();
        assert_eq!(experiment.files.len(), 1);
        assert!(experiment.files[0].is_narrow_peak());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let acc: ExperimentAccession = "ENCSR111AAA".parse().unwrap();
        assert!(experiment_from_detail("<html>", &acc).is_err());
    }
}
