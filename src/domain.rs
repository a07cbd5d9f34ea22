use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EclipError;

pub const PEAK_FILE_FORMAT: &str = "bed";
pub const PEAK_FILE_FORMAT_TYPE: &str = "narrowPeak";
pub const UNKNOWN_LABEL: &str = "Unknown";

static ACCESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ENCSR\d{3}[A-Z]{3}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExperimentAccession(String);

impl ExperimentAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentAccession {
    type Err = EclipError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !ACCESSION_RE.is_match(&normalized) {
            return Err(EclipError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileDescriptor {
    #[serde(rename = "@id", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_format: Option<String>,
    #[serde(default)]
    pub file_format_type: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
}

impl FileDescriptor {
    pub fn is_narrow_peak(&self) -> bool {
        self.file_format.as_deref() == Some(PEAK_FILE_FORMAT)
            && self.file_format_type.as_deref() == Some(PEAK_FILE_FORMAT_TYPE)
    }

    pub fn is_optimal(&self) -> bool {
        self.output_type
            .as_deref()
            .map(|value| value.to_lowercase().contains("optimal"))
            .unwrap_or(false)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.href
            .as_deref()
            .and_then(|href| href.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }

    pub fn decompressed_name(&self) -> Option<&str> {
        self.file_name()
            .map(|name| name.strip_suffix(".gz").unwrap_or(name))
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} format={} type={} output={} href={}",
            self.id.as_deref().unwrap_or("-"),
            self.file_format.as_deref().unwrap_or("-"),
            self.file_format_type.as_deref().unwrap_or("-"),
            self.output_type.as_deref().unwrap_or("-"),
            self.href.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Experiment {
    pub accession: ExperimentAccession,
    pub cell_line: String,
    pub protein: String,
    pub files: Vec<FileDescriptor>,
}

/// Picks the peak file to fold for an experiment.
///
/// Only `bed`/`narrowPeak` files qualify. Among those the first one whose
/// output type mentions "optimal" wins, otherwise the first qualifying file
/// in listing order.
pub fn select_best_file(files: &[FileDescriptor]) -> Option<&FileDescriptor> {
    let mut first_peak = None;
    for file in files.iter().filter(|file| file.is_narrow_peak()) {
        if file.is_optimal() {
            return Some(file);
        }
        if first_peak.is_none() {
            first_peak = Some(file);
        }
    }
    first_peak
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn peak(href: &str, output_type: &str) -> FileDescriptor {
        FileDescriptor {
            id: None,
            file_format: Some("bed".to_string()),
            file_format_type: Some("narrowPeak".to_string()),
            output_type: Some(output_type.to_string()),
            href: Some(href.to_string()),
        }
    }

    #[test]
    fn parse_accession_valid() {
        let acc: ExperimentAccession = " encsr123abc ".parse().unwrap();
        assert_eq!(acc.as_str(), "ENCSR123ABC");
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "ENCFF123ABC".parse::<ExperimentAccession>().unwrap_err();
        assert_matches!(err, EclipError::InvalidAccession(_));
    }

    #[test]
    fn optimal_wins_regardless_of_order() {
        let a = peak("/files/A/@@download/A.bed.gz", "optimal peaks");
        let b = peak("/files/B/@@download/B.bed.gz", "peaks");

        let forward = vec![a.clone(), b.clone()];
        let reverse = vec![b, a.clone()];
        assert_eq!(select_best_file(&forward), Some(&a));
        assert_eq!(select_best_file(&reverse), Some(&a));
    }

    #[test]
    fn optimal_match_is_case_insensitive() {
        let files = vec![peak("/a.bed.gz", "peaks"), peak("/b.bed.gz", "Conservative OPTIMAL")];
        assert_eq!(select_best_file(&files), Some(&files[1]));
    }

    #[test]
    fn first_peak_file_when_none_optimal() {
        let files = vec![peak("/first.bed.gz", "peaks"), peak("/second.bed.gz", "peaks")];
        assert_eq!(select_best_file(&files), Some(&files[0]));
    }

    #[test]
    fn non_peak_files_are_ignored() {
        let files = vec![
            FileDescriptor {
                file_format: Some("bam".to_string()),
                output_type: Some("optimal alignments".to_string()),
                ..FileDescriptor::default()
            },
            FileDescriptor {
                file_format: Some("bed".to_string()),
                file_format_type: Some("bed6".to_string()),
                output_type: Some("optimal peaks".to_string()),
                ..FileDescriptor::default()
            },
        ];
        assert_eq!(select_best_file(&files), None);
        assert_eq!(select_best_file(&[]), None);
    }

    #[test]
    fn file_names_from_href() {
        let file = peak("/files/ENCFF1/@@download/ENCFF1.bed.gz", "peaks");
        assert_eq!(file.file_name(), Some("ENCFF1.bed.gz"));
        assert_eq!(file.decompressed_name(), Some("ENCFF1.bed"));

        let plain = peak("/files/ENCFF2/@@download/ENCFF2.bed", "peaks");
        assert_eq!(plain.decompressed_name(), Some("ENCFF2.bed"));

        assert_eq!(FileDescriptor::default().file_name(), None);
    }
}
