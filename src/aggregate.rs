use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EclipError;
use crate::fs_util;

pub const CELL_LINE_COLUMN: &str = "Cell Line";
pub const PROTEIN_TYPE_COLUMN: &str = "Protein Type";
pub const PROTEIN_TYPE_SEPARATOR: &str = ", ";

pub const JOB_COLUMNS: [&str; 10] = [
    "ENST_ID",
    "Chrom",
    "strand",
    "trans_start",
    "trans_end",
    "Sequence",
    "Refolded_Structure",
    "Refolded_MFE",
    "Refolded_z-score",
    "Refolded_ED",
];

const MISSING_TOKENS: [&str; 12] = [
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "<NA>",
];

/// Numeric cell of a job output. The text is written back exactly as read;
/// missing tokens become NaN and are written back empty. Equality and
/// ordering go by value and are total.
#[derive(Debug, Clone)]
pub struct Numeric {
    value: f64,
    text: String,
}

impl Numeric {
    pub fn new(value: f64) -> Self {
        let text = if value.is_nan() {
            String::new()
        } else if value.is_finite() && value.fract() == 0.0 {
            format!("{value:.1}")
        } else {
            value.to_string()
        };
        Self { value, text }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_nan()
    }
}

impl PartialEq for Numeric {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Numeric {}

impl PartialOrd for Numeric {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Numeric {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.total_cmp(&other.value)
    }
}

impl Hash for Numeric {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.to_bits().hash(state);
    }
}

impl FromStr for Numeric {
    type Err = std::num::ParseFloatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim();
        if MISSING_TOKENS.contains(&text) {
            return Ok(Self {
                value: f64::NAN,
                text: String::new(),
            });
        }
        Ok(Self {
            value: text.parse()?,
            text: text.to_string(),
        })
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Numeric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FoldedTranscript {
    #[serde(rename = "ENST_ID")]
    pub enst_id: String,
    #[serde(rename = "Chrom")]
    pub chrom: String,
    pub strand: String,
    pub trans_start: Numeric,
    pub trans_end: Numeric,
    #[serde(rename = "Sequence")]
    pub sequence: String,
    #[serde(rename = "Refolded_Structure")]
    pub structure: String,
    #[serde(rename = "Refolded_MFE")]
    pub mfe: Numeric,
    #[serde(rename = "Refolded_z-score")]
    pub z_score: Numeric,
    #[serde(rename = "Refolded_ED")]
    pub ensemble_diversity: Numeric,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobRecord {
    pub transcript: FoldedTranscript,
    pub cell_line: String,
    pub protein_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRow {
    #[serde(rename = "ENST_ID")]
    pub enst_id: String,
    #[serde(rename = "Chrom")]
    pub chrom: String,
    pub strand: String,
    pub trans_start: Numeric,
    pub trans_end: Numeric,
    #[serde(rename = "Sequence")]
    pub sequence: String,
    #[serde(rename = "Refolded_Structure")]
    pub structure: String,
    #[serde(rename = "Refolded_MFE")]
    pub mfe: Numeric,
    #[serde(rename = "Refolded_z-score")]
    pub z_score: Numeric,
    #[serde(rename = "Refolded_ED")]
    pub ensemble_diversity: Numeric,
    #[serde(rename = "Cell Line")]
    pub cell_line: String,
    #[serde(rename = "Protein Type")]
    pub protein_type: String,
}

impl MergedRow {
    fn new(transcript: FoldedTranscript, cell_line: String, protein_type: String) -> Self {
        Self {
            enst_id: transcript.enst_id,
            chrom: transcript.chrom,
            strand: transcript.strand,
            trans_start: transcript.trans_start,
            trans_end: transcript.trans_end,
            sequence: transcript.sequence,
            structure: transcript.structure,
            mfe: transcript.mfe,
            z_score: transcript.z_score,
            ensemble_diversity: transcript.ensemble_diversity,
            cell_line,
            protein_type,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Collected {
    pub records: Vec<JobRecord>,
    pub files_processed: usize,
    pub failures: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub files_processed: usize,
    pub files_failed: usize,
    pub failures: Vec<FileFailure>,
    pub input_records: usize,
    pub unique_records: usize,
    pub merged_rows: usize,
    pub output: PathBuf,
}

pub fn read_job_file(
    path: &Path,
    cell_line: &str,
    protein_type: &str,
) -> Result<Vec<JobRecord>, EclipError> {
    let failure = |message: String| EclipError::Aggregation {
        path: path.to_path_buf(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .map_err(|err| failure(err.to_string()))?;
    let headers = reader.headers().map_err(|err| failure(err.to_string()))?;
    let missing: Vec<&str> = JOB_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|header| header == *column))
        .collect();
    if !missing.is_empty() {
        return Err(failure(format!("missing columns: {}", missing.join(", "))));
    }

    reader
        .deserialize::<FoldedTranscript>()
        .map(|row| {
            row.map(|transcript| JobRecord {
                transcript,
                cell_line: cell_line.to_string(),
                protein_type: protein_type.to_string(),
            })
            .map_err(|err| failure(err.to_string()))
        })
        .collect()
}

/// Walks `<root>/<cell line>/<protein type>/` and reads every file whose
/// name ends with `suffix`. Files that fail to parse are logged and recorded
/// as failures; they never abort the walk.
pub fn collect_records(root: &Path, suffix: &str) -> Result<Collected, EclipError> {
    let mut collected = Collected::default();
    for cell_line_dir in fs_util::sorted_subdirs(root)? {
        let cell_line = dir_label(&cell_line_dir);
        for protein_dir in fs_util::sorted_subdirs(&cell_line_dir)? {
            let protein_type = dir_label(&protein_dir);
            for path in fs_util::files_with_suffix(&protein_dir, suffix)? {
                match read_job_file(&path, &cell_line, &protein_type) {
                    Ok(records) => {
                        tracing::info!("Processed: {}", path.display());
                        collected.files_processed += 1;
                        collected.records.extend(records);
                    }
                    Err(err) => {
                        tracing::error!("Error processing {}: {err}", path.display());
                        collected.failures.push(FileFailure {
                            path,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
    Ok(collected)
}

/// Drops exact duplicates, then groups by every column except the protein
/// type, collapsing protein types into a sorted, unique, comma-joined list.
/// Rows come out ordered by the group key.
pub fn merge_records(records: Vec<JobRecord>) -> Vec<MergedRow> {
    let unique: BTreeSet<JobRecord> = records.into_iter().collect();

    let mut groups: BTreeMap<(FoldedTranscript, String), BTreeSet<String>> = BTreeMap::new();
    for record in unique {
        groups
            .entry((record.transcript, record.cell_line))
            .or_default()
            .insert(record.protein_type);
    }

    groups
        .into_iter()
        .map(|((transcript, cell_line), proteins)| {
            let protein_type = proteins
                .into_iter()
                .collect::<Vec<_>>()
                .join(PROTEIN_TYPE_SEPARATOR);
            MergedRow::new(transcript, cell_line, protein_type)
        })
        .collect()
}

pub fn write_merged(path: &Path, rows: &[MergedRow]) -> Result<(), EclipError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix("eclip-fold-merged")
        .tempfile_in(parent)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;

    let mut writer = csv::Writer::from_writer(temp.as_file());
    for row in rows {
        writer
            .serialize(row)
            .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    drop(writer);

    temp.persist(path)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn run_merge(root: &Path, suffix: &str, output: &Path) -> Result<MergeReport, EclipError> {
    let collected = collect_records(root, suffix)?;
    if collected.records.is_empty() {
        return Err(EclipError::NothingToMerge(root.to_path_buf()));
    }

    let input_records = collected.records.len();
    let unique_records = collected
        .records
        .iter()
        .collect::<BTreeSet<_>>()
        .len();
    let rows = merge_records(collected.records);
    write_merged(output, &rows)?;
    tracing::info!("Final merged dataset saved: {}", output.display());

    Ok(MergeReport {
        files_processed: collected.files_processed,
        files_failed: collected.failures.len(),
        failures: collected.failures,
        input_records,
        unique_records,
        merged_rows: rows.len(),
        output: output.to_path_buf(),
    })
}

fn dir_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
