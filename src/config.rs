use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::EclipError;

pub const CONFIG_FILE_NAME: &str = "eclip-fold.json";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: u32,
    pub data_root: PathBuf,
    pub encode: EncodeSettings,
    pub slurm: SlurmSettings,
    pub folding: FoldingSettings,
    pub merge: MergeSettings,
    pub viewer: ViewerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: 1,
            data_root: PathBuf::from("ENCODE_eCLIP_data"),
            encode: EncodeSettings::default(),
            slurm: SlurmSettings::default(),
            folding: FoldingSettings::default(),
            merge: MergeSettings::default(),
            viewer: ViewerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EncodeSettings {
    pub base_url: String,
    pub assay_title: String,
    pub status: String,
    pub internal_tags: String,
    pub timeout_secs: u64,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.encodeproject.org".to_string(),
            assay_title: "eCLIP".to_string(),
            status: "released".to_string(),
            internal_tags: "ENCORE".to_string(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SlurmSettings {
    pub time: String,
    pub cpus_per_task: u32,
    pub nodes: u32,
    pub partition: Option<String>,
    pub memory: String,
    pub job_name_prefix: String,
    pub mail_user: Option<String>,
    pub mail_types: Vec<String>,
    pub hint: Option<String>,
    pub constraint: Option<String>,
    pub setup: Vec<String>,
}

impl Default for SlurmSettings {
    fn default() -> Self {
        Self {
            time: "10-00:00:00".to_string(),
            cpus_per_task: 1,
            nodes: 1,
            partition: Some("nova".to_string()),
            memory: "50G".to_string(),
            job_name_prefix: "AZ-NEW-".to_string(),
            mail_user: Some("user@example.org".to_string()),
            mail_types: vec!["BEGIN".to_string(), "END".to_string(), "FAIL".to_string()],
            hint: Some("nomultithread".to_string()),
            constraint: Some("intel&avx512".to_string()),
            setup: vec![
                "module load micromamba".to_string(),
                "eval \"$(micromamba shell hook --shell=bash)\"".to_string(),
                "micromamba activate ScanFold2".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FoldingSettings {
    pub interpreter: String,
    pub script: PathBuf,
    pub mane_ids: PathBuf,
    pub output_suffix: String,
    pub log_suffix: String,
}

impl Default for FoldingSettings {
    fn default() -> Self {
        Self {
            interpreter: "python".to_string(),
            script: PathBuf::from("eclip_str_extrac4.py"),
            mane_ids: PathBuf::from("MANE_ids.txt"),
            output_suffix: "_out.txt".to_string(),
            log_suffix: "_log.txt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeSettings {
    pub output_name: String,
    pub log_file: PathBuf,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            output_name: "final_merged_data.csv".to_string(),
            log_file: PathBuf::from("processing.log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ViewerSettings {
    pub table: Option<PathBuf>,
    pub bind: String,
    pub max_rows: usize,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            table: None,
            bind: "127.0.0.1:5000".to_string(),
            max_rows: 500,
        }
    }
}

impl Config {
    pub fn merged_table(&self) -> PathBuf {
        self.data_root.join(&self.merge.output_name)
    }

    /// Table served by the viewer; the merge output unless set explicitly.
    pub fn viewer_table(&self) -> PathBuf {
        self.viewer
            .table
            .clone()
            .unwrap_or_else(|| self.merged_table())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the explicit `path` if given, otherwise the first config file
    /// found in the working directory or the user config directory, otherwise
    /// the built-in defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Config, EclipError> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(EclipError::MissingConfig(path.to_path_buf()));
            }
            return Self::load(path);
        }

        match Self::discover() {
            Some(found) => Self::load(&found),
            None => Ok(Config::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Config, EclipError> {
        let content =
            fs::read_to_string(path).map_err(|_| EclipError::ConfigRead(path.to_path_buf()))?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Config, EclipError> {
        serde_json::from_str(content).map_err(|err| EclipError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("eclip-fold").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = ConfigLoader::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.viewer.max_rows, 500);
        assert_eq!(config.folding.output_suffix, "_out.txt");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = ConfigLoader::parse(
            r#"{
                "data_root": "eclips",
                "slurm": { "memory": "64G", "mail_user": "lab@example.org" },
                "viewer": { "max_rows": 50 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("eclips"));
        assert_eq!(config.slurm.memory, "64G");
        assert_eq!(config.slurm.mail_user.as_deref(), Some("lab@example.org"));
        assert_eq!(config.slurm.time, "10-00:00:00");
        assert_eq!(config.viewer.max_rows, 50);
        assert_eq!(config.viewer.bind, "127.0.0.1:5000");
    }
}
