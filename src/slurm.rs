use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::config::{FoldingSettings, SlurmSettings};
use crate::error::EclipError;
use crate::store::JobPaths;

/// Renders the batch script that folds one experiment's peak file.
///
/// The folding tool receives four positional arguments: the decompressed
/// peak file, the tab-separated output file, the log file and the reference
/// transcript ID list.
pub fn render_batch_script(
    slurm: &SlurmSettings,
    folding: &FoldingSettings,
    protein: &str,
    paths: &JobPaths,
) -> String {
    let mut script = String::from("#!/bin/bash\n\n");
    let mut directive = |value: String| {
        let _ = writeln!(script, "#SBATCH {value}");
    };

    directive(format!("--time={}", slurm.time));
    directive(format!("--cpus-per-task={}", slurm.cpus_per_task));
    directive(format!("--nodes={}", slurm.nodes));
    if let Some(partition) = &slurm.partition {
        directive(format!("--partition={partition}"));
    }
    directive(format!("--mem={}", slurm.memory));
    directive(format!("-J \"{}{}\"", slurm.job_name_prefix, protein));
    if let Some(mail_user) = &slurm.mail_user {
        directive(format!("--mail-user={mail_user}"));
        for mail_type in &slurm.mail_types {
            directive(format!("--mail-type={mail_type}"));
        }
    }
    if let Some(hint) = &slurm.hint {
        directive(format!("--hint={hint}"));
    }
    if let Some(constraint) = &slurm.constraint {
        directive(format!("-C \"{constraint}\""));
    }

    script.push('\n');
    for line in &slurm.setup {
        script.push_str(line);
        script.push('\n');
    }
    if !slurm.setup.is_empty() {
        script.push('\n');
    }

    script.push_str(&folding_command(
        folding,
        paths.artifact.as_std_path(),
        paths.output.as_std_path(),
        paths.log.as_std_path(),
    ));
    script.push_str("\n\necho \"Job completed successfully.\"\n");
    script
}

pub fn folding_command(folding: &FoldingSettings, input: &Path, output: &Path, log: &Path) -> String {
    [
        folding.interpreter.clone(),
        shell_quote(&folding.script.to_string_lossy()),
        shell_quote(&input.to_string_lossy()),
        shell_quote(&output.to_string_lossy()),
        shell_quote(&log.to_string_lossy()),
        shell_quote(&folding.mane_ids.to_string_lossy()),
    ]
    .join(" ")
}

fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "_-./:@%+=,".contains(ch));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionAck {
    pub accepted: bool,
    pub job_id: Option<String>,
    pub message: String,
}

pub trait JobSubmitter: Send + Sync {
    fn submit(&self, script: &Path) -> Result<SubmissionAck, EclipError>;
}

#[derive(Debug, Clone)]
pub struct SbatchSubmitter {
    sbatch: Option<PathBuf>,
}

impl SbatchSubmitter {
    pub fn new() -> Self {
        Self {
            sbatch: find_in_path("sbatch"),
        }
    }

    pub fn is_available(&self) -> bool {
        self.sbatch.is_some()
    }
}

impl Default for SbatchSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobSubmitter for SbatchSubmitter {
    fn submit(&self, script: &Path) -> Result<SubmissionAck, EclipError> {
        let sbatch = self
            .sbatch
            .as_ref()
            .ok_or_else(|| EclipError::MissingTool("sbatch".to_string()))?;
        let output = Command::new(sbatch)
            .arg(script)
            .output()
            .map_err(|err| EclipError::Submission(err.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            return Ok(SubmissionAck {
                accepted: true,
                job_id: parse_job_id(&stdout),
                message: stdout,
            });
        }
        let message = if stderr.is_empty() {
            format!("sbatch exited with {}", output.status)
        } else {
            stderr
        };
        Ok(SubmissionAck {
            accepted: false,
            job_id: None,
            message,
        })
    }
}

pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Submitted batch job ")
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
    })
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
