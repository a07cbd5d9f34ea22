use std::io::{self, Write};

use serde::Serialize;

use crate::aggregate::MergeReport;
use crate::app::{FetchResult, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch(result: &FetchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_merge(report: &MergeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct ConsoleOutput;

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

impl ConsoleOutput {
    pub fn print_fetch_summary(result: &FetchResult) {
        let skipped = result.items.iter().filter(|item| item.action.is_skip()).count();
        println!("{CYAN}eclip-fold fetch summary{RESET}");
        println!("{GREEN}experiments discovered: {}{RESET}", result.discovered);
        println!("{GREEN}experiments processed: {}{RESET}", result.items.len());
        println!("{YELLOW}skipped: {skipped}{RESET}");

        for item in &result.items {
            let color = if item.action.is_skip() {
                RED
            } else if item.job_id.is_some() {
                GREEN
            } else {
                CYAN
            };
            println!(
                "{color}- {} {} / {} ({}){RESET}",
                item.accession, item.cell_line, item.protein, item.action
            );
            if let Some(artifact) = &item.artifact {
                println!("{color}    artifact: {artifact}{RESET}");
            }
            if let Some(job_id) = &item.job_id {
                println!("{color}    job: {job_id}{RESET}");
            }
            if let Some(message) = &item.message {
                println!("{color}    {message}{RESET}");
            }
        }
    }

    pub fn print_merge_summary(report: &MergeReport) {
        println!("{CYAN}eclip-fold merge summary{RESET}");
        println!("{GREEN}files processed: {}{RESET}", report.files_processed);
        if report.files_failed > 0 {
            println!("{RED}files failed: {}{RESET}", report.files_failed);
        }
        println!("{GREEN}input records: {}{RESET}", report.input_records);
        println!("{GREEN}merged rows: {}{RESET}", report.merged_rows);
        println!("{GREEN}output: {}{RESET}", report.output.display());
    }
}

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => println!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => println!("{}", event.message),
        }
    }
}
