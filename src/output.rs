use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::pipeline::{CheckResult, ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport<'a> {
    pub summary: &'a RunSummary,
    pub files: Vec<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(summary: &RunSummary, files: &[Utf8PathBuf]) -> io::Result<()> {
        let files = files.iter().map(|path| path.to_string()).collect();
        Self::print_json(&RunReport { summary, files })
    }

    pub fn print_check(result: &CheckResult) -> io::Result<()> {
        Self::print_json(result)
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

/// Progress lines on stderr for interactive runs.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => eprintln!("{}", event.message),
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

pub fn print_run_summary(summary: &RunSummary, files: &[Utf8PathBuf]) {
    let stages = &summary.stages;
    println!(
        "{CYAN}iwh run {}{}{RESET}",
        summary.generated_at.to_rfc3339(),
        if summary.dry_run { " (dry run)" } else { "" }
    );
    println!(
        "{GREEN}baseline rows: {} (normalized {}, resolved +{}, rules +{}, harmonized +{}){RESET}",
        stages.baseline_rows,
        stages.normalize.rows,
        stages.resolve.synthesized + stages.resolve.unregionalized,
        stages.rules.cloned + stages.rules.derived,
        stages.harmonize.synthesized
    );
    let gaps = stages.resolve.gaps + stages.harmonize.gaps;
    if gaps > 0 || stages.conflicts > 0 {
        println!(
            "{YELLOW}resolution gaps: {gaps}, identity conflicts: {}{RESET}",
            stages.conflicts
        );
    }
    for fork in &summary.forks {
        println!(
            "{CYAN}{}: master {} rows, footprint {} rows{RESET}",
            fork.accounting, fork.master_rows, fork.footprint_rows
        );
        if let Some(exiobase) = &fork.exiobase {
            let color = if exiobase.unmatched > 0 || exiobase.missing_ores > 0 {
                YELLOW
            } else {
                GREEN
            };
            println!(
                "{color}  exiobase: {} stressors, {} linked, {} ores, {} unmatched{RESET}",
                exiobase.stressors,
                exiobase.linked,
                exiobase.ores,
                exiobase.unmatched + exiobase.missing_ores
            );
        }
        for target in &fork.targets {
            let color = if target.link.unmapped > 0 || target.link.catalog_miss > 0 {
                YELLOW
            } else {
                GREEN
            };
            println!(
                "{color}  {}: {} rows, {} unmapped, {} not in catalog{RESET}",
                target.name, target.rows, target.link.unmapped, target.link.catalog_miss
            );
        }
    }
    for file in files {
        println!("  {file}");
    }
}

pub fn print_check_summary(result: &CheckResult) {
    println!(
        "{GREEN}source: {} families, {} rows, {} canonical rows ({} regionalized){RESET}",
        result.families, result.source_rows, result.canonical_rows, result.regionalized_rows
    );
    println!("{CYAN}region targets: {}{RESET}", result.region_targets);
    for target in &result.targets {
        println!(
            "{CYAN}  {}: {} mappings, {} catalog entries{RESET}",
            target.name, target.mappings, target.catalog_entries
        );
    }
}
