use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::{table_footprint, table_with_totals, with_totals};
use crate::biogenic::{ForkReport, fork};
use crate::config::ResolvedConfig;
use crate::domain::CarbonAccounting;
use crate::error::HarmonizeError;
use crate::exiobase::{ExiobaseMatrix, ExiobaseReport, exiobase_matrix};
use crate::harmonize::{HarmonizeReport, harmonize};
use crate::linker::{LinkReport, LinkedFactor, TargetVocabulary, link};
use crate::model::{CfTable, order_canonical};
use crate::normalize::{NormalizeReport, normalize};
use crate::resolver::{ResolveReport, resolve};
use crate::rules::{RuleReport, apply_rules};
use crate::source::SourceLoader;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Per-stage counters of the baseline build.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageDiagnostics {
    pub normalize: NormalizeReport,
    pub resolve: ResolveReport,
    pub rules: RuleReport,
    pub harmonize: HarmonizeReport,
    pub conflicts: usize,
    pub baseline_rows: usize,
}

#[derive(Debug, Clone)]
pub struct TargetOutput {
    pub name: String,
    pub rows: Vec<LinkedFactor>,
    pub footprint: Vec<LinkedFactor>,
    pub report: LinkReport,
    pub footprint_report: LinkReport,
}

#[derive(Debug, Clone)]
pub struct ForkOutput {
    pub accounting: CarbonAccounting,
    pub master: CfTable,
    pub footprint: CfTable,
    pub report: ForkReport,
    pub exiobase: Option<(ExiobaseMatrix, ExiobaseReport)>,
    pub targets: Vec<TargetOutput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub rows: usize,
    pub footprint_rows: usize,
    pub link: LinkReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForkSummary {
    pub accounting: CarbonAccounting,
    pub master_rows: usize,
    pub footprint_rows: usize,
    pub fork: ForkReport,
    pub exiobase: Option<ExiobaseReport>,
    pub targets: Vec<TargetSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub tool: String,
    pub dry_run: bool,
    pub stages: StageDiagnostics,
    pub forks: Vec<ForkSummary>,
}

#[derive(Debug, Clone)]
pub struct RunResult {
    pub forks: Vec<ForkOutput>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckTarget {
    pub name: String,
    pub mappings: usize,
    pub catalog_entries: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub families: usize,
    pub source_rows: usize,
    pub canonical_rows: usize,
    pub regionalized_rows: usize,
    pub stoichiometric: usize,
    pub region_targets: usize,
    pub targets: Vec<CheckTarget>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

pub struct Pipeline<L: SourceLoader> {
    loader: L,
    config: ResolvedConfig,
}

impl<L: SourceLoader> Pipeline<L> {
    pub fn new(loader: L, config: ResolvedConfig) -> Self {
        Self { loader, config }
    }

    /// Loads and normalizes the source without running the later stages.
    pub fn check(&self, sink: &dyn ProgressSink) -> Result<CheckResult, HarmonizeError> {
        sink.event(ProgressEvent {
            message: "phase=Load; reading source snapshot".to_string(),
            elapsed: None,
        });
        let snapshot = self.loader.load()?;
        sink.event(ProgressEvent {
            message: "phase=Normalize; validating families".to_string(),
            elapsed: None,
        });
        let (table, report) = normalize(&snapshot, &self.config.geography, &self.config.climate)?;

        Ok(CheckResult {
            families: snapshot.families.len(),
            source_rows: snapshot.row_count(),
            canonical_rows: table.len(),
            regionalized_rows: table
                .iter()
                .filter(|row| row.resolution.is_regional())
                .count(),
            stoichiometric: report.stoichiometric,
            region_targets: self.config.region_targets.len(),
            targets: self
                .config
                .vocabularies
                .iter()
                .map(|vocabulary| CheckTarget {
                    name: vocabulary.name.clone(),
                    mappings: vocabulary.mapping_count(),
                    catalog_entries: vocabulary.options.catalog.len(),
                })
                .collect(),
        })
    }

    /// Builds the shared baseline: normalize, resolve, rules, harmonize, order.
    pub fn baseline(
        &self,
        sink: &dyn ProgressSink,
    ) -> Result<(CfTable, StageDiagnostics), HarmonizeError> {
        let config = &self.config;
        let mut diagnostics = StageDiagnostics::default();

        let start = Instant::now();
        let snapshot = self.loader.load()?;
        let (table, report) = normalize(&snapshot, &config.geography, &config.climate)?;
        diagnostics.normalize = report;
        stage(sink, "Normalize", table.len(), start);

        let start = Instant::now();
        let (table, report) = resolve(table, &config.geography, &config.region_targets);
        diagnostics.resolve = report;
        stage(sink, "Resolve", table.len(), start);

        let start = Instant::now();
        let (table, report) = apply_rules(table, &config.rules, &config.geography);
        diagnostics.rules = report;
        stage(sink, "Rules", table.len(), start);

        let start = Instant::now();
        let (table, report) = harmonize(table, &config.harmonized_substances, &config.geography);
        diagnostics.harmonize = report;
        stage(sink, "Harmonize", table.len(), start);

        let table = order_canonical(table);
        diagnostics.conflicts = table.conflicts();
        diagnostics.baseline_rows = table.len();
        if diagnostics.conflicts > 0 {
            tracing::warn!(conflicts = diagnostics.conflicts, "duplicate identities resolved by update");
        }
        Ok((table, diagnostics))
    }

    pub fn run(
        &self,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, HarmonizeError> {
        let (baseline, diagnostics) = self.baseline(sink)?;

        let mut forks = Vec::new();
        for accounting in CarbonAccounting::all() {
            forks.push(self.run_fork(&baseline, accounting, sink));
        }

        let summary = RunSummary {
            generated_at: Utc::now(),
            tool: format!("iwh {}", env!("CARGO_PKG_VERSION")),
            dry_run: options.dry_run,
            stages: diagnostics,
            forks: forks.iter().map(ForkOutput::summary).collect(),
        };
        Ok(RunResult { forks, summary })
    }

    fn run_fork(
        &self,
        baseline: &CfTable,
        accounting: CarbonAccounting,
        sink: &dyn ProgressSink,
    ) -> ForkOutput {
        let config = &self.config;
        let start = Instant::now();
        let (table, report) = fork(baseline, accounting, &config.carbon);
        let exiobase = config
            .exiobase
            .as_ref()
            .map(|settings| exiobase_matrix(&table, settings));
        let master = table_with_totals(table, &config.aggregation);
        let footprint = table_footprint(&master, &config.aggregation);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Fork; {} master={} footprint={}",
                accounting.slug(),
                master.len(),
                footprint.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let targets = config
            .vocabularies
            .iter()
            .map(|vocabulary| self.link_target(&master, &footprint, vocabulary, sink))
            .collect();

        ForkOutput {
            accounting,
            master,
            footprint,
            report,
            exiobase,
            targets,
        }
    }

    fn link_target(
        &self,
        master: &CfTable,
        footprint: &CfTable,
        vocabulary: &TargetVocabulary,
        sink: &dyn ProgressSink,
    ) -> TargetOutput {
        let start = Instant::now();
        let (rows, report) = link(master, vocabulary);
        let rows = with_totals(rows, &self.config.aggregation);
        let (footprint, footprint_report) = link(footprint, vocabulary);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Link; {} rows={} unmapped={}",
                vocabulary.name,
                rows.len(),
                report.unmapped
            ),
            elapsed: Some(start.elapsed()),
        });
        TargetOutput {
            name: vocabulary.name.clone(),
            rows,
            footprint,
            report,
            footprint_report,
        }
    }
}

impl ForkOutput {
    fn summary(&self) -> ForkSummary {
        ForkSummary {
            accounting: self.accounting,
            master_rows: self.master.len(),
            footprint_rows: self.footprint.len(),
            fork: self.report,
            exiobase: self.exiobase.as_ref().map(|(_, report)| *report),
            targets: self
                .targets
                .iter()
                .map(|target| TargetSummary {
                    name: target.name.clone(),
                    rows: target.rows.len(),
                    footprint_rows: target.footprint.len(),
                    link: target.report,
                })
                .collect(),
        }
    }
}

fn stage(sink: &dyn ProgressSink, phase: &str, rows: usize, start: Instant) {
    tracing::info!(phase, rows, "stage finished");
    sink.event(ProgressEvent {
        message: format!("phase={phase}; rows={rows}"),
        elapsed: Some(start.elapsed()),
    });
}
