use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::domain::{CarbonAccounting, Resolution, Tier};
use crate::error::HarmonizeError;
use crate::linker::LinkedFactor;
use crate::model::{CfTable, CharacterizationFactor};
use crate::pipeline::{ForkOutput, RunResult};

/// Exported row in the canonical column naming, flow name joined with its region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    #[serde(rename = "Impact category")]
    pub impact_category: String,
    #[serde(rename = "CF unit")]
    pub cf_unit: String,
    #[serde(rename = "Compartment")]
    pub compartment: String,
    #[serde(rename = "Sub-compartment")]
    pub sub_compartment: String,
    #[serde(rename = "Elem flow name")]
    pub elem_flow_name: String,
    #[serde(rename = "Elem flow unit")]
    pub elem_flow_unit: String,
    #[serde(rename = "CAS number", default)]
    pub cas_number: Option<String>,
    #[serde(rename = "CF value")]
    pub cf_value: f64,
    #[serde(rename = "MP or Damage")]
    pub tier: Tier,
    #[serde(rename = "Native geographical resolution scale")]
    pub resolution: Resolution,
    #[serde(rename = "Flow id", default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(rename = "Location", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl From<&CharacterizationFactor> for ExportRow {
    fn from(row: &CharacterizationFactor) -> Self {
        Self {
            impact_category: row.impact_category.clone(),
            cf_unit: row.cf_unit.clone(),
            compartment: row.compartment.to_string(),
            sub_compartment: row.sub_compartment.clone(),
            elem_flow_name: row.elem_flow_name(),
            elem_flow_unit: row.elem_flow_unit.clone(),
            cas_number: row.cas_number.clone(),
            cf_value: row.cf_value,
            tier: row.tier,
            resolution: row.resolution,
            external_id: None,
            location: None,
        }
    }
}

impl From<&LinkedFactor> for ExportRow {
    fn from(row: &LinkedFactor) -> Self {
        Self {
            impact_category: row.impact_category.clone(),
            cf_unit: row.cf_unit.clone(),
            compartment: row.compartment.clone(),
            sub_compartment: row.sub_compartment.clone(),
            elem_flow_name: row.flow_name.clone(),
            elem_flow_unit: row.flow_unit.clone(),
            cas_number: row.cas_number.clone(),
            cf_value: row.cf_value,
            tier: row.tier,
            resolution: row.resolution,
            external_id: row.external_id.clone(),
            location: row.location.clone(),
        }
    }
}

/// Directory layout of one run: `<root>/<fork>/{master,footprint,<target>,<target>-footprint}.json`,
/// an optional `<root>/<fork>/exiobase.json`, plus `<root>/summary.json`.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: Utf8PathBuf,
}

impl OutputStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn fork_dir(&self, accounting: CarbonAccounting) -> Utf8PathBuf {
        self.root.join(accounting.slug())
    }

    pub fn master_path(&self, accounting: CarbonAccounting) -> Utf8PathBuf {
        self.fork_dir(accounting).join("master.json")
    }

    pub fn footprint_path(&self, accounting: CarbonAccounting) -> Utf8PathBuf {
        self.fork_dir(accounting).join("footprint.json")
    }

    pub fn target_path(&self, accounting: CarbonAccounting, target: &str) -> Utf8PathBuf {
        self.fork_dir(accounting).join(format!("{}.json", file_stem(target)))
    }

    pub fn target_footprint_path(&self, accounting: CarbonAccounting, target: &str) -> Utf8PathBuf {
        self.fork_dir(accounting)
            .join(format!("{}-footprint.json", file_stem(target)))
    }

    pub fn exiobase_path(&self, accounting: CarbonAccounting) -> Utf8PathBuf {
        self.fork_dir(accounting).join("exiobase.json")
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.root.join("summary.json")
    }

    /// Every file `export` would write for `result`, in write order.
    pub fn planned_files(&self, result: &RunResult) -> Vec<Utf8PathBuf> {
        let mut files = Vec::new();
        for fork in &result.forks {
            files.push(self.master_path(fork.accounting));
            files.push(self.footprint_path(fork.accounting));
            if fork.exiobase.is_some() {
                files.push(self.exiobase_path(fork.accounting));
            }
            for target in &fork.targets {
                files.push(self.target_path(fork.accounting, &target.name));
                files.push(self.target_footprint_path(fork.accounting, &target.name));
            }
        }
        files.push(self.summary_path());
        files
    }

    pub fn export(&self, result: &RunResult) -> Result<Vec<Utf8PathBuf>, HarmonizeError> {
        let mut written = Vec::new();
        for fork in &result.forks {
            written.extend(self.export_fork(fork)?);
        }
        let summary = self.summary_path();
        Self::write_json_atomic(&summary, &result.summary)?;
        written.push(summary);
        tracing::info!(root = %self.root, files = written.len(), "exported run");
        Ok(written)
    }

    fn export_fork(&self, fork: &ForkOutput) -> Result<Vec<Utf8PathBuf>, HarmonizeError> {
        let mut written = Vec::new();

        let master = self.master_path(fork.accounting);
        Self::write_json_atomic(&master, &export_table(&fork.master))?;
        written.push(master);

        let footprint = self.footprint_path(fork.accounting);
        Self::write_json_atomic(&footprint, &export_table(&fork.footprint))?;
        written.push(footprint);

        if let Some((matrix, _)) = &fork.exiobase {
            let path = self.exiobase_path(fork.accounting);
            Self::write_json_atomic(&path, matrix)?;
            written.push(path);
        }

        for target in &fork.targets {
            let path = self.target_path(fork.accounting, &target.name);
            Self::write_json_atomic(&path, &export_linked(&target.rows))?;
            written.push(path);

            let path = self.target_footprint_path(fork.accounting, &target.name);
            Self::write_json_atomic(&path, &export_linked(&target.footprint))?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn write_json_atomic<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), HarmonizeError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| HarmonizeError::Export(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarmonizeError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarmonizeError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarmonizeError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("iwh-export")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HarmonizeError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| HarmonizeError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarmonizeError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_rows(path: &Utf8Path) -> Result<Vec<ExportRow>, HarmonizeError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HarmonizeError::Filesystem(format!("{path}: {err}")))?;
        serde_json::from_str(&content).map_err(|err| HarmonizeError::Export(err.to_string()))
    }
}

pub fn export_table(table: &CfTable) -> Vec<ExportRow> {
    table.iter().map(ExportRow::from).collect()
}

pub fn export_linked(rows: &[LinkedFactor]) -> Vec<ExportRow> {
    rows.iter().map(ExportRow::from).collect()
}

fn file_stem(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
