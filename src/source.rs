use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarmonizeError;

pub type RawRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilySchema {
    Canonical,
    ClimateMetrics,
    Regionalized,
    /// Primary PM2.5 and precursor factors per population and stack-height archetype.
    Particulates,
    /// Per-watershed water deprivation factors weighted by water use.
    WaterAvailability,
}

/// Renames a source-specific substance label (e.g. "NH3") to its canonical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstanceAlias {
    pub source: String,
    pub name: String,
    #[serde(default)]
    pub cas: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFamily {
    pub name: String,
    pub schema: FamilySchema,
    #[serde(default)]
    pub defaults: RawRow,
    #[serde(default)]
    pub aliases: Vec<SubstanceAlias>,
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoichiometricRatio {
    pub proxy: String,
    pub derived: String,
    #[serde(default)]
    pub cas: Option<String>,
    pub ratio: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSnapshot {
    #[serde(default)]
    pub families: Vec<SourceFamily>,
    #[serde(default)]
    pub stoichiometry: Vec<StoichiometricRatio>,
}

impl SourceSnapshot {
    pub fn row_count(&self) -> usize {
        self.families.iter().map(|family| family.rows.len()).sum()
    }
}

pub trait SourceLoader {
    fn load(&self) -> Result<SourceSnapshot, HarmonizeError>;
}

impl SourceLoader for SourceSnapshot {
    fn load(&self) -> Result<SourceSnapshot, HarmonizeError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone)]
pub struct JsonSnapshotLoader {
    path: Utf8PathBuf,
}

impl JsonSnapshotLoader {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl SourceLoader for JsonSnapshotLoader {
    fn load(&self) -> Result<SourceSnapshot, HarmonizeError> {
        if !self.path.as_std_path().exists() {
            return Err(HarmonizeError::MissingSource(
                self.path.as_std_path().to_path_buf(),
            ));
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| HarmonizeError::SourceRead(err.to_string()))?;
        let snapshot: SourceSnapshot = serde_json::from_str(&content)
            .map_err(|err| HarmonizeError::SourceRead(format!("{}: {err}", self.path)))?;
        tracing::info!(
            path = %self.path,
            families = snapshot.families.len(),
            rows = snapshot.row_count(),
            "loaded source snapshot"
        );
        Ok(snapshot)
    }
}
