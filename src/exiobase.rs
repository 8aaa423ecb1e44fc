use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, UNSPECIFIED};
use crate::model::{CfTable, CharacterizationFactor};

pub const MINERAL_CATEGORY: &str = "Mineral resources use";
const IN_GROUND: &str = "in ground";
const LAND: &str = "land";
const OCCUPATION: &str = "Occupation";
/// Stressor ores are reported in kt, factors are per kg.
const ORE_SCALE: f64 = 1e6;
/// Metal contents above this share of the ore are not plausible.
const MAX_METAL_CONTENT: f64 = 0.5;

/// Links the characterization table to EXIOBASE environmental stressors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExiobaseSettings {
    pub concordance: Vec<StressorEntry>,
    pub scaling: Vec<UnitScaling>,
    pub zeroed: Vec<ZeroedCells>,
    pub ores: Vec<OreEntry>,
    pub mixed_ores: Vec<MixedOre>,
    pub default_metal_content: f64,
}

/// One stressor and the canonical flow it stands for. Stressors without a flow stay at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressorEntry {
    pub stressor: String,
    #[serde(default)]
    pub flow: Option<String>,
}

/// Multiplies every indicator whose category contains `category` by `factor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitScaling {
    pub category: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroedCells {
    pub indicator: String,
    pub stressors: Vec<String>,
}

/// Ore stressors characterized through the metal they contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OreEntry {
    pub stressors: Vec<String>,
    pub metal: String,
    pub metal_content: f64,
}

/// Aggregated ore stressors, characterized as the abundance-weighted mix of their components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedOre {
    pub stressors: Vec<String>,
    pub components: Vec<OreComponent>,
}

/// A component without `content` is extracted as is. Its factor is the mean over `flows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OreComponent {
    pub flows: Vec<String>,
    #[serde(default)]
    pub content: Option<f64>,
    pub abundance: f64,
}

impl Default for ExiobaseSettings {
    fn default() -> Self {
        let scale = |category: &str| UnitScaling {
            category: category.to_string(),
            factor: 1e6,
        };
        Self {
            concordance: Vec::new(),
            scaling: vec![
                scale("Land"),
                scale("Fossil and nuclear energy use"),
                scale(MINERAL_CATEGORY),
                scale("Water"),
            ],
            zeroed: ["long term", "short term"]
                .into_iter()
                .map(|term| ZeroedCells {
                    indicator: format!("Marine acidification, {term} (PDF.m2.yr)"),
                    stressors: vec!["HFC - air".to_string(), "PFC - air".to_string()],
                })
                .collect(),
            ores: Vec::new(),
            mixed_ores: Vec::new(),
            default_metal_content: 0.001,
        }
    }
}

impl ExiobaseSettings {
    fn stressors(&self) -> impl Iterator<Item = &String> {
        self.concordance
            .iter()
            .map(|entry| &entry.stressor)
            .chain(self.ores.iter().flat_map(|ore| &ore.stressors))
            .chain(self.mixed_ores.iter().flat_map(|ore| &ore.stressors))
    }
}

/// Indicator `"<category> (<unit>)"` by stressor, zero where nothing applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExiobaseMatrix {
    pub indicators: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ExiobaseMatrix {
    pub fn get(&self, indicator: &str, stressor: &str) -> Option<f64> {
        self.indicators.get(indicator)?.get(stressor).copied()
    }

    fn set(&mut self, indicator: &str, stressor: &str, value: f64) {
        if let Some(cell) = self
            .indicators
            .get_mut(indicator)
            .and_then(|row| row.get_mut(stressor))
        {
            *cell = value;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExiobaseReport {
    pub stressors: usize,
    pub linked: usize,
    pub not_characterized: usize,
    pub unmatched: usize,
    pub ores: usize,
    pub missing_ores: usize,
}

fn indicator(row: &CharacterizationFactor) -> String {
    format!("{} ({})", row.impact_category, row.cf_unit)
}

/// Rows of `flow` in the compartment a stressor's trailing medium selects, or `None` for soil.
fn stressor_rows<'a>(
    table: &'a CfTable,
    stressor: &str,
    flow: &str,
) -> Option<Vec<&'a CharacterizationFactor>> {
    let pick = |compartment: Compartment, sub_compartment: &str| -> Vec<&'a CharacterizationFactor> {
        table
            .iter()
            .filter(|row| {
                row.compartment == compartment
                    && row.sub_compartment == sub_compartment
                    && row.elem_flow_name() == flow
            })
            .collect()
    };
    let medium = stressor.rsplit("- ").next().unwrap_or(stressor);
    match medium {
        "soil" => None,
        "air" => Some(pick(Compartment::Air, UNSPECIFIED)),
        "water" => Some(pick(Compartment::Water, UNSPECIFIED)),
        _ if flow.contains(OCCUPATION) => Some(pick(Compartment::Raw, LAND)),
        _ => {
            let rows = pick(Compartment::Raw, UNSPECIFIED);
            if rows.is_empty() {
                Some(pick(Compartment::Raw, IN_GROUND))
            } else {
                Some(rows)
            }
        }
    }
}

/// Mineral resources factor of a substance extracted in ground.
fn mineral_factor<'a>(table: &'a CfTable, flow: &str) -> Option<&'a CharacterizationFactor> {
    table.iter().find(|row| {
        row.impact_category == MINERAL_CATEGORY
            && row.compartment == Compartment::Raw
            && row.sub_compartment == IN_GROUND
            && row.elem_flow_name() == flow
    })
}

fn mixed_ore_factor(
    table: &CfTable,
    ore: &MixedOre,
    default_content: f64,
) -> Option<(String, f64)> {
    let total: f64 = ore.components.iter().map(|c| c.abundance).sum();
    if total == 0.0 {
        return None;
    }
    let mut indicator_name = None;
    let mut value = 0.0;
    for component in &ore.components {
        let rows = component
            .flows
            .iter()
            .map(|flow| mineral_factor(table, flow))
            .collect::<Option<Vec<_>>>()?;
        let first = rows.first()?;
        indicator_name.get_or_insert_with(|| indicator(first));
        let factor = rows.iter().map(|row| row.cf_value).sum::<f64>() / rows.len() as f64;
        let content = match component.content {
            Some(content) if content <= MAX_METAL_CONTENT => content,
            Some(_) => default_content,
            None => 1.0,
        };
        value += content * component.abundance / total * factor;
    }
    indicator_name.map(|name| (name, value * ORE_SCALE))
}

/// Builds the stressor characterization matrix of one table.
pub fn exiobase_matrix(
    table: &CfTable,
    settings: &ExiobaseSettings,
) -> (ExiobaseMatrix, ExiobaseReport) {
    let mut report = ExiobaseReport::default();

    let mut stressors: Vec<&String> = settings.stressors().collect();
    stressors.sort();
    stressors.dedup();
    report.stressors = stressors.len();

    let mut matrix = ExiobaseMatrix::default();
    for row in table.iter() {
        matrix.indicators.entry(indicator(row)).or_insert_with(|| {
            stressors
                .iter()
                .map(|stressor| (stressor.to_string(), 0.0))
                .collect()
        });
    }

    for entry in &settings.concordance {
        let Some(flow) = entry.flow.as_deref() else {
            continue;
        };
        match stressor_rows(table, &entry.stressor, flow) {
            None => report.not_characterized += 1,
            Some(rows) if rows.is_empty() => {
                tracing::warn!(stressor = %entry.stressor, flow, "no factor for stressor");
                report.unmatched += 1;
            }
            Some(rows) => {
                for row in rows {
                    matrix.set(&indicator(row), &entry.stressor, row.cf_value);
                }
                report.linked += 1;
            }
        }
    }

    for (name, cells) in matrix.indicators.iter_mut() {
        let factor: f64 = settings
            .scaling
            .iter()
            .filter(|scaling| name.contains(&scaling.category))
            .map(|scaling| scaling.factor)
            .product();
        if factor != 1.0 {
            cells.values_mut().for_each(|value| *value *= factor);
        }
    }

    for cells in &settings.zeroed {
        for stressor in &cells.stressors {
            matrix.set(&cells.indicator, stressor, 0.0);
        }
    }

    for ore in &settings.ores {
        let Some(metal) = mineral_factor(table, &ore.metal) else {
            tracing::warn!(metal = %ore.metal, "no mineral resources factor for ore metal");
            report.missing_ores += 1;
            continue;
        };
        let value = ore.metal_content * metal.cf_value * ORE_SCALE;
        for stressor in &ore.stressors {
            matrix.set(&indicator(metal), stressor, value);
        }
        report.ores += 1;
    }

    for ore in &settings.mixed_ores {
        let Some((name, value)) = mixed_ore_factor(table, ore, settings.default_metal_content)
        else {
            tracing::warn!(stressors = ?ore.stressors, "mixed ore has a component without factor");
            report.missing_ores += 1;
            continue;
        };
        for stressor in &ore.stressors {
            matrix.set(&name, stressor, value);
        }
        report.ores += 1;
    }

    tracing::debug!(
        indicators = matrix.indicators.len(),
        linked = report.linked,
        "built stressor matrix"
    );
    (matrix, report)
}
