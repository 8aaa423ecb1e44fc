use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::{CarbonAccounting, Compartment, UNSPECIFIED};
use crate::model::{CfTable, CharacterizationFactor, FlowName, Identity, override_with};

pub const FOSSIL: &str = "fossil";
pub const BIOGENIC: &str = "biogenic";
pub const LAND_TRANSFORMATION: &str = "land transformation";
pub const CO2_UPTAKE: &str = "CO2 uptake";

const PARTITIONS: [&str; 4] = [FOSSIL, BIOGENIC, LAND_TRANSFORMATION, CO2_UPTAKE];

/// True for a climate sub-category produced by partitioning, e.g. "Climate change, short term, fossil".
pub fn is_partition(category: &str) -> bool {
    category
        .rsplit_once(", ")
        .is_some_and(|(_, suffix)| PARTITIONS.contains(&suffix))
}

/// Strips a partition suffix: "Climate change, short term, fossil" -> "Climate change, short term".
pub fn partition_base(category: &str) -> &str {
    match category.rsplit_once(", ") {
        Some((base, suffix)) if PARTITIONS.contains(&suffix) => base,
        _ => category,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analogue {
    pub biogenic: String,
    pub fossil: String,
}

/// Flow-name sets and category families the two accounting views operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonFlows {
    pub climate_prefix: String,
    pub fossil_co2: String,
    pub biogenic_co2: String,
    pub uptake: String,
    pub uptake_sub_compartment: String,
    pub analogues: Vec<Analogue>,
    pub biogenic_monoxide: String,
    pub land_transformation: Vec<String>,
    pub land_transformation_co2: String,
    pub soil_storage: String,
    pub storage_origins: Vec<String>,
    pub storage_suffix: String,
    pub inverted_families: Vec<String>,
    pub storage_exclusions: Vec<String>,
}

impl Default for CarbonFlows {
    fn default() -> Self {
        Self {
            climate_prefix: "Climate change".to_string(),
            fossil_co2: "Carbon dioxide, fossil".to_string(),
            biogenic_co2: "Carbon dioxide, biogenic".to_string(),
            uptake: "Carbon dioxide, in air".to_string(),
            uptake_sub_compartment: "in air".to_string(),
            analogues: vec![
                Analogue {
                    biogenic: "Methane, biogenic".to_string(),
                    fossil: "Methane, fossil".to_string(),
                },
                Analogue {
                    biogenic: "Carbon monoxide, biogenic".to_string(),
                    fossil: "Carbon monoxide, fossil".to_string(),
                },
            ],
            biogenic_monoxide: "Carbon monoxide, biogenic".to_string(),
            land_transformation: vec![
                "Carbon dioxide, from soil or biomass stock".to_string(),
                "Methane, from soil or biomass stock".to_string(),
                "Carbon monoxide, from soil or biomass stock".to_string(),
            ],
            land_transformation_co2: "Carbon dioxide, from soil or biomass stock".to_string(),
            soil_storage: "Carbon dioxide, to soil or biomass stock".to_string(),
            storage_origins: vec![
                "Carbon dioxide, fossil".to_string(),
                "Carbon dioxide, biogenic".to_string(),
            ],
            storage_suffix: ", temporary storage".to_string(),
            inverted_families: vec![
                "Climate change, human health".to_string(),
                "Climate change, ecosystem quality".to_string(),
                "Marine acidification".to_string(),
            ],
            storage_exclusions: vec![
                "Fossil and nuclear energy use".to_string(),
                "Climate change, short term".to_string(),
                "Climate change, long term".to_string(),
            ],
        }
    }
}

impl CarbonFlows {
    fn is_climate(&self, category: &str) -> bool {
        category.starts_with(&self.climate_prefix) && !is_partition(category)
    }

    fn storage_name(&self, origin: &str) -> String {
        format!("{origin}{}", self.storage_suffix)
    }

    fn partition_of(&self, substance: &str) -> &'static str {
        let substance = substance
            .strip_suffix(self.storage_suffix.as_str())
            .unwrap_or(substance);
        if substance == self.uptake {
            CO2_UPTAKE
        } else if self.land_transformation.iter().any(|flow| flow == substance) {
            LAND_TRANSFORMATION
        } else if substance == self.biogenic_co2
            || substance == self.biogenic_monoxide
            || self.analogues.iter().any(|a| a.biogenic == substance)
        {
            BIOGENIC
        } else {
            FOSSIL
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ForkReport {
    pub adjusted: usize,
    pub storage: usize,
    pub partitioned: usize,
}

/// Derives one accounting view from the shared baseline.
pub fn fork(
    baseline: &CfTable,
    accounting: CarbonAccounting,
    flows: &CarbonFlows,
) -> (CfTable, ForkReport) {
    let mut report = ForkReport::default();
    let forced = carbon_rows(baseline, accounting, flows);
    report.adjusted = forced.len();
    let table = override_with(baseline.clone(), &forced).concat(forced);

    let storage = storage_rows(&table, flows);
    report.storage = storage.len();
    let table = override_with(table, &storage).concat(storage);

    let table = match accounting {
        CarbonAccounting::PlusMinusOne => {
            let before = table.len();
            let table = partition(table, flows);
            report.partitioned = table.len() - before;
            table
        }
        CarbonAccounting::CarbonNeutral => table,
    };

    tracing::info!(
        view = %accounting,
        rows = table.len(),
        adjusted = report.adjusted,
        storage = report.storage,
        partitioned = report.partitioned,
        "forked carbon accounting view"
    );
    (table, report)
}

/// Rows whose values differ between the views: biogenic release and uptake, biogenic
/// analogues of fossil flows and, in the carbon-neutral view, land transformation.
fn carbon_rows(table: &CfTable, accounting: CarbonAccounting, flows: &CarbonFlows) -> CfTable {
    let neutral = accounting == CarbonAccounting::CarbonNeutral;
    let mut forced = CfTable::new();

    let mut uptake_source: BTreeMap<(String, String, Option<String>), CharacterizationFactor> =
        BTreeMap::new();
    for fossil in climate(table, flows).filter(|row| {
        row.compartment == Compartment::Air && row.flow.substance == flows.fossil_co2
    }) {
        let release = CharacterizationFactor {
            flow: renamed(&fossil.flow, &flows.biogenic_co2),
            cf_value: if neutral { 0.0 } else { fossil.cf_value },
            ..fossil.clone()
        };
        let key = (
            release.impact_category.clone(),
            release.cf_unit.clone(),
            release.flow.region.clone(),
        );
        if release.sub_compartment == UNSPECIFIED || !uptake_source.contains_key(&key) {
            uptake_source.insert(key, release.clone());
        }
        forced.push(release);
    }
    for release in uptake_source.into_values() {
        forced.push(CharacterizationFactor {
            compartment: Compartment::Raw,
            sub_compartment: flows.uptake_sub_compartment.clone(),
            flow: renamed(&release.flow, &flows.uptake),
            cf_value: if neutral { 0.0 } else { -release.cf_value },
            ..release
        });
    }

    for analogue in &flows.analogues {
        for fossil in climate(table, flows).filter(|row| row.flow.substance == analogue.fossil) {
            let biogenic = CharacterizationFactor {
                flow: renamed(&fossil.flow, &analogue.biogenic),
                ..fossil.clone()
            };
            let existing = table.get(&biogenic.identity()).cloned();
            let mut row = existing.unwrap_or(biogenic);
            if neutral && row.flow.substance == flows.biogenic_monoxide {
                row.cf_value = 0.0;
            }
            forced.push(row);
        }
    }
    if neutral {
        for row in climate(table, flows).filter(|row| row.flow.substance == flows.biogenic_monoxide) {
            forced.push(CharacterizationFactor {
                cf_value: 0.0,
                ..row.clone()
            });
        }
        for row in climate(table, flows).filter(|row| row.flow.substance == flows.land_transformation_co2) {
            let storage = lookup(
                table,
                row,
                Compartment::Soil,
                UNSPECIFIED,
                &flows.soil_storage,
            )
            .map(|storage| -storage)
            .or_else(|| lookup(table, row, Compartment::Air, &row.sub_compartment, &flows.fossil_co2))
            .or_else(|| lookup(table, row, Compartment::Air, UNSPECIFIED, &flows.fossil_co2));
            if let Some(value) = storage {
                forced.push(CharacterizationFactor {
                    cf_value: value,
                    ..row.clone()
                });
            }
        }
    }
    forced
}

fn climate<'a>(
    table: &'a CfTable,
    flows: &'a CarbonFlows,
) -> impl Iterator<Item = &'a CharacterizationFactor> {
    table
        .iter()
        .filter(move |row| flows.is_climate(&row.impact_category))
}

fn lookup(
    table: &CfTable,
    like: &CharacterizationFactor,
    compartment: Compartment,
    sub_compartment: &str,
    substance: &str,
) -> Option<f64> {
    table
        .iter()
        .find(|row| {
            row.impact_category == like.impact_category
                && row.cf_unit == like.cf_unit
                && row.compartment == compartment
                && row.sub_compartment == sub_compartment
                && row.flow.substance == substance
                && row.flow.region == like.flow.region
        })
        .map(|row| row.cf_value)
}

/// Temporary-storage corrections: the origin factor per year, divided by -100.
///
/// For the inverted families the long-term correction is the negated short-term one.
fn storage_rows(table: &CfTable, flows: &CarbonFlows) -> CfTable {
    let rows: Vec<CharacterizationFactor> = table
        .iter()
        .filter(|row| flows.storage_origins.contains(&row.flow.substance))
        .filter(|row| {
            !is_partition(&row.impact_category)
                && !flows.storage_exclusions.contains(&row.impact_category)
        })
        .map(|row| CharacterizationFactor {
            flow: renamed(&row.flow, &flows.storage_name(&row.flow.substance)),
            elem_flow_unit: format!("{}.yr", row.elem_flow_unit),
            cf_value: per_year_correction(row.cf_value),
            ..row.clone()
        })
        .collect();

    let values: HashMap<Identity, f64> = rows
        .iter()
        .map(|row| (row.identity(), row.cf_value))
        .collect();
    let short_term_of = |row: &CharacterizationFactor| -> Option<f64> {
        let family = row.impact_category.strip_suffix(", long term")?;
        if !flows.inverted_families.iter().any(|f| f == family) {
            return None;
        }
        let mut short = row.identity();
        short.impact_category = format!("{family}, short term");
        values.get(&short).copied()
    };

    rows.iter()
        .map(|row| match short_term_of(row) {
            Some(short) => CharacterizationFactor {
                cf_value: 0.0 - short,
                ..row.clone()
            },
            None => row.clone(),
        })
        .collect()
}

fn per_year_correction(value: f64) -> f64 {
    let corrected = value / -100.0;
    if corrected == 0.0 { 0.0 } else { corrected }
}

/// Adds fossil / biogenic / land transformation / CO2 uptake sub-categories next to every
/// climate category. Already partitioned categories are left alone.
fn partition(table: CfTable, flows: &CarbonFlows) -> CfTable {
    let parts: Vec<CharacterizationFactor> = table
        .iter()
        .filter(|row| flows.is_climate(&row.impact_category))
        .map(|row| CharacterizationFactor {
            impact_category: format!(
                "{}, {}",
                row.impact_category,
                flows.partition_of(&row.flow.substance)
            ),
            ..row.clone()
        })
        .collect();
    let mut table = table;
    for row in parts {
        table.push_if_absent(row);
    }
    table
}

fn renamed(flow: &FlowName, substance: &str) -> FlowName {
    FlowName {
        substance: substance.to_string(),
        region: flow.region.clone(),
    }
}
