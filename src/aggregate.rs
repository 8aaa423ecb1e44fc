use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::biogenic::{is_partition, partition_base};
use crate::domain::Tier;
use crate::model::{CfTable, CharacterizationFactor};

/// Row shape shared by canonical and linked tables, as far as aggregation needs it.
pub trait FactorRow: Clone {
    fn impact_category(&self) -> &str;
    fn cf_unit(&self) -> &str;
    fn tier(&self) -> Tier;
    fn cf_value(&self) -> f64;
    fn group_key(&self) -> GroupKey;
    fn renamed(&self, impact_category: &str) -> Self;
    /// A damage row of `cf_unit` carrying this row's flow and the given value.
    fn aggregated(&self, impact_category: &str, cf_unit: &str, cf_value: f64) -> Self;
}

/// Rows sharing a key describe the same flow; omitting a field would merge distinct flows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub compartment: String,
    pub sub_compartment: String,
    pub flow: String,
    pub flow_unit: String,
    pub external_id: Option<String>,
    pub location: Option<String>,
}

impl FactorRow for CharacterizationFactor {
    fn impact_category(&self) -> &str {
        &self.impact_category
    }

    fn cf_unit(&self) -> &str {
        &self.cf_unit
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    fn cf_value(&self) -> f64 {
        self.cf_value
    }

    fn group_key(&self) -> GroupKey {
        GroupKey {
            compartment: self.compartment.to_string(),
            sub_compartment: self.sub_compartment.clone(),
            flow: self.flow.to_string(),
            flow_unit: self.elem_flow_unit.clone(),
            external_id: None,
            location: None,
        }
    }

    fn renamed(&self, impact_category: &str) -> Self {
        CharacterizationFactor {
            impact_category: impact_category.to_string(),
            ..self.clone()
        }
    }

    fn aggregated(&self, impact_category: &str, cf_unit: &str, cf_value: f64) -> Self {
        CharacterizationFactor {
            impact_category: impact_category.to_string(),
            cf_unit: cf_unit.to_string(),
            cf_value,
            tier: Tier::Damage,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSettings {
    pub human_health_unit: String,
    pub ecosystem_quality_unit: String,
    pub total_human_health: String,
    pub total_ecosystem_quality: String,
    pub residual_human_health: String,
    pub residual_ecosystem_quality: String,
    pub midpoint_drop: Vec<String>,
    pub endpoint_drop: Vec<String>,
    pub renames: BTreeMap<String, String>,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
        Self {
            human_health_unit: "DALY".to_string(),
            ecosystem_quality_unit: "PDF.m2.yr".to_string(),
            total_human_health: "Total human health".to_string(),
            total_ecosystem_quality: "Total ecosystem quality".to_string(),
            residual_human_health: "Human health (residual)".to_string(),
            residual_ecosystem_quality: "Ecosystem quality (residual)".to_string(),
            midpoint_drop: strings(&[
                "Climate change, long term",
                "Freshwater acidification",
                "Freshwater ecotoxicity",
                "Freshwater eutrophication",
                "Mineral resources use",
                "Human toxicity cancer",
                "Human toxicity non-cancer",
                "Ionizing radiations",
                "Land occupation, biodiversity",
                "Land transformation, biodiversity",
                "Marine eutrophication",
                "Ozone layer depletion",
                "Particulate matter formation",
                "Photochemical oxidant formation",
                "Terrestrial acidification",
            ]),
            endpoint_drop: strings(&[
                "Climate change, ecosystem quality, long term",
                "Climate change, ecosystem quality, short term",
                "Climate change, human health, long term",
                "Climate change, human health, short term",
                "Water availability, freshwater ecosystem",
                "Water availability, human health",
                "Water availability, terrestrial ecosystem",
                "Human toxicity cancer, long term",
                "Human toxicity non-cancer, long term",
                "Freshwater ecotoxicity, long term",
                "Marine acidification, long term",
            ]),
            renames: [
                ("Climate change, short term", "Carbon footprint"),
                ("Water scarcity", "Water scarcity footprint"),
            ]
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect(),
        }
    }
}

impl AggregationSettings {
    fn is_aggregate(&self, category: &str) -> bool {
        category == self.total_human_health
            || category == self.total_ecosystem_quality
            || category == self.residual_human_health
            || category == self.residual_ecosystem_quality
            || is_partition(category)
    }

    fn rename(&self, category: &str) -> String {
        if let Some(renamed) = self.renames.get(category) {
            return renamed.clone();
        }
        let base = partition_base(category);
        match self.renames.get(base) {
            Some(renamed) if base != category => format!("{renamed}{}", &category[base.len()..]),
            _ => category.to_string(),
        }
    }
}

/// Sums the damage rows of `unit` per flow into `category`, skipping aggregates.
fn sum_damages<R: FactorRow>(
    rows: &[R],
    unit: &str,
    category: &str,
    settings: &AggregationSettings,
) -> Vec<R> {
    let mut order = Vec::new();
    let mut sums: HashMap<GroupKey, (R, f64)> = HashMap::new();
    for row in rows.iter().filter(|row| {
        row.tier() == Tier::Damage
            && row.cf_unit() == unit
            && !settings.is_aggregate(row.impact_category())
    }) {
        let key = row.group_key();
        match sums.get_mut(&key) {
            Some((_, sum)) => *sum += row.cf_value(),
            None => {
                order.push(key.clone());
                sums.insert(key, (row.clone(), row.cf_value()));
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| sums.remove(&key))
        .map(|(template, sum)| template.aggregated(category, unit, sum))
        .collect()
}

/// Replaces any previous totals with "Total human health" and "Total ecosystem quality".
pub fn with_totals<R: FactorRow>(rows: Vec<R>, settings: &AggregationSettings) -> Vec<R> {
    let mut rows: Vec<R> = rows
        .into_iter()
        .filter(|row| {
            row.impact_category() != settings.total_human_health
                && row.impact_category() != settings.total_ecosystem_quality
        })
        .collect();
    let human_health = sum_damages(
        &rows,
        &settings.human_health_unit,
        &settings.total_human_health,
        settings,
    );
    let ecosystem_quality = sum_damages(
        &rows,
        &settings.ecosystem_quality_unit,
        &settings.total_ecosystem_quality,
        settings,
    );
    rows.extend(human_health);
    rows.extend(ecosystem_quality);
    rows
}

/// Reduced indicator set: dropped categories removed, remaining damages collapsed into
/// residual human health and ecosystem quality, footprint midpoints renamed.
pub fn footprint<R: FactorRow>(rows: &[R], settings: &AggregationSettings) -> Vec<R> {
    let kept: Vec<R> = rows
        .iter()
        .filter(|row| {
            let category = row.impact_category();
            let base = partition_base(category);
            let dropped_midpoint =
                row.tier() == Tier::Midpoint && settings.midpoint_drop.iter().any(|c| c == base);
            let dropped_endpoint = settings.endpoint_drop.iter().any(|c| c == base);
            let total = category == settings.total_human_health
                || category == settings.total_ecosystem_quality;
            !(dropped_midpoint || dropped_endpoint || total)
        })
        .cloned()
        .collect();

    let damage_unit = |row: &R| {
        row.tier() == Tier::Damage
            && (row.cf_unit() == settings.human_health_unit
                || row.cf_unit() == settings.ecosystem_quality_unit)
    };
    let mut reduced: Vec<R> = kept
        .iter()
        .filter(|row| !damage_unit(*row))
        .map(|row| row.renamed(&settings.rename(row.impact_category())))
        .collect();
    reduced.extend(sum_damages(
        &kept,
        &settings.human_health_unit,
        &settings.residual_human_health,
        settings,
    ));
    reduced.extend(sum_damages(
        &kept,
        &settings.ecosystem_quality_unit,
        &settings.residual_ecosystem_quality,
        settings,
    ));
    reduced
}

pub fn table_with_totals(table: CfTable, settings: &AggregationSettings) -> CfTable {
    with_totals(table.into_rows(), settings).into_iter().collect()
}

pub fn table_footprint(table: &CfTable, settings: &AggregationSettings) -> CfTable {
    footprint(table.rows(), settings).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowName;
    use crate::model::fixtures::cf;

    fn damages() -> Vec<CharacterizationFactor> {
        vec![
            cf("Climate change, human health, short term", "DALY", FlowName::plain("Methane, fossil"), 1.0),
            cf("Human toxicity cancer", "DALY", FlowName::plain("Methane, fossil"), 2.0),
            cf("Photochemical oxidant formation", "DALY", FlowName::plain("Methane, fossil"), 3.0),
            cf("Marine acidification, short term", "PDF.m2.yr", FlowName::plain("Methane, fossil"), 0.5),
            cf("Climate change, short term", "kg CO2 eq (short)", FlowName::plain("Methane, fossil"), 30.0),
        ]
    }

    fn total(rows: &[CharacterizationFactor], category: &str) -> Vec<f64> {
        rows.iter()
            .filter(|row| row.impact_category == category)
            .map(|row| row.cf_value)
            .collect()
    }

    #[test]
    fn totals_sum_damages_per_flow() {
        let settings = AggregationSettings::default();
        let rows = with_totals(damages(), &settings);
        assert_eq!(total(&rows, "Total human health"), vec![6.0]);
        assert_eq!(total(&rows, "Total ecosystem quality"), vec![0.5]);

        let again = with_totals(rows.clone(), &settings);
        assert_eq!(total(&again, "Total human health"), vec![6.0]);
        assert_eq!(again.len(), rows.len());
    }

    #[test]
    fn totals_keep_distinct_sub_compartments_apart() {
        let settings = AggregationSettings::default();
        let mut rows = damages();
        let mut high_pop = rows[1].clone();
        high_pop.sub_compartment = "high. pop.".to_string();
        rows.push(high_pop);
        let rows = with_totals(rows, &settings);
        let mut totals = total(&rows, "Total human health");
        totals.sort_by(f64::total_cmp);
        assert_eq!(totals, vec![2.0, 6.0]);
    }

    #[test]
    fn partitions_are_not_counted_in_totals() {
        let settings = AggregationSettings::default();
        let mut rows = damages();
        rows.push(cf(
            "Climate change, human health, short term, fossil",
            "DALY",
            FlowName::plain("Methane, fossil"),
            1.0,
        ));
        let rows = with_totals(rows, &settings);
        assert_eq!(total(&rows, "Total human health"), vec![6.0]);
    }

    #[test]
    fn footprint_collapses_remaining_damages() {
        let settings = AggregationSettings::default();
        let rows = footprint(&with_totals(damages(), &settings), &settings);
        assert_eq!(total(&rows, "Human health (residual)"), vec![5.0]);
        assert_eq!(total(&rows, "Ecosystem quality (residual)"), vec![0.5]);
        assert_eq!(total(&rows, "Carbon footprint"), vec![30.0]);
        assert!(total(&rows, "Total human health").is_empty());
        assert!(total(&rows, "Human toxicity cancer").is_empty());
    }

    #[test]
    fn rename_follows_partitions() {
        let settings = AggregationSettings::default();
        assert_eq!(
            settings.rename("Climate change, short term, fossil"),
            "Carbon footprint, fossil"
        );
        assert_eq!(settings.rename("Water scarcity"), "Water scarcity footprint");
        assert_eq!(settings.rename("Ozone layer depletion"), "Ozone layer depletion");
    }
}
