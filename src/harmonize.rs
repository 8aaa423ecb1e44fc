use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::{Compartment, Tier};
use crate::geo::Geography;
use crate::model::{CfTable, CharacterizationFactor};

pub fn default_substances() -> Vec<String> {
    [
        "Ammonia",
        "Nitrogen oxides",
        "Sulfur dioxide",
        "Sulfur trioxide",
        "Nitric oxide",
        "Nitrogen dioxide",
        "Sulfate",
        "Sulfuric acid",
        "Particulates, < 2.5 um",
        "Particulates, > 2.5 um, and < 10um",
        "Particulates, < 10 um",
        "Phosphorus",
        "Phosphate",
        "Nitrogen",
        "Nitrate",
    ]
    .iter()
    .map(|name| name.to_string())
    .collect()
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HarmonizeReport {
    pub substances: usize,
    pub slots: usize,
    pub synthesized: usize,
    pub gaps: usize,
}

/// One indicator characterizing a substance: every identity part except the flow region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    impact_category: String,
    cf_unit: String,
    sub_compartment: String,
    elem_flow_unit: String,
    tier: Tier,
}

#[derive(Default)]
struct SlotValues<'a> {
    regional: BTreeMap<&'a str, &'a CharacterizationFactor>,
    unregionalized: Option<&'a CharacterizationFactor>,
}

impl SlotValues<'_> {
    /// Slots carrying nothing but a zero unregionalized factor do not characterize the substance.
    fn is_indicator(&self) -> bool {
        !self.regional.is_empty() || self.unregionalized.is_some_and(|row| row.cf_value != 0.0)
    }
}

/// Gives every indicator of a substance the same set of regional variants.
pub fn harmonize(
    table: CfTable,
    substances: &[String],
    geography: &Geography,
) -> (CfTable, HarmonizeReport) {
    let mut report = HarmonizeReport::default();
    let mut synthesized = Vec::new();

    for substance in substances {
        let mut per_compartment: BTreeMap<Compartment, BTreeMap<Slot, SlotValues>> =
            BTreeMap::new();
        for row in table.iter().filter(|row| &row.flow.substance == substance) {
            let slot = Slot {
                impact_category: row.impact_category.clone(),
                cf_unit: row.cf_unit.clone(),
                sub_compartment: row.sub_compartment.clone(),
                elem_flow_unit: row.elem_flow_unit.clone(),
                tier: row.tier,
            };
            let values = per_compartment
                .entry(row.compartment)
                .or_default()
                .entry(slot)
                .or_default();
            match row.flow.region() {
                Some(region) => {
                    values.regional.insert(region, row);
                }
                None => values.unregionalized = Some(row),
            }
        }
        if per_compartment.is_empty() {
            continue;
        }
        report.substances += 1;

        for (compartment, slots) in &per_compartment {
            let indicators: Vec<(&Slot, &SlotValues)> = slots
                .iter()
                .filter(|(_, values)| values.is_indicator())
                .collect();
            let regions: BTreeSet<&str> = indicators
                .iter()
                .flat_map(|(_, values)| values.regional.keys().copied())
                .collect();
            report.slots += indicators.len();

            for (slot, values) in &indicators {
                for region in &regions {
                    if values.regional.contains_key(region) {
                        continue;
                    }
                    let fallback = geography
                        .ancestors(region)
                        .into_iter()
                        .find_map(|code| values.regional.get(code).copied())
                        .or(values.unregionalized);
                    match fallback {
                        Some(source) => synthesized.push(CharacterizationFactor {
                            flow: source.flow.with_region(region),
                            resolution: geography.classify(region),
                            ..source.clone()
                        }),
                        None => {
                            report.gaps += 1;
                            tracing::debug!(
                                substance = %substance,
                                compartment = %compartment,
                                category = %slot.impact_category,
                                region = *region,
                                "no fallback value for harmonized region"
                            );
                        }
                    }
                }
            }
        }
    }

    let mut table = table;
    for row in synthesized {
        if table.push_if_absent(row) {
            report.synthesized += 1;
        }
    }
    if report.gaps > 0 {
        tracing::warn!(gaps = report.gaps, "harmonizer left regions unresolved");
    }
    (table, report)
}
