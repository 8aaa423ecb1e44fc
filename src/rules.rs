use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, Tier, UNSPECIFIED};
use crate::geo::Geography;
use crate::model::{CfTable, CharacterizationFactor, FlowName, Identity, override_with};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubcompartmentPolicy {
    Copy,
    Zero,
}

/// Derives `sub_compartment` rows from a baseline sub-compartment of the same compartment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubcompartmentRule {
    pub compartment: Compartment,
    pub sub_compartment: String,
    pub policy: SubcompartmentPolicy,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub flow_contains: Vec<String>,
    #[serde(default)]
    pub flow_excludes: Vec<String>,
    #[serde(default)]
    pub prefer_source: Option<String>,
}

impl SubcompartmentRule {
    fn copy(compartment: Compartment, sub_compartment: &str) -> Self {
        Self {
            compartment,
            sub_compartment: sub_compartment.to_string(),
            policy: SubcompartmentPolicy::Copy,
            categories: Vec::new(),
            flow_contains: Vec::new(),
            flow_excludes: Vec::new(),
            prefer_source: None,
        }
    }

    fn zero(compartment: Compartment, sub_compartment: &str, categories: &[&str]) -> Self {
        Self {
            policy: SubcompartmentPolicy::Zero,
            categories: to_strings(categories),
            ..Self::copy(compartment, sub_compartment)
        }
    }

    fn for_categories(mut self, categories: &[&str]) -> Self {
        self.categories = to_strings(categories);
        self
    }

    fn applies_to(&self, row: &CharacterizationFactor) -> bool {
        if row.compartment != self.compartment {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&row.impact_category) {
            return false;
        }
        let name = row.flow.substance.to_lowercase();
        if !self.flow_contains.is_empty()
            && !self
                .flow_contains
                .iter()
                .any(|needle| name.contains(&needle.to_lowercase()))
        {
            return false;
        }
        !self
            .flow_excludes
            .iter()
            .any(|needle| name.contains(&needle.to_lowercase()))
    }
}

/// Sums short/long-term variants of a category family into a long-term sub-compartment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermSplitRule {
    pub sub_compartment: String,
    pub source_sub_compartment: String,
    pub families: Vec<String>,
    #[serde(default)]
    pub damage_passthrough: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZeroClone {
    pub template: String,
    pub flow: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermOnly {
    pub flow_contains: String,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTable {
    #[serde(default)]
    pub zero_clones: Vec<ZeroClone>,
    #[serde(default)]
    pub rules: Vec<SubcompartmentRule>,
    #[serde(default)]
    pub term_splits: Vec<TermSplitRule>,
    #[serde(default)]
    pub short_term_only: Vec<ShortTermOnly>,
}

const WATER_USE_CATEGORIES: [&str; 5] = [
    "Water scarcity",
    "Thermally polluted water",
    "Water availability, terrestrial ecosystem",
    "Water availability, freshwater ecosystem",
    "Water availability, human health",
];

const GROUNDWATER_COPY: [&str; 3] = [
    "Water availability, freshwater ecosystem",
    "Water availability, human health",
    "Water scarcity",
];

const GROUNDWATER_ZERO: [&str; 14] = [
    "Freshwater ecotoxicity",
    "Freshwater ecotoxicity, long term",
    "Freshwater ecotoxicity, short term",
    "Freshwater eutrophication",
    "Human toxicity cancer",
    "Human toxicity cancer, long term",
    "Human toxicity cancer, short term",
    "Human toxicity non-cancer",
    "Human toxicity non-cancer, long term",
    "Human toxicity non-cancer, short term",
    "Ionizing radiation, ecosystem quality",
    "Ionizing radiation, human health",
    "Ionizing radiations",
    "Marine eutrophication",
];

const OCEAN_ZERO: [&str; 14] = [
    "Freshwater ecotoxicity",
    "Freshwater ecotoxicity, long term",
    "Freshwater ecotoxicity, short term",
    "Freshwater eutrophication",
    "Ionizing radiation, ecosystem quality",
    "Human toxicity cancer",
    "Human toxicity cancer, long term",
    "Human toxicity cancer, short term",
    "Human toxicity non-cancer",
    "Human toxicity non-cancer, long term",
    "Human toxicity non-cancer, short term",
    "Water availability, freshwater ecosystem",
    "Water availability, human health",
    "Water scarcity",
];

impl RuleTable {
    pub fn standard() -> Self {
        let mut rules = Vec::new();
        for sub in ["high. pop.", "low. pop.", "stratosphere + troposphere", "indoor"] {
            rules.push(SubcompartmentRule::copy(Compartment::Air, sub));
        }
        for sub in ["lake", "river"] {
            rules.push(SubcompartmentRule::copy(Compartment::Water, sub));
        }
        for sub in ["industrial", "agricultural"] {
            rules.push(SubcompartmentRule::copy(Compartment::Soil, sub));
        }

        let energy = ["Fossil and nuclear energy use"];
        rules.push(SubcompartmentRule {
            flow_contains: to_strings(&["wood", "peat"]),
            ..SubcompartmentRule::copy(Compartment::Raw, "biotic").for_categories(&energy)
        });
        rules.push(SubcompartmentRule {
            flow_excludes: to_strings(&["wood", "peat"]),
            ..SubcompartmentRule::copy(Compartment::Raw, "in ground").for_categories(&energy)
        });
        for sub in ["in water", "in ground"] {
            rules.push(
                SubcompartmentRule::copy(Compartment::Raw, sub)
                    .for_categories(&WATER_USE_CATEGORIES),
            );
        }

        for sub in ["groundwater", "groundwater, long-term"] {
            rules.push(SubcompartmentRule {
                prefer_source: Some("groundwater".to_string()),
                ..SubcompartmentRule::copy(Compartment::Water, sub)
                    .for_categories(&GROUNDWATER_COPY)
            });
        }
        rules.push(
            SubcompartmentRule::copy(Compartment::Water, "ocean")
                .for_categories(&["Marine eutrophication"]),
        );
        for sub in ["groundwater", "groundwater, long-term"] {
            rules.push(SubcompartmentRule::zero(
                Compartment::Water,
                sub,
                &GROUNDWATER_ZERO,
            ));
        }
        rules.push(SubcompartmentRule::zero(
            Compartment::Water,
            "ocean",
            &OCEAN_ZERO,
        ));

        Self {
            zero_clones: vec![
                ZeroClone {
                    template: "Water, lake, GLO".to_string(),
                    flow: "Water, salt, ocean".to_string(),
                },
                ZeroClone {
                    template: "Water, lake, GLO".to_string(),
                    flow: "Water, salt, sole".to_string(),
                },
            ],
            rules,
            term_splits: vec![TermSplitRule {
                sub_compartment: "low. pop., long-term".to_string(),
                source_sub_compartment: "low. pop.".to_string(),
                families: to_strings(&[
                    "Climate change, ecosystem quality",
                    "Climate change, human health",
                    "Freshwater ecotoxicity",
                    "Human toxicity cancer",
                    "Human toxicity non-cancer",
                    "Marine acidification",
                ]),
                damage_passthrough: to_strings(&[
                    "Marine eutrophication",
                    "Ozone layer depletion",
                    "Photochemical oxidant formation",
                    "Terrestrial acidification",
                    "Particulate matter formation",
                    "Ionizing radiation, ecosystem quality",
                    "Ionizing radiation, human health",
                    "Freshwater acidification",
                ]),
            }],
            short_term_only: vec![ShortTermOnly {
                flow_contains: "soil or biomass".to_string(),
                categories: to_strings(&[
                    "Climate change, ecosystem quality, long term",
                    "Climate change, human health, long term",
                    "Marine acidification, long term",
                ]),
            }],
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RuleReport {
    pub cloned: usize,
    pub derived: usize,
    pub kept_existing: usize,
    pub split: usize,
    pub removed: usize,
}

/// Expands every baseline into the closed set of sub-compartments declared by `rules`.
///
/// Explicit rows already present for a target sub-compartment always win over derived
/// ones, and applying the engine to its own output adds nothing.
pub fn apply_rules(
    table: CfTable,
    rules: &RuleTable,
    geography: &Geography,
) -> (CfTable, RuleReport) {
    let mut report = RuleReport::default();
    let mut table = table;

    for clone in &rules.zero_clones {
        let template = FlowName::parse(&clone.template, geography);
        let target = FlowName::parse(&clone.flow, geography);
        let clones: Vec<CharacterizationFactor> = table
            .iter()
            .filter(|row| row.flow == template)
            .map(|row| CharacterizationFactor {
                flow: target.clone(),
                cf_value: 0.0,
                ..row.clone()
            })
            .collect();
        let before = table.len();
        let clones = override_with(clones.into_iter().collect(), &table);
        table = table.concat(clones);
        report.cloned += table.len() - before;
    }

    for rule in &rules.rules {
        let before = table.len();
        let preferred = rule
            .prefer_source
            .as_ref()
            .map(|source| categories_with(&table, rule.compartment, source))
            .unwrap_or_default();

        let derived: CfTable = table
            .iter()
            .filter(|row| rule.applies_to(row))
            .filter(|row| {
                let source = match &rule.prefer_source {
                    Some(source) if preferred.contains(&row.impact_category) => source.as_str(),
                    _ => UNSPECIFIED,
                };
                row.sub_compartment == source
            })
            .map(|row| {
                let mut derived = row.clone();
                derived.sub_compartment = rule.sub_compartment.clone();
                if rule.policy == SubcompartmentPolicy::Zero {
                    derived.cf_value = 0.0;
                }
                derived
            })
            .collect();

        let candidates = derived.len();
        let derived = override_with(derived, &table);
        table = table.concat(derived);
        let added = table.len() - before;
        report.derived += added;
        report.kept_existing += candidates - added;
        tracing::debug!(
            compartment = %rule.compartment,
            sub_compartment = %rule.sub_compartment,
            added,
            "applied sub-compartment rule"
        );
    }

    for split in &rules.term_splits {
        let (next, produced, removed) = apply_term_split(table, split);
        table = next;
        report.split += produced;
        report.removed += removed;
    }

    for only in &rules.short_term_only {
        let before = table.len();
        table = table.retain(|row| {
            !(row.flow.substance.contains(&only.flow_contains)
                && only.categories.contains(&row.impact_category))
        });
        report.removed += before - table.len();
    }

    (table, report)
}

fn apply_term_split(table: CfTable, split: &TermSplitRule) -> (CfTable, usize, usize) {
    let before = table.len();
    let table = table.retain(|row| {
        !(row.sub_compartment == split.sub_compartment
            && term_family(&row.impact_category)
                .is_some_and(|family| split.families.iter().any(|f| f == family)))
    });
    let removed = before - table.len();

    let source: Vec<CharacterizationFactor> = table
        .iter()
        .filter(|row| row.sub_compartment == split.source_sub_compartment)
        .cloned()
        .collect();

    let mut table = table;
    let mut produced = 0;
    for family in &split.families {
        let mut sums: BTreeMap<Identity, CharacterizationFactor> = BTreeMap::new();
        for row in source
            .iter()
            .filter(|row| term_family(&row.impact_category) == Some(family.as_str()))
        {
            let mut summed = row.clone();
            summed.impact_category = format!("{family}, long term");
            summed.sub_compartment = split.sub_compartment.clone();
            sums.entry(summed.identity())
                .and_modify(|acc| acc.cf_value += row.cf_value)
                .or_insert(summed);
        }
        for (_, long_term) in sums {
            let mut short_term = long_term.clone();
            short_term.impact_category = format!("{family}, short term");
            short_term.cf_value = 0.0;
            table.push(long_term);
            table.push(short_term);
            produced += 2;
        }
    }

    for row in &source {
        let passthrough = row.tier == Tier::Midpoint
            || split.damage_passthrough.contains(&row.impact_category);
        if passthrough {
            let mut copy = row.clone();
            copy.sub_compartment = split.sub_compartment.clone();
            if table.push_if_absent(copy) {
                produced += 1;
            }
        }
    }

    (table, produced, removed)
}

/// "Freshwater ecotoxicity, long term" -> "Freshwater ecotoxicity".
fn term_family(category: &str) -> Option<&str> {
    category
        .strip_suffix(", short term")
        .or_else(|| category.strip_suffix(", long term"))
}

fn categories_with(table: &CfTable, compartment: Compartment, sub: &str) -> BTreeSet<String> {
    table
        .iter()
        .filter(|row| row.compartment == compartment && row.sub_compartment == sub)
        .map(|row| row.impact_category.clone())
        .collect()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resolution;
    use crate::model::fixtures::cf;

    fn in_sub(mut row: CharacterizationFactor, compartment: Compartment, sub: &str) -> CharacterizationFactor {
        row.compartment = compartment;
        row.sub_compartment = sub.to_string();
        row
    }

    fn sorted(table: &CfTable) -> Vec<String> {
        let mut rows: Vec<String> = table
            .iter()
            .map(|row| {
                format!(
                    "{}|{}|{}|{}|{}|{}",
                    row.impact_category,
                    row.cf_unit,
                    row.compartment,
                    row.sub_compartment,
                    row.flow,
                    row.cf_value
                )
            })
            .collect();
        rows.sort();
        rows
    }

    fn baseline() -> CfTable {
        vec![
            cf("Ozone layer depletion", "kg CFC-11 eq", FlowName::plain("Halon 1301"), 10.0),
            cf("Climate change, human health, short term", "DALY", FlowName::plain("Methane, fossil"), 2.0),
            cf("Climate change, human health, long term", "DALY", FlowName::plain("Methane, fossil"), 3.0),
            in_sub(
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc"), 5.0),
                Compartment::Water,
                UNSPECIFIED,
            ),
            in_sub(
                CharacterizationFactor {
                    cas_number: Some("7732-18-5".to_string()),
                    ..cf("Water scarcity", "m3 world-eq", FlowName::regional("Water, lake", "GLO"), 1.5)
                },
                Compartment::Water,
                UNSPECIFIED,
            ),
            in_sub(
                cf("Fossil and nuclear energy use", "MJ deprived", FlowName::plain("Peat"), 9.9),
                Compartment::Raw,
                UNSPECIFIED,
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn copy_policy_inherits_unspecified_value() {
        let (table, _) = apply_rules(baseline(), &RuleTable::standard(), &Geography::standard());
        let high_pop = table
            .iter()
            .find(|row| {
                row.impact_category == "Ozone layer depletion" && row.sub_compartment == "high. pop."
            })
            .unwrap();
        assert_eq!(high_pop.cf_value, 10.0);

        let biotic = table
            .iter()
            .find(|row| row.flow.substance == "Peat" && row.sub_compartment == "biotic");
        assert!(biotic.is_some());
        assert!(
            !table
                .iter()
                .any(|row| row.flow.substance == "Peat" && row.sub_compartment == "in ground")
        );
    }

    #[test]
    fn zero_policy_fixes_groundwater_ecotox() {
        let (table, _) = apply_rules(baseline(), &RuleTable::standard(), &Geography::standard());
        let groundwater = table
            .iter()
            .find(|row| row.flow.substance == "Zinc" && row.sub_compartment == "groundwater")
            .unwrap();
        assert_eq!(groundwater.cf_value, 0.0);
        let river = table
            .iter()
            .find(|row| row.flow.substance == "Zinc" && row.sub_compartment == "river")
            .unwrap();
        assert_eq!(river.cf_value, 5.0);
    }

    #[test]
    fn existing_values_take_precedence() {
        let explicit = in_sub(
            cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc"), 0.7),
            Compartment::Water,
            "groundwater",
        );
        let table = baseline().concat(vec![explicit]);
        let (table, report) = apply_rules(table, &RuleTable::standard(), &Geography::standard());
        let groundwater = table
            .iter()
            .find(|row| row.flow.substance == "Zinc" && row.sub_compartment == "groundwater")
            .unwrap();
        assert_eq!(groundwater.cf_value, 0.7);
        assert!(report.kept_existing >= 1);
        assert_eq!(table.conflicts(), 0);
    }

    #[test]
    fn term_split_sums_into_long_term() {
        let (table, _) = apply_rules(baseline(), &RuleTable::standard(), &Geography::standard());
        let long = table
            .iter()
            .find(|row| {
                row.impact_category == "Climate change, human health, long term"
                    && row.sub_compartment == "low. pop., long-term"
            })
            .unwrap();
        assert_eq!(long.cf_value, 5.0);
        let short = table
            .iter()
            .find(|row| {
                row.impact_category == "Climate change, human health, short term"
                    && row.sub_compartment == "low. pop., long-term"
            })
            .unwrap();
        assert_eq!(short.cf_value, 0.0);
    }

    #[test]
    fn saline_flows_are_zero_clones() {
        let (table, _) = apply_rules(baseline(), &RuleTable::standard(), &Geography::standard());
        let saline: Vec<_> = table
            .iter()
            .filter(|row| row.flow.substance == "Water, salt, ocean")
            .collect();
        assert!(!saline.is_empty());
        assert!(saline.iter().all(|row| row.cf_value == 0.0));
        assert!(saline.iter().all(|row| row.resolution == Resolution::Global));
        assert!(
            saline
                .iter()
                .all(|row| row.cas_number.as_deref() == Some("7732-18-5"))
        );
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let rules = RuleTable::standard();
        let geo = Geography::standard();
        let (once, _) = apply_rules(baseline(), &rules, &geo);
        let (twice, _) = apply_rules(once.clone(), &rules, &geo);
        assert_eq!(sorted(&once), sorted(&twice));
        assert_eq!(once.len(), twice.len());
    }
}
