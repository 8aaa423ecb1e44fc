use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::aggregate::{FactorRow, GroupKey};
use crate::domain::{Compartment, Resolution, Tier};
use crate::error::HarmonizeError;
use crate::model::{CfTable, CharacterizationFactor};

/// One row of a target projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedFactor {
    pub impact_category: String,
    pub cf_unit: String,
    pub compartment: String,
    pub sub_compartment: String,
    pub flow_name: String,
    pub flow_unit: String,
    pub cas_number: Option<String>,
    pub cf_value: f64,
    pub tier: Tier,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FactorRow for LinkedFactor {
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
            compartment: self.compartment.clone(),
            sub_compartment: self.sub_compartment.clone(),
            flow: self.flow_name.clone(),
            flow_unit: self.flow_unit.clone(),
            external_id: self.external_id.clone(),
            location: self.location.clone(),
        }
    }

    fn renamed(&self, impact_category: &str) -> Self {
        LinkedFactor {
            impact_category: impact_category.to_string(),
            ..self.clone()
        }
    }

    fn aggregated(&self, impact_category: &str, cf_unit: &str, cf_value: f64) -> Self {
        LinkedFactor {
            impact_category: impact_category.to_string(),
            cf_unit: cf_unit.to_string(),
            cf_value,
            tier: Tier::Damage,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LinkKey {
    impact_category: String,
    cf_unit: String,
    compartment: String,
    sub_compartment: String,
    flow_name: String,
    location: Option<String>,
}

impl LinkKey {
    fn of(row: &LinkedFactor) -> Self {
        Self {
            impact_category: row.impact_category.clone(),
            cf_unit: row.cf_unit.clone(),
            compartment: row.compartment.clone(),
            sub_compartment: row.sub_compartment.clone(),
            flow_name: row.flow_name.clone(),
            location: row.location.clone(),
        }
    }
}

/// Linked rows with at most one row per (category, unit, compartment, sub-compartment, name, location).
#[derive(Debug, Default)]
struct LinkedTable {
    rows: Vec<LinkedFactor>,
    index: HashMap<LinkKey, usize>,
}

impl LinkedTable {
    fn push_if_absent(&mut self, row: LinkedFactor) -> bool {
        let key = LinkKey::of(&row);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
        true
    }

    fn retain(self, keep: impl FnMut(&LinkedFactor) -> bool) -> Self {
        let mut table = Self::default();
        for row in self.rows.into_iter().filter(keep) {
            table.push_if_absent(row);
        }
        table
    }

    fn rows(&self) -> &[LinkedFactor] {
        &self.rows
    }
}

/// `(canonical_name, target_name, target_system)`; several rows per canonical name make a 1:N mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRule {
    pub canonical: String,
    pub target: String,
    pub target_system: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LocationMode {
    /// Only unregionalized flows are linked.
    #[default]
    Stripped,
    /// The region code stays part of the flow name, e.g. "Ammonia, FR".
    Embedded,
    /// Regional variants of spatializable substances carry a location attribute.
    Attribute { spatializable: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exclusion {
    pub flow_contains: String,
    #[serde(default)]
    pub except_categories: Vec<String>,
    #[serde(default)]
    pub except_compartments: Vec<String>,
    #[serde(default)]
    pub except_flow_contains: Vec<String>,
}

impl Exclusion {
    fn excludes(&self, row: &LinkedFactor) -> bool {
        row.flow_name.contains(&self.flow_contains)
            && !self.except_categories.contains(&row.impact_category)
            && !self.except_compartments.contains(&row.compartment)
            && !self
                .except_flow_contains
                .iter()
                .any(|needle| row.flow_name.contains(needle))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubcompartmentClone {
    pub compartment: String,
    pub from: String,
    pub to: String,
}

/// A target flow expressed in another unit than its source, e.g. "Gas, natural/kg" from
/// "Gas, natural/m3" divided by the density.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedFlow {
    pub name: String,
    pub from: String,
    #[serde(default = "default_derived_unit")]
    pub unit: String,
    pub divisor: f64,
}

fn default_derived_unit() -> String {
    "kg".to_string()
}

/// Flows whose factor is their energy content, read from the name ("Coal, 18 MJ per kg").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyContent {
    pub pattern: String,
    pub impact_category: String,
    pub cf_unit: String,
    pub compartment: String,
    pub sub_compartments: Vec<String>,
    pub flow_unit: String,
    pub exclude_contains: Vec<String>,
    pub names: Vec<String>,
}

impl Default for EnergyContent {
    fn default() -> Self {
        Self {
            pattern: r"(\d+(?:\.\d+)?)\s*MJ".to_string(),
            impact_category: "Fossil and nuclear energy use".to_string(),
            cf_unit: "MJ deprived".to_string(),
            compartment: "Raw".to_string(),
            sub_compartments: vec!["in ground".to_string(), "(unspecified)".to_string()],
            flow_unit: "kg".to_string(),
            exclude_contains: vec!["Wood".to_string()],
            names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub compartment: String,
    pub sub_compartment: String,
    pub unit: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyOptions {
    pub location: LocationMode,
    pub passthrough_unmapped: bool,
    pub exclusions: Vec<Exclusion>,
    pub compartments: BTreeMap<Compartment, String>,
    pub sub_compartments: BTreeMap<String, String>,
    pub drop_sub_compartments: Vec<String>,
    pub sub_compartment_clones: Vec<SubcompartmentClone>,
    pub unit_conversions: Vec<UnitConversion>,
    pub derived_flows: Vec<DerivedFlow>,
    pub energy_content: Option<EnergyContent>,
    pub catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Clone)]
pub struct TargetVocabulary {
    pub name: String,
    pub options: VocabularyOptions,
    crosswalk: BTreeMap<String, Vec<String>>,
    rank: HashMap<(String, String), usize>,
    energy_pattern: Option<Regex>,
}

impl TargetVocabulary {
    pub fn new(
        name: impl Into<String>,
        rules: Vec<MappingRule>,
        options: VocabularyOptions,
    ) -> Result<Self, HarmonizeError> {
        let name = name.into();
        let mut crosswalk: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut rank = HashMap::new();
        for (position, rule) in rules.into_iter().enumerate() {
            if rule.target_system != name {
                return Err(HarmonizeError::InvalidMapping(format!(
                    "{} => {} belongs to `{}`, not `{name}`",
                    rule.canonical, rule.target, rule.target_system
                )));
            }
            rank.entry((rule.canonical.clone(), rule.target.clone()))
                .or_insert(position);
            let targets = crosswalk.entry(rule.canonical).or_default();
            if !targets.contains(&rule.target) {
                targets.push(rule.target);
            }
        }
        let energy_pattern = options
            .energy_content
            .as_ref()
            .map(|energy| {
                Regex::new(&energy.pattern)
                    .map_err(|err| HarmonizeError::ConfigParse(err.to_string()))
            })
            .transpose()?;
        Ok(Self {
            name,
            options,
            crosswalk,
            rank,
            energy_pattern,
        })
    }

    pub fn targets(&self, canonical: &str) -> Option<&[String]> {
        self.crosswalk.get(canonical).map(Vec::as_slice)
    }

    pub fn mapping_count(&self) -> usize {
        self.crosswalk.values().map(Vec::len).sum()
    }

    /// Position of `canonical => target` in the declared crosswalk; passthrough names rank last.
    fn rank(&self, canonical: &str, target: &str) -> usize {
        self.rank
            .get(&(canonical.to_string(), target.to_string()))
            .copied()
            .unwrap_or(usize::MAX)
    }

    fn compartment_name(&self, compartment: Compartment) -> String {
        self.options
            .compartments
            .get(&compartment)
            .cloned()
            .unwrap_or_else(|| compartment.as_str().to_string())
    }

    fn sub_compartment_name(&self, sub_compartment: &str) -> Option<String> {
        if self
            .options
            .drop_sub_compartments
            .iter()
            .any(|dropped| dropped == sub_compartment)
        {
            return None;
        }
        if self.options.sub_compartments.is_empty() {
            return Some(sub_compartment.to_string());
        }
        self.options.sub_compartments.get(sub_compartment).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkReport {
    pub input: usize,
    pub regional_dropped: usize,
    pub vocabulary_miss: usize,
    pub unmapped: usize,
    pub duplicated: usize,
    pub collapsed: usize,
    pub excluded: usize,
    pub cloned: usize,
    pub converted: usize,
    pub derived: usize,
    pub energy_content: usize,
    pub catalog_miss: usize,
    pub output: usize,
}

/// Projects a canonical table onto one target vocabulary. Rows that cannot be linked are
/// dropped and counted, never raised.
pub fn link(table: &CfTable, vocabulary: &TargetVocabulary) -> (Vec<LinkedFactor>, LinkReport) {
    let mut report = LinkReport {
        input: table.len(),
        ..LinkReport::default()
    };

    let linked = crosswalk(table, vocabulary, &mut report);

    let before = linked.rows().len();
    let mut linked = linked.retain(|row| {
        !vocabulary
            .options
            .exclusions
            .iter()
            .any(|exclusion| exclusion.excludes(row))
    });
    report.excluded = before - linked.rows().len();

    for clone in &vocabulary.options.sub_compartment_clones {
        let clones: Vec<LinkedFactor> = linked
            .rows()
            .iter()
            .filter(|row| row.compartment == clone.compartment && row.sub_compartment == clone.from)
            .map(|row| LinkedFactor {
                sub_compartment: clone.to.clone(),
                ..row.clone()
            })
            .collect();
        for row in clones {
            if linked.push_if_absent(row) {
                report.cloned += 1;
            }
        }
    }

    for row in linked.rows.iter_mut() {
        if let Some(conversion) = vocabulary
            .options
            .unit_conversions
            .iter()
            .find(|conversion| conversion.from == row.flow_unit)
        {
            row.flow_unit = conversion.to.clone();
            row.cf_value *= conversion.factor;
            report.converted += 1;
        }
    }

    for derived in &vocabulary.options.derived_flows {
        let rows: Vec<LinkedFactor> = linked
            .rows()
            .iter()
            .filter(|row| row.flow_name == derived.from)
            .map(|row| LinkedFactor {
                flow_name: derived.name.clone(),
                flow_unit: derived.unit.clone(),
                cf_value: row.cf_value / derived.divisor,
                ..row.clone()
            })
            .collect();
        for row in rows {
            if linked.push_if_absent(row) {
                report.derived += 1;
            }
        }
    }

    if let (Some(energy), Some(pattern)) = (
        vocabulary.options.energy_content.as_ref(),
        vocabulary.energy_pattern.as_ref(),
    ) {
        for row in energy_rows(vocabulary, energy, pattern) {
            if linked.push_if_absent(row) {
                report.energy_content += 1;
            }
        }
    }

    let rows = if vocabulary.options.catalog.is_empty() {
        linked.rows
    } else {
        attach_catalog_ids(linked.rows, &vocabulary.options.catalog, &mut report)
    };

    report.output = rows.len();
    tracing::info!(
        target_vocabulary = %vocabulary.name,
        input = report.input,
        output = report.output,
        unmapped = report.unmapped,
        catalog_miss = report.catalog_miss,
        "linked target vocabulary"
    );
    (rows, report)
}

/// Location handling, vocabulary mapping and the substance crosswalk.
///
/// When several canonical names land on the same target row, the source whose name
/// equals the target name wins, then the entry declared first in the crosswalk.
fn crosswalk(
    table: &CfTable,
    vocabulary: &TargetVocabulary,
    report: &mut LinkReport,
) -> LinkedTable {
    let mut candidates: HashMap<LinkKey, ((u8, usize), usize)> = HashMap::new();
    let mut rows: Vec<Option<LinkedFactor>> = Vec::new();

    for row in table.iter() {
        let location = match (&vocabulary.options.location, row.flow.region()) {
            (_, None) => None,
            (LocationMode::Stripped, Some(_)) => {
                report.regional_dropped += 1;
                continue;
            }
            (LocationMode::Embedded, Some(_)) => None,
            (LocationMode::Attribute { spatializable }, Some(region)) => {
                if !spatializable.contains(&row.flow.substance) {
                    report.regional_dropped += 1;
                    continue;
                }
                Some(region.to_string())
            }
        };

        let Some(sub_compartment) = vocabulary.sub_compartment_name(&row.sub_compartment) else {
            report.vocabulary_miss += 1;
            continue;
        };

        let passthrough_names;
        let targets = match vocabulary.targets(&row.flow.substance) {
            Some(targets) => targets,
            None if vocabulary.options.passthrough_unmapped => {
                passthrough_names = [row.flow.substance.clone()];
                &passthrough_names[..]
            }
            None => {
                report.unmapped += 1;
                tracing::debug!(
                    target_vocabulary = %vocabulary.name,
                    flow = %row.flow.substance,
                    "no crosswalk entry"
                );
                continue;
            }
        };
        report.duplicated += targets.len().saturating_sub(1);

        for target in targets {
            let flow_name = match (&vocabulary.options.location, row.flow.region()) {
                (LocationMode::Embedded, Some(region)) => format!("{target}, {region}"),
                _ => target.clone(),
            };
            let linked = linked_row(row, vocabulary, &sub_compartment, flow_name, location.clone());
            let priority = (
                u8::from(*target != row.flow.substance),
                vocabulary.rank(&row.flow.substance, target),
            );
            let key = LinkKey::of(&linked);
            match candidates.get(&key) {
                Some(&(existing, position)) => {
                    report.collapsed += 1;
                    if priority < existing {
                        rows[position] = Some(linked);
                        candidates.insert(key, (priority, position));
                    }
                }
                None => {
                    candidates.insert(key, (priority, rows.len()));
                    rows.push(Some(linked));
                }
            }
        }
    }
    let mut linked = LinkedTable::default();
    for row in rows.into_iter().flatten() {
        linked.push_if_absent(row);
    }
    linked
}

fn linked_row(
    row: &CharacterizationFactor,
    vocabulary: &TargetVocabulary,
    sub_compartment: &str,
    flow_name: String,
    location: Option<String>,
) -> LinkedFactor {
    LinkedFactor {
        impact_category: row.impact_category.clone(),
        cf_unit: row.cf_unit.clone(),
        compartment: vocabulary.compartment_name(row.compartment),
        sub_compartment: sub_compartment.to_string(),
        flow_name,
        flow_unit: row.elem_flow_unit.clone(),
        cas_number: row.cas_number.clone(),
        cf_value: row.cf_value,
        tier: row.tier,
        resolution: row.resolution,
        external_id: None,
        location,
    }
}

fn energy_rows(
    vocabulary: &TargetVocabulary,
    energy: &EnergyContent,
    pattern: &Regex,
) -> Vec<LinkedFactor> {
    let mut names: Vec<&str> = energy.names.iter().map(String::as_str).collect();
    names.extend(vocabulary.crosswalk.values().flatten().map(String::as_str));
    names.extend(vocabulary.options.catalog.iter().map(|entry| entry.name.as_str()));
    names.sort_unstable();
    names.dedup();

    let mut rows = Vec::new();
    for name in names {
        if energy
            .exclude_contains
            .iter()
            .any(|needle| name.contains(needle.as_str()))
        {
            continue;
        }
        let Some(value) = pattern
            .captures(name)
            .and_then(|captures| captures.get(1))
            .and_then(|content| content.as_str().parse::<f64>().ok())
        else {
            continue;
        };
        for sub_compartment in &energy.sub_compartments {
            rows.push(LinkedFactor {
                impact_category: energy.impact_category.clone(),
                cf_unit: energy.cf_unit.clone(),
                compartment: energy.compartment.clone(),
                sub_compartment: sub_compartment.clone(),
                flow_name: name.to_string(),
                flow_unit: energy.flow_unit.clone(),
                cas_number: None,
                cf_value: value,
                tier: Tier::Midpoint,
                resolution: Resolution::Global,
                external_id: None,
                location: None,
            });
        }
    }
    rows
}

fn attach_catalog_ids(
    rows: Vec<LinkedFactor>,
    catalog: &[CatalogEntry],
    report: &mut LinkReport,
) -> Vec<LinkedFactor> {
    let ids: HashMap<(&str, &str, &str, &str), &str> = catalog
        .iter()
        .map(|entry| {
            (
                (
                    entry.name.as_str(),
                    entry.compartment.as_str(),
                    entry.sub_compartment.as_str(),
                    entry.unit.as_str(),
                ),
                entry.id.as_str(),
            )
        })
        .collect();

    let mut kept = Vec::with_capacity(rows.len());
    for mut row in rows {
        let key = (
            row.flow_name.as_str(),
            row.compartment.as_str(),
            row.sub_compartment.as_str(),
            row.flow_unit.as_str(),
        );
        match ids.get(&key) {
            Some(id) => {
                row.external_id = Some(id.to_string());
                kept.push(row);
            }
            None => report.catalog_miss += 1,
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowName;
    use crate::model::fixtures::cf;

    fn rule(canonical: &str, target: &str) -> MappingRule {
        MappingRule {
            canonical: canonical.to_string(),
            target: target.to_string(),
            target_system: "ecoinvent".to_string(),
        }
    }

    fn vocabulary(rules: Vec<MappingRule>, options: VocabularyOptions) -> TargetVocabulary {
        TargetVocabulary::new("ecoinvent", rules, options).unwrap()
    }

    fn table(rows: Vec<CharacterizationFactor>) -> CfTable {
        rows.into_iter().collect()
    }

    #[test]
    fn one_to_many_duplicates_rows() {
        let vocab = vocabulary(
            vec![rule("Zinc", "Zinc II"), rule("Zinc", "Zinc, ion")],
            VocabularyOptions::default(),
        );
        let (rows, report) = link(
            &table(vec![cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc"), 4.0)]),
            &vocab,
        );
        let names: Vec<&str> = rows.iter().map(|row| row.flow_name.as_str()).collect();
        assert_eq!(names, vec!["Zinc II", "Zinc, ion"]);
        assert!(rows.iter().all(|row| row.cf_value == 4.0));
        assert_eq!(report.duplicated, 1);
    }

    #[test]
    fn many_to_one_prefers_identical_name() {
        let vocab = vocabulary(
            vec![rule("Zinc, ion", "Zinc"), rule("Zinc", "Zinc")],
            VocabularyOptions::default(),
        );
        let (rows, report) = link(
            &table(vec![
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc, ion"), 1.0),
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc"), 4.0),
            ]),
            &vocab,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cf_value, 4.0);
        assert_eq!(report.collapsed, 1);
    }

    #[test]
    fn many_to_one_follows_crosswalk_order() {
        let vocab = vocabulary(
            vec![rule("Zinc(II)", "Zinc II"), rule("Zinc, ion", "Zinc II")],
            VocabularyOptions::default(),
        );
        let (rows, report) = link(
            &table(vec![
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc, ion"), 1.0),
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc(II)"), 4.0),
            ]),
            &vocab,
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].flow_name, "Zinc II");
        assert_eq!(rows[0].cf_value, 4.0);
        assert_eq!(report.collapsed, 1);

        let reversed = vocabulary(
            vec![rule("Zinc, ion", "Zinc II"), rule("Zinc(II)", "Zinc II")],
            VocabularyOptions::default(),
        );
        let (rows, _) = link(
            &table(vec![
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc(II)"), 4.0),
                cf("Freshwater ecotoxicity", "CTUe", FlowName::plain("Zinc, ion"), 1.0),
            ]),
            &reversed,
        );
        assert_eq!(rows[0].cf_value, 1.0);
    }

    #[test]
    fn unmapped_rows_are_counted_not_raised() {
        let vocab = vocabulary(vec![rule("Zinc", "Zinc II")], VocabularyOptions::default());
        let (rows, report) = link(
            &table(vec![cf("Acid", "kg", FlowName::plain("Unobtainium"), 1.0)]),
            &vocab,
        );
        assert!(rows.is_empty());
        assert_eq!(report.unmapped, 1);

        let passthrough = vocabulary(
            Vec::new(),
            VocabularyOptions {
                passthrough_unmapped: true,
                ..VocabularyOptions::default()
            },
        );
        let (rows, _) = link(
            &table(vec![cf("Acid", "kg", FlowName::plain("Unobtainium"), 1.0)]),
            &passthrough,
        );
        assert_eq!(rows[0].flow_name, "Unobtainium");
    }

    #[test]
    fn location_modes() {
        let source = table(vec![
            cf("Acid", "kg SO2 eq", FlowName::regional("Ammonia", "FR"), 1.2),
            cf("Acid", "kg SO2 eq", FlowName::plain("Ammonia"), 1.0),
        ]);
        let rules = || vec![rule("Ammonia", "Ammonia")];

        let (stripped, report) = link(&source, &vocabulary(rules(), VocabularyOptions::default()));
        assert_eq!(stripped.len(), 1);
        assert_eq!(report.regional_dropped, 1);

        let embedded = VocabularyOptions {
            location: LocationMode::Embedded,
            ..VocabularyOptions::default()
        };
        let (rows, _) = link(&source, &vocabulary(rules(), embedded));
        assert!(rows.iter().any(|row| row.flow_name == "Ammonia, FR"));

        let attribute = VocabularyOptions {
            location: LocationMode::Attribute {
                spatializable: vec!["Ammonia".to_string()],
            },
            ..VocabularyOptions::default()
        };
        let (rows, _) = link(&source, &vocabulary(rules(), attribute));
        let fr = rows
            .iter()
            .find(|row| row.location.as_deref() == Some("FR"))
            .unwrap();
        assert_eq!(fr.flow_name, "Ammonia");
        assert_eq!(fr.cf_value, 1.2);
    }

    #[test]
    fn vocabulary_units_and_catalog() {
        let mut options = VocabularyOptions {
            compartments: [(Compartment::Air, "air".to_string())].into_iter().collect(),
            sub_compartments: [
                ("(unspecified)".to_string(), "unspecified".to_string()),
                ("groundwater".to_string(), "ground water".to_string()),
            ]
            .into_iter()
            .collect(),
            unit_conversions: vec![UnitConversion {
                from: "Bq".to_string(),
                to: "kBq".to_string(),
                factor: 1000.0,
            }],
            catalog: vec![CatalogEntry {
                name: "Radon-222".to_string(),
                compartment: "air".to_string(),
                sub_compartment: "unspecified".to_string(),
                unit: "kBq".to_string(),
                id: "a1b2".to_string(),
            }],
            ..VocabularyOptions::default()
        };
        options.exclusions.push(Exclusion {
            flow_contains: ", ion".to_string(),
            except_categories: Vec::new(),
            except_compartments: vec!["water".to_string()],
            except_flow_contains: Vec::new(),
        });

        let mut radon = cf("Ionizing radiations", "Bq C-14 eq", FlowName::plain("Radon-222"), 0.25);
        radon.elem_flow_unit = "Bq".to_string();
        let mut high_pop = radon.clone();
        high_pop.sub_compartment = "high. pop.".to_string();
        let ion = cf("Acid", "kg", FlowName::plain("Ammonium, ion"), 1.0);

        let vocab = vocabulary(
            vec![rule("Radon-222", "Radon-222"), rule("Ammonium, ion", "Ammonium, ion")],
            options,
        );
        let (rows, report) = link(&table(vec![radon, high_pop, ion]), &vocab);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].external_id.as_deref(), Some("a1b2"));
        assert_eq!(rows[0].flow_unit, "kBq");
        assert_eq!(rows[0].cf_value, 250.0);
        assert_eq!(report.vocabulary_miss, 1);
        assert_eq!(report.excluded, 1);
    }

    #[test]
    fn derived_and_energy_content_flows() {
        let options = VocabularyOptions {
            derived_flows: vec![DerivedFlow {
                name: "Gas, natural/kg".to_string(),
                from: "Gas, natural/m3".to_string(),
                unit: "kg".to_string(),
                divisor: 0.5,
            }],
            energy_content: Some(EnergyContent::default()),
            ..VocabularyOptions::default()
        };
        let vocab = vocabulary(
            vec![
                rule("Gas, natural", "Gas, natural/m3"),
                rule("Coal, hard", "Coal, 18 MJ per kg"),
                rule("Wood", "Wood, 14.7 MJ per kg"),
            ],
            options,
        );
        let mut gas = cf(
            "Fossil and nuclear energy use",
            "MJ deprived",
            FlowName::plain("Gas, natural"),
            40.0,
        );
        gas.elem_flow_unit = "m3".to_string();
        let (rows, report) = link(&table(vec![gas]), &vocab);

        let per_kg = rows
            .iter()
            .find(|row| row.flow_name == "Gas, natural/kg")
            .unwrap();
        assert_eq!(per_kg.cf_value, 80.0);
        assert_eq!(per_kg.flow_unit, "kg");

        let coal: Vec<_> = rows
            .iter()
            .filter(|row| row.flow_name == "Coal, 18 MJ per kg")
            .collect();
        assert_eq!(coal.len(), 2);
        assert!(coal.iter().all(|row| row.cf_value == 18.0));
        assert!(!rows.iter().any(|row| row.flow_name.starts_with("Wood")));
        assert_eq!(report.energy_content, 2);
    }

    #[test]
    fn foreign_mapping_rows_are_rejected() {
        let mut foreign = rule("Zinc", "Zinc II");
        foreign.target_system = "simapro".to_string();
        let err = TargetVocabulary::new("ecoinvent", vec![foreign], VocabularyOptions::default())
            .unwrap_err();
        assert!(matches!(err, HarmonizeError::InvalidMapping(_)));
    }
}
