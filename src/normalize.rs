use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Compartment, Resolution, Tier, UNSPECIFIED};
use crate::error::HarmonizeError;
use crate::geo::{GLOBAL, Geography};
use crate::model::{CfTable, CharacterizationFactor, FlowName};
use crate::source::{
    FamilySchema, RawRow, SourceFamily, SourceSnapshot, StoichiometricRatio, SubstanceAlias,
};

pub const IMPACT_CATEGORY: &str = "Impact category";
pub const CF_UNIT: &str = "CF unit";
pub const COMPARTMENT: &str = "Compartment";
pub const SUB_COMPARTMENT: &str = "Sub-compartment";
pub const ELEM_FLOW_NAME: &str = "Elem flow name";
pub const ELEM_FLOW_UNIT: &str = "Elem flow unit";
pub const CAS_NUMBER: &str = "CAS number";
pub const CF_VALUE: &str = "CF value";
pub const MP_OR_DAMAGE: &str = "MP or Damage";
pub const RESOLUTION: &str = "Native geographical resolution scale";

const ELEM_FLOW: &str = "Elem flow";
const REGION_CODE: &str = "Region code";
const MIDPOINT_UNIT: &str = "Midpoint CF unit";
const DAMAGE_UNIT: &str = "Damage CF unit";

const NAME: &str = "Name";
const GWP_100: &str = "GWP-100";
const GTP_100: &str = "GTP-100";
const AGWP_500: &str = "AGWP-500";

const ARCHETYPE: &str = "Archetype 1";
const STACK_HEIGHT: &str = "Archetype 2";
const PRIMARY_PM: &str = "Primary PM2.5";
const EMISSION_AVERAGE: &str = ", em. av.";

/// Population archetypes and the sub-compartment each one becomes.
const PM_ARCHETYPES: [(&str, &str); 4] = [
    ("Urban", "high. pop."),
    ("Rural", "low. pop."),
    ("Remote", "remote"),
    ("Population-weighted average", UNSPECIFIED),
];

const PM_STACK_HEIGHTS: [(&str, &str); 4] = [
    ("High-stack", "high-stack"),
    ("Low-stack", "low-stack"),
    ("Ground-level", "ground-level"),
    ("Emission-weighted average", "em. av."),
];

/// Share of each particulate size class that counts as PM2.5.
const PM_SIZE_SHARES: [(&str, f64); 5] = [
    ("Particulates", 0.6),
    ("Particulates, < 10 um", 0.6),
    ("Particulates, > 10 um", 0.0),
    ("Particulates, > 2.5 um, and < 10um", 0.0),
    ("Particulates, < 2.5 um", 1.0),
];

const PM_PRECURSORS: [(&str, &str, &str); 3] = [
    ("SO2", "Sulfur dioxide", "007446-09-5"),
    ("NH3", "Ammonia", "007664-41-7"),
    ("NOx", "Nitrogen oxides", "011104-93-1"),
];

const ISO2: &str = "ISO2";
const CONTINENT: &str = "Continent";
const WATER_USE: &str = "Water use";
const WATER_FACTORS: [&str; 3] = [
    "FATE - Scarcity",
    "EXP (1 - Adaptation Capacity)",
    "EF country (DALY/m3 deprived)",
];
const WITHDRAWAL_FLOWS: [&str; 5] = [
    "Water, unspecified natural origin",
    "Water, cooling, unspecified natural origin",
    "Water, lake",
    "Water, river",
    "Water, well, in ground",
];
const RETURN_FLOW: &str = "Water";

/// Damage conversion factors applied to the climate metrics family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateFactors {
    pub reference_flow: String,
    pub human_health_100: f64,
    pub human_health_500: f64,
    pub ecosystem_quality_100: f64,
    pub ecosystem_quality_500: f64,
}

impl Default for ClimateFactors {
    fn default() -> Self {
        Self {
            reference_flow: "Carbon dioxide, fossil".to_string(),
            human_health_100: 7.94e-7,
            human_health_500: 3.68e-6,
            ecosystem_quality_100: 0.1765920988,
            ecosystem_quality_500: 0.804779224,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct NormalizeReport {
    pub families: usize,
    pub rows: usize,
    pub stoichiometric: usize,
    pub emission_averages: usize,
}

/// Converts every source family into canonical rows. Any schema mismatch is fatal.
pub fn normalize(
    snapshot: &SourceSnapshot,
    geography: &Geography,
    climate: &ClimateFactors,
) -> Result<(CfTable, NormalizeReport), HarmonizeError> {
    let mut table = CfTable::new();
    let mut report = NormalizeReport::default();

    for family in &snapshot.families {
        let rows = match family.schema {
            FamilySchema::Canonical => canonical_rows(family, geography)?,
            FamilySchema::ClimateMetrics => climate_rows(family, climate)?,
            FamilySchema::Regionalized => {
                let mut rows = regionalized_rows(family, geography)?;
                rows.extend(stoichiometric_rows(
                    family,
                    &rows,
                    &snapshot.stoichiometry,
                ));
                rows
            }
            FamilySchema::Particulates => particulate_rows(family)?,
            FamilySchema::WaterAvailability => water_availability_rows(family, geography)?,
        };
        tracing::debug!(family = %family.name, rows = rows.len(), "normalized family");
        report.families += 1;
        report.rows += rows.len();
        table = table.concat(rows);
    }
    report.stoichiometric = snapshot
        .stoichiometry
        .iter()
        .map(|ratio| {
            table
                .iter()
                .filter(|row| row.flow.substance == ratio.derived)
                .count()
        })
        .sum();

    // Unregionalized emission-weighted averages also stand for the plain flow.
    let averages: Vec<_> = table
        .iter()
        .filter(|row| row.flow.region.is_none())
        .filter_map(|row| {
            row.flow
                .substance
                .strip_suffix(EMISSION_AVERAGE)
                .map(|base| CharacterizationFactor {
                    flow: FlowName::plain(base),
                    ..row.clone()
                })
        })
        .collect();
    for row in averages {
        if table.push_if_absent(row) {
            report.emission_averages += 1;
        }
    }

    Ok((table, report))
}

struct Fields<'a> {
    family: &'a SourceFamily,
    row: &'a RawRow,
    index: usize,
}

impl<'a> Fields<'a> {
    fn new(family: &'a SourceFamily, row: &'a RawRow, index: usize) -> Self {
        Self { family, row, index }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.row
            .get(key)
            .or_else(|| self.family.defaults.get(key))
            .filter(|value| !value.is_null())
    }

    fn error(&self, message: impl Into<String>) -> HarmonizeError {
        HarmonizeError::schema(&self.family.name, self.index, message)
    }

    fn optional_text(&self, key: &str) -> Result<Option<String>, HarmonizeError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(other) => Err(self.error(format!("field `{key}` is not text: {other}"))),
        }
    }

    fn text(&self, key: &str) -> Result<String, HarmonizeError> {
        self.optional_text(key)?
            .ok_or_else(|| self.error(format!("missing field `{key}`")))
    }

    fn number(&self, key: &str) -> Result<f64, HarmonizeError> {
        match self.get(key) {
            Some(Value::Number(number)) => number
                .as_f64()
                .ok_or_else(|| self.error(format!("field `{key}` is not a finite number"))),
            Some(Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .map_err(|err| self.error(format!("field `{key}`: {err}"))),
            Some(other) => Err(self.error(format!("field `{key}` is not numeric: {other}"))),
            None => Err(self.error(format!("missing field `{key}`"))),
        }
    }

    fn compartment(&self) -> Result<Compartment, HarmonizeError> {
        self.text(COMPARTMENT)?
            .parse()
            .map_err(|err: HarmonizeError| self.error(err.to_string()))
    }

    fn tier(&self) -> Result<Tier, HarmonizeError> {
        self.text(MP_OR_DAMAGE)?
            .parse()
            .map_err(|err: HarmonizeError| self.error(err.to_string()))
    }

    fn resolution(&self) -> Result<Option<Resolution>, HarmonizeError> {
        self.optional_text(RESOLUTION)?
            .map(|value| {
                value
                    .parse()
                    .map_err(|err: HarmonizeError| self.error(err.to_string()))
            })
            .transpose()
    }

    fn cf_unit(&self, tier: Tier) -> Result<String, HarmonizeError> {
        match self.optional_text(CF_UNIT)? {
            Some(unit) => Ok(unit),
            None => self.text(match tier {
                Tier::Midpoint => MIDPOINT_UNIT,
                Tier::Damage => DAMAGE_UNIT,
            }),
        }
    }

    fn sub_compartment(&self) -> Result<String, HarmonizeError> {
        Ok(self
            .optional_text(SUB_COMPARTMENT)?
            .unwrap_or_else(|| UNSPECIFIED.to_string()))
    }
}

fn resolution_of(flow: &FlowName, geography: &Geography) -> Resolution {
    flow.region()
        .map(|code| geography.classify(code))
        .unwrap_or(Resolution::Global)
}

fn canonical_rows(
    family: &SourceFamily,
    geography: &Geography,
) -> Result<Vec<CharacterizationFactor>, HarmonizeError> {
    family
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let fields = Fields::new(family, row, index);
            let flow = FlowName::parse(&fields.text(ELEM_FLOW_NAME)?, geography);
            let resolution = match fields.resolution()? {
                Some(resolution) => resolution,
                None => resolution_of(&flow, geography),
            };
            Ok(CharacterizationFactor {
                impact_category: fields.text(IMPACT_CATEGORY)?,
                cf_unit: fields.text(CF_UNIT)?,
                compartment: fields.compartment()?,
                sub_compartment: fields.sub_compartment()?,
                flow,
                elem_flow_unit: fields.text(ELEM_FLOW_UNIT)?,
                cas_number: fields.optional_text(CAS_NUMBER)?,
                cf_value: fields.number(CF_VALUE)?,
                tier: fields.tier()?,
                resolution,
            })
        })
        .collect()
}

struct Metrics {
    name: String,
    cas: Option<String>,
    gwp_100: f64,
    gtp_100: f64,
    agwp_500: f64,
}

fn climate_rows(
    family: &SourceFamily,
    factors: &ClimateFactors,
) -> Result<Vec<CharacterizationFactor>, HarmonizeError> {
    let metrics = family
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let fields = Fields::new(family, row, index);
            let raw_name = fields.text(NAME)?;
            let alias = find_alias(&family.aliases, &raw_name);
            Ok(Metrics {
                name: alias.map(|a| a.name.clone()).unwrap_or(raw_name),
                cas: match fields.optional_text(CAS_NUMBER)? {
                    Some(cas) => Some(cas),
                    None => alias.and_then(|a| a.cas.clone()),
                },
                gwp_100: fields.number(GWP_100)?,
                gtp_100: fields.number(GTP_100)?,
                agwp_500: fields.number(AGWP_500)?,
            })
        })
        .collect::<Result<Vec<_>, HarmonizeError>>()?;

    let reference = metrics
        .iter()
        .find(|m| m.name == factors.reference_flow)
        .map(|m| m.agwp_500)
        .filter(|value| *value != 0.0)
        .ok_or_else(|| HarmonizeError::MissingReferenceFlow {
            family: family.name.clone(),
            flow: factors.reference_flow.clone(),
        })?;

    let mut rows = Vec::with_capacity(metrics.len() * 6);
    for m in &metrics {
        let hh_short = m.gwp_100 * factors.human_health_100;
        let eq_short = m.gwp_100 * factors.ecosystem_quality_100;
        let ratio_500 = m.agwp_500 / reference;
        let derived = [
            ("Climate change, short term", "kg CO2 eq (short)", Tier::Midpoint, m.gwp_100),
            ("Climate change, long term", "kg CO2 eq (long)", Tier::Midpoint, m.gtp_100),
            ("Climate change, human health, short term", "DALY", Tier::Damage, hh_short),
            (
                "Climate change, human health, long term",
                "DALY",
                Tier::Damage,
                ratio_500 * factors.human_health_500 - hh_short,
            ),
            (
                "Climate change, ecosystem quality, short term",
                "PDF.m2.yr",
                Tier::Damage,
                eq_short,
            ),
            (
                "Climate change, ecosystem quality, long term",
                "PDF.m2.yr",
                Tier::Damage,
                ratio_500 * factors.ecosystem_quality_500 - eq_short,
            ),
        ];
        for (category, unit, tier, value) in derived {
            rows.push(CharacterizationFactor {
                impact_category: category.to_string(),
                cf_unit: unit.to_string(),
                compartment: Compartment::Air,
                sub_compartment: UNSPECIFIED.to_string(),
                flow: FlowName::plain(m.name.clone()),
                elem_flow_unit: "kg".to_string(),
                cas_number: m.cas.clone(),
                cf_value: value,
                tier,
                resolution: Resolution::Global,
            });
        }
    }
    Ok(rows)
}

fn regionalized_rows(
    family: &SourceFamily,
    geography: &Geography,
) -> Result<Vec<CharacterizationFactor>, HarmonizeError> {
    family
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let fields = Fields::new(family, row, index);
            let raw_name = fields.text(ELEM_FLOW)?;
            let alias = find_alias(&family.aliases, &raw_name);
            let region = geography.canonical_code(&fields.text(REGION_CODE)?).to_string();
            let tier = fields.tier()?;
            let cf_unit = fields.cf_unit(tier)?;
            let resolution = match fields.resolution()? {
                Some(resolution) => resolution,
                None => geography.classify(&region),
            };
            Ok(CharacterizationFactor {
                impact_category: fields.text(IMPACT_CATEGORY)?,
                cf_unit,
                compartment: fields.compartment()?,
                sub_compartment: fields.sub_compartment()?,
                flow: FlowName::regional(
                    alias.map(|a| a.name.clone()).unwrap_or(raw_name),
                    region,
                ),
                elem_flow_unit: fields.text(ELEM_FLOW_UNIT)?,
                cas_number: match fields.optional_text(CAS_NUMBER)? {
                    Some(cas) => Some(cas),
                    None => alias.and_then(|a| a.cas.clone()),
                },
                cf_value: fields.number(CF_VALUE)?,
                tier,
                resolution,
            })
        })
        .collect()
}

fn incomplete(family: &SourceFamily, message: String) -> HarmonizeError {
    HarmonizeError::IncompleteFamily {
        family: family.name.clone(),
        message,
    }
}

type ParticulateKey = (String, String, Option<String>, Tier);

/// Expands primary PM2.5 and precursor factors over every archetype, stack height and size class.
fn particulate_rows(family: &SourceFamily) -> Result<Vec<CharacterizationFactor>, HarmonizeError> {
    let Some(first) = family.rows.first() else {
        return Ok(Vec::new());
    };
    let template = Fields::new(family, first, 0);
    let impact_category = template.text(IMPACT_CATEGORY)?;
    let compartment = template.compartment()?;
    let elem_flow_unit = template.text(ELEM_FLOW_UNIT)?;

    let mut values: BTreeMap<ParticulateKey, f64> = BTreeMap::new();
    let mut units: BTreeMap<Tier, String> = BTreeMap::new();
    for (index, row) in family.rows.iter().enumerate() {
        let fields = Fields::new(family, row, index);
        let tier = fields.tier()?;
        units.insert(tier, fields.cf_unit(tier)?);
        let key = (
            fields.text(ELEM_FLOW)?,
            fields.text(ARCHETYPE)?,
            fields.optional_text(STACK_HEIGHT)?,
            tier,
        );
        values.insert(key, fields.number(CF_VALUE)?);
    }

    let lookup = |flow: &str, archetype: &str, stack: Option<&str>, tier: Tier| {
        let key = (
            flow.to_string(),
            archetype.to_string(),
            stack.map(str::to_string),
            tier,
        );
        values.get(&key).copied().ok_or_else(|| {
            let stack = stack.map(|s| format!(" / {s}")).unwrap_or_default();
            incomplete(family, format!("no {tier} value for {flow} / {archetype}{stack}"))
        })
    };
    let factor = |name: String, cas: Option<&str>, sub: &str, tier: Tier, unit: &str, value: f64| {
        CharacterizationFactor {
            impact_category: impact_category.clone(),
            cf_unit: unit.to_string(),
            compartment,
            sub_compartment: sub.to_string(),
            flow: FlowName::plain(name),
            elem_flow_unit: elem_flow_unit.clone(),
            cas_number: cas.map(str::to_string),
            cf_value: value,
            tier,
            resolution: Resolution::Global,
        }
    };

    let mut rows = Vec::new();
    for (&tier, unit) in &units {
        for (archetype, sub_compartment) in PM_ARCHETYPES {
            for (stack, suffix) in PM_STACK_HEIGHTS {
                let primary = lookup(PRIMARY_PM, archetype, Some(stack), tier)?;
                for (size_class, share) in PM_SIZE_SHARES {
                    let name = format!("{size_class}, {suffix}");
                    let value = primary * share;
                    rows.push(factor(name, None, sub_compartment, tier, unit.as_str(), value));
                }
            }
            for (label, name, cas) in PM_PRECURSORS {
                let value = lookup(label, archetype, None, tier)?;
                let name = name.to_string();
                rows.push(factor(name, Some(cas), sub_compartment, tier, unit.as_str(), value));
            }
        }
    }
    Ok(rows)
}

#[derive(Default)]
struct WaterUse {
    weight: f64,
    weighted: f64,
}

/// Water-use weighted factors per country, continent and `GLO`, with negative return flows.
fn water_availability_rows(
    family: &SourceFamily,
    geography: &Geography,
) -> Result<Vec<CharacterizationFactor>, HarmonizeError> {
    let Some(first) = family.rows.first() else {
        return Ok(Vec::new());
    };
    let template = Fields::new(family, first, 0);
    let impact_category = template.text(IMPACT_CATEGORY)?;
    let tier = template.tier()?;
    let cf_unit = template.cf_unit(tier)?;
    let elem_flow_unit = template.text(ELEM_FLOW_UNIT)?;
    let cas_number = template.optional_text(CAS_NUMBER)?;
    let sub_compartment = template.sub_compartment()?;

    let mut regions: BTreeMap<String, WaterUse> = BTreeMap::new();
    for (index, row) in family.rows.iter().enumerate() {
        let fields = Fields::new(family, row, index);
        let country = geography.canonical_code(&fields.text(ISO2)?).to_string();
        let continent = match fields.optional_text(CONTINENT)? {
            Some(code) => Some(geography.canonical_code(&code).to_string()),
            None => geography.continent_of(&country).map(str::to_string),
        };
        let weight = fields.number(WATER_USE)?;
        let value = match fields.get(CF_VALUE) {
            Some(_) => fields.number(CF_VALUE)?,
            None => WATER_FACTORS
                .iter()
                .map(|key| fields.number(key))
                .product::<Result<f64, HarmonizeError>>()?,
        };
        for code in [Some(country), continent, Some(GLOBAL.to_string())]
            .into_iter()
            .flatten()
        {
            let entry = regions.entry(code).or_default();
            entry.weight += weight;
            entry.weighted += weight * value;
        }
    }

    let mut rows = Vec::with_capacity(regions.len() * (WITHDRAWAL_FLOWS.len() + 1));
    for (region, usage) in &regions {
        if usage.weight == 0.0 {
            return Err(incomplete(family, format!("water use of {region} sums to zero")));
        }
        let value = usage.weighted / usage.weight;
        let withdrawals = WITHDRAWAL_FLOWS
            .iter()
            .map(|name| (*name, Compartment::Raw, value));
        for (name, compartment, cf_value) in
            withdrawals.chain([(RETURN_FLOW, Compartment::Water, -value)])
        {
            rows.push(CharacterizationFactor {
                impact_category: impact_category.clone(),
                cf_unit: cf_unit.clone(),
                compartment,
                sub_compartment: sub_compartment.clone(),
                flow: FlowName::regional(name, region.as_str()),
                elem_flow_unit: elem_flow_unit.clone(),
                cas_number: cas_number.clone(),
                cf_value,
                tier,
                resolution: geography.classify(region),
            });
        }
    }
    Ok(rows)
}

/// Copies proxy substance rows to the derived substance, scaled by the ratio.
fn stoichiometric_rows(
    family: &SourceFamily,
    rows: &[CharacterizationFactor],
    ratios: &[StoichiometricRatio],
) -> Vec<CharacterizationFactor> {
    let mut derived = Vec::new();
    for ratio in ratios {
        let proxy = find_alias(&family.aliases, &ratio.proxy)
            .map(|alias| alias.name.as_str())
            .unwrap_or(ratio.proxy.as_str());
        for row in rows.iter().filter(|row| row.flow.substance == proxy) {
            derived.push(CharacterizationFactor {
                flow: FlowName {
                    substance: ratio.derived.clone(),
                    region: row.flow.region.clone(),
                },
                cas_number: ratio.cas.clone(),
                cf_value: row.cf_value * ratio.ratio,
                ..row.clone()
            });
        }
    }
    derived
}

fn find_alias<'a>(aliases: &'a [SubstanceAlias], source: &str) -> Option<&'a SubstanceAlias> {
    aliases.iter().find(|alias| alias.source == source)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn raw(value: Value) -> RawRow {
        serde_json::from_value(value).unwrap()
    }

    fn family(name: &str, schema: FamilySchema, defaults: Value, rows: Vec<Value>) -> SourceFamily {
        SourceFamily {
            name: name.to_string(),
            schema,
            defaults: raw(defaults),
            aliases: Vec::new(),
            rows: rows.into_iter().map(raw).collect(),
        }
    }

    fn climate_family(rows: Vec<Value>) -> SourceFamily {
        family("Climate change", FamilySchema::ClimateMetrics, json!({}), rows)
    }

    #[test]
    fn canonical_rows_split_region_suffix() {
        let snapshot = SourceSnapshot {
            families: vec![family(
                "Water scarcity",
                FamilySchema::Canonical,
                json!({
                    "Impact category": "Water scarcity",
                    "CF unit": "m3 world-eq",
                    "Compartment": "Raw",
                    "Elem flow unit": "m3",
                    "MP or Damage": "Midpoint"
                }),
                vec![
                    json!({"Elem flow name": "Water, lake, FR", "CF value": 2.5}),
                    json!({"Elem flow name": "Water, lake, GLO", "CF value": "1.5"}),
                ],
            )],
            stoichiometry: Vec::new(),
        };
        let (table, report) =
            normalize(&snapshot, &Geography::standard(), &ClimateFactors::default()).unwrap();
        assert_eq!(report.rows, 2);
        let fr = &table.rows()[0];
        assert_eq!(fr.flow, FlowName::regional("Water, lake", "FR"));
        assert_eq!(fr.resolution, Resolution::Country);
        assert_eq!(fr.sub_compartment, UNSPECIFIED);
        assert_eq!(table.rows()[1].cf_value, 1.5);
        assert_eq!(table.rows()[1].resolution, Resolution::Global);
    }

    #[test]
    fn missing_field_is_fatal() {
        let snapshot = SourceSnapshot {
            families: vec![family(
                "Broken",
                FamilySchema::Canonical,
                json!({}),
                vec![json!({"Elem flow name": "Zinc"})],
            )],
            stoichiometry: Vec::new(),
        };
        let err = normalize(&snapshot, &Geography::standard(), &ClimateFactors::default())
            .unwrap_err();
        assert_matches!(err, HarmonizeError::SourceSchema { row: 0, .. });
    }

    #[test]
    fn climate_metrics_derive_six_categories() {
        let snapshot = SourceSnapshot {
            families: vec![climate_family(vec![
                json!({"Name": "Carbon dioxide, fossil", "GWP-100": 1.0, "GTP-100": 1.0, "AGWP-500": 2.0}),
                json!({"Name": "Methane, fossil", "GWP-100": 30.0, "GTP-100": 5.0, "AGWP-500": 20.0}),
            ])],
            stoichiometry: Vec::new(),
        };
        let factors = ClimateFactors::default();
        let (table, _) = normalize(&snapshot, &Geography::standard(), &factors).unwrap();
        assert_eq!(table.len(), 12);

        let methane_hh_long = table
            .iter()
            .find(|row| {
                row.flow.substance == "Methane, fossil"
                    && row.impact_category == "Climate change, human health, long term"
            })
            .unwrap();
        let expected = 10.0 * 3.68e-6 - 30.0 * 7.94e-7;
        assert!((methane_hh_long.cf_value - expected).abs() < 1e-15);
    }

    #[test]
    fn climate_metrics_require_reference_flow() {
        let snapshot = SourceSnapshot {
            families: vec![climate_family(vec![json!({
                "Name": "Methane, fossil", "GWP-100": 30.0, "GTP-100": 5.0, "AGWP-500": 20.0
            })])],
            stoichiometry: Vec::new(),
        };
        let err = normalize(&snapshot, &Geography::standard(), &ClimateFactors::default())
            .unwrap_err();
        assert_matches!(err, HarmonizeError::MissingReferenceFlow { .. });
    }

    #[test]
    fn regionalized_rows_apply_aliases_and_stoichiometry() {
        let mut acid = family(
            "Terrestrial acidification",
            FamilySchema::Regionalized,
            json!({
                "Impact category": "Terrestrial acidification",
                "Midpoint CF unit": "kg SO2 eq",
                "Damage CF unit": "PDF.m2.yr",
                "Compartment": "Air",
                "Elem flow unit": "kg"
            }),
            vec![
                json!({"Elem flow": "NH3", "Region code": "FR", "CF value": 1.2, "MP or Damage": "Midpoint"}),
                json!({"Elem flow": "NH3", "Region code": "Europe", "CF value": 1.0, "MP or Damage": "Midpoint"}),
            ],
        );
        acid.aliases = vec![SubstanceAlias {
            source: "NH3".to_string(),
            name: "Ammonia".to_string(),
            cas: Some("007664-41-7".to_string()),
        }];
        let snapshot = SourceSnapshot {
            families: vec![acid],
            stoichiometry: vec![StoichiometricRatio {
                proxy: "NH3".to_string(),
                derived: "Ammonium, ion".to_string(),
                cas: None,
                ratio: 0.5,
            }],
        };
        let (table, report) =
            normalize(&snapshot, &Geography::standard(), &ClimateFactors::default()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(report.stoichiometric, 2);

        let rer = table
            .iter()
            .find(|row| row.flow == FlowName::regional("Ammonia", "RER"))
            .unwrap();
        assert_eq!(rer.resolution, Resolution::Continent);
        assert_eq!(rer.cas_number.as_deref(), Some("007664-41-7"));

        let ion = table
            .iter()
            .find(|row| row.flow == FlowName::regional("Ammonium, ion", "FR"))
            .unwrap();
        assert_eq!(ion.cf_value, 0.6);
    }

    fn particulate_family(skip_remote: bool) -> SourceFamily {
        let mut rows = Vec::new();
        for tier in ["Midpoint", "Damage"] {
            for (archetype, base) in [
                ("Urban", 4.0),
                ("Rural", 2.0),
                ("Remote", 1.0),
                ("Population-weighted average", 3.0),
            ] {
                if skip_remote && archetype == "Remote" {
                    continue;
                }
                for (stack, factor) in [
                    ("High-stack", 0.5),
                    ("Low-stack", 0.75),
                    ("Ground-level", 1.0),
                    ("Emission-weighted average", 0.8),
                ] {
                    rows.push(json!({
                        "Elem flow": "Primary PM2.5",
                        "Archetype 1": archetype,
                        "Archetype 2": stack,
                        "MP or Damage": tier,
                        "CF value": base * factor,
                    }));
                }
                for precursor in ["SO2", "NH3", "NOx"] {
                    rows.push(json!({
                        "Elem flow": precursor,
                        "Archetype 1": archetype,
                        "MP or Damage": tier,
                        "CF value": base / 10.0,
                    }));
                }
            }
        }
        family(
            "Particulate matter formation",
            FamilySchema::Particulates,
            json!({
                "Impact category": "Particulate matter formation",
                "Midpoint CF unit": "kg PM2.5 eq",
                "Damage CF unit": "DALY",
                "Compartment": "Air",
                "Elem flow unit": "kg"
            }),
            rows,
        )
    }

    #[test]
    fn particulates_expand_archetypes_and_size_classes() {
        let snapshot = SourceSnapshot {
            families: vec![particulate_family(false)],
            stoichiometry: Vec::new(),
        };
        let (table, report) =
            normalize(&snapshot, &Geography::standard(), &ClimateFactors::default()).unwrap();
        // 4 archetypes x (4 stacks x 5 size classes + 3 precursors) x 2 tiers
        assert_eq!(report.rows, 184);
        assert_eq!(report.emission_averages, 40);
        assert_eq!(table.len(), 224);

        let find = |name: &str, sub: &str, tier: Tier| {
            table
                .iter()
                .find(|row| {
                    row.flow == FlowName::plain(name)
                        && row.sub_compartment == sub
                        && row.tier == tier
                })
                .unwrap()
        };
        let coarse = find("Particulates, < 10 um, high-stack", "high. pop.", Tier::Midpoint);
        assert_eq!(coarse.cf_value, 0.6 * 2.0);
        assert_eq!(coarse.cf_unit, "kg PM2.5 eq");
        assert_eq!(
            find("Particulates, > 10 um, ground-level", "low. pop.", Tier::Midpoint).cf_value,
            0.0
        );
        let average = find("Particulates, < 2.5 um", UNSPECIFIED, Tier::Damage);
        assert_eq!(average.cf_value, 3.0 * 0.8);
        assert_eq!(average.cf_unit, "DALY");

        let ammonia = find("Ammonia", "remote", Tier::Midpoint);
        assert_eq!(ammonia.cf_value, 0.1);
        assert_eq!(ammonia.cas_number.as_deref(), Some("007664-41-7"));
        assert_eq!(ammonia.resolution, Resolution::Global);
    }

    #[test]
    fn particulates_require_every_archetype() {
        let snapshot = SourceSnapshot {
            families: vec![particulate_family(true)],
            stoichiometry: Vec::new(),
        };
        let err = normalize(&snapshot, &Geography::standard(), &ClimateFactors::default())
            .unwrap_err();
        assert_matches!(err, HarmonizeError::IncompleteFamily { ref message, .. } if message.contains("Remote"));
    }

    fn water_family(rows: Vec<Value>) -> SourceFamily {
        family(
            "Water availability, human health",
            FamilySchema::WaterAvailability,
            json!({
                "Impact category": "Water availability, human health",
                "Damage CF unit": "DALY",
                "MP or Damage": "Damage",
                "Elem flow unit": "m3",
                "CAS number": "7732-18-5"
            }),
            rows,
        )
    }

    #[test]
    fn water_availability_weights_by_water_use() {
        let snapshot = SourceSnapshot {
            families: vec![water_family(vec![
                json!({"ISO2": "FR", "Water use": 1.0, "CF value": 2.0}),
                json!({"ISO2": "FR", "Water use": 3.0, "CF value": 6.0}),
                json!({
                    "ISO2": "DE",
                    "Continent": "Europe",
                    "Water use": 1.0,
                    "FATE - Scarcity": 0.5,
                    "EXP (1 - Adaptation Capacity)": 2.0,
                    "EF country (DALY/m3 deprived)": 1.0
                }),
            ])],
            stoichiometry: Vec::new(),
        };
        let (table, report) =
            normalize(&snapshot, &Geography::standard(), &ClimateFactors::default()).unwrap();
        // FR, DE, RER and GLO, each with five withdrawals and one return flow
        assert_eq!(report.rows, 24);

        let find = |flow: FlowName, compartment: Compartment| {
            table
                .iter()
                .find(|row| row.flow == flow && row.compartment == compartment)
                .unwrap()
        };
        let lake = find(FlowName::regional("Water, lake", "FR"), Compartment::Raw);
        assert_eq!(lake.cf_value, 5.0);
        assert_eq!(lake.resolution, Resolution::Country);
        assert_eq!(lake.cas_number.as_deref(), Some("7732-18-5"));
        assert_eq!(find(FlowName::regional("Water", "FR"), Compartment::Water).cf_value, -5.0);
        assert_eq!(
            find(FlowName::regional("Water, well, in ground", "DE"), Compartment::Raw).cf_value,
            1.0
        );

        let river = find(FlowName::regional("Water, river", "RER"), Compartment::Raw);
        assert_eq!(river.cf_value, 4.2);
        assert_eq!(river.resolution, Resolution::Continent);
        assert_eq!(
            find(FlowName::regional("Water, cooling, unspecified natural origin", "GLO"), Compartment::Raw)
                .resolution,
            Resolution::Global
        );
    }

    #[test]
    fn water_availability_rejects_zero_water_use() {
        let snapshot = SourceSnapshot {
            families: vec![water_family(vec![
                json!({"ISO2": "FR", "Water use": 0.0, "CF value": 2.0}),
            ])],
            stoichiometry: Vec::new(),
        };
        let err = normalize(&snapshot, &Geography::standard(), &ClimateFactors::default())
            .unwrap_err();
        assert_matches!(err, HarmonizeError::IncompleteFamily { .. });
    }

    #[test]
    fn source_resolution_text_is_kept() {
        let snapshot = SourceSnapshot {
            families: vec![family(
                "Ionizing radiation",
                FamilySchema::Canonical,
                json!({
                    "Impact category": "Ionizing radiation",
                    "CF unit": "kBq Co-60 eq",
                    "Compartment": "Air",
                    "Elem flow unit": "kBq",
                    "MP or Damage": "Midpoint"
                }),
                vec![
                    json!({
                        "Elem flow name": "Radon-222",
                        "CF value": 0.01,
                        "Native geographical resolution scale": "Not regionalized"
                    }),
                    json!({"Elem flow name": "Cesium-137", "CF value": 0.5}),
                ],
            )],
            stoichiometry: Vec::new(),
        };
        let (table, _) =
            normalize(&snapshot, &Geography::standard(), &ClimateFactors::default()).unwrap();
        assert_eq!(table.rows()[0].resolution, Resolution::NotRegionalized);
        assert!(!table.rows()[0].resolution.is_regional());
        assert_eq!(table.rows()[1].resolution, Resolution::Global);
    }
}
