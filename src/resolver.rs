use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{Compartment, Tier};
use crate::geo::{GLOBAL, Geography};
use crate::model::{CfTable, CharacterizationFactor};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResolveReport {
    pub groups: usize,
    pub synthesized: usize,
    pub gaps: usize,
    pub unregionalized: usize,
}

/// Everything that identifies a regionalized flow except the region itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    impact_category: String,
    cf_unit: String,
    compartment: Compartment,
    sub_compartment: String,
    substance: String,
    elem_flow_unit: String,
    tier: Tier,
}

impl GroupKey {
    fn of(row: &CharacterizationFactor) -> Self {
        Self {
            impact_category: row.impact_category.clone(),
            cf_unit: row.cf_unit.clone(),
            compartment: row.compartment,
            sub_compartment: row.sub_compartment.clone(),
            substance: row.flow.substance.clone(),
            elem_flow_unit: row.elem_flow_unit.clone(),
            tier: row.tier,
        }
    }
}

/// Fills every missing target region of each regionalized flow from its nearest ancestor.
///
/// Native rows are never replaced. A filled row takes the resolution class of the region it
/// fills. A region whose ancestors are all missing is a gap: it is skipped and counted.
pub fn resolve(
    table: CfTable,
    geography: &Geography,
    targets: &[String],
) -> (CfTable, ResolveReport) {
    let mut report = ResolveReport::default();

    let synthesized = synthesize(&table, geography, targets, &mut report);

    let unregionalized: Vec<CharacterizationFactor> = table
        .iter()
        .filter(|row| row.flow.region() == Some(GLOBAL))
        .map(|row| CharacterizationFactor {
            flow: row.flow.without_region(),
            ..row.clone()
        })
        .collect();

    let mut table = table;
    for row in synthesized {
        if table.push_if_absent(row) {
            report.synthesized += 1;
        }
    }
    for row in unregionalized {
        if table.push_if_absent(row) {
            report.unregionalized += 1;
        }
    }

    if report.gaps > 0 {
        tracing::warn!(gaps = report.gaps, "regions left unresolved");
    }
    (table, report)
}

fn synthesize(
    table: &CfTable,
    geography: &Geography,
    targets: &[String],
    report: &mut ResolveReport,
) -> Vec<CharacterizationFactor> {
    let mut groups: BTreeMap<GroupKey, BTreeMap<&str, &CharacterizationFactor>> = BTreeMap::new();
    for row in table.iter() {
        if let Some(region) = row.flow.region() {
            groups
                .entry(GroupKey::of(row))
                .or_default()
                .insert(region, row);
        }
    }
    report.groups = groups.len();

    let mut synthesized = Vec::new();
    for (key, regions) in &groups {
        for target in targets {
            let target = geography.canonical_code(target);
            if regions.contains_key(target) {
                continue;
            }
            let ancestor = geography
                .ancestors(target)
                .into_iter()
                .find_map(|code| regions.get(code));
            match ancestor {
                Some(source) => synthesized.push(CharacterizationFactor {
                    flow: source.flow.with_region(target),
                    resolution: geography.classify(target),
                    ..(*source).clone()
                }),
                None => {
                    report.gaps += 1;
                    tracing::debug!(
                        category = %key.impact_category,
                        substance = %key.substance,
                        region = target,
                        "no ancestor value for region"
                    );
                }
            }
        }
    }
    synthesized
}
