use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{Compartment, Resolution, Tier};
use crate::geo::Geography;

/// Substance name plus optional region code, kept apart until the export boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowName {
    pub substance: String,
    pub region: Option<String>,
}

impl FlowName {
    pub fn plain(substance: impl Into<String>) -> Self {
        Self {
            substance: substance.into(),
            region: None,
        }
    }

    pub fn regional(substance: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            substance: substance.into(),
            region: Some(region.into()),
        }
    }

    /// Splits a display name such as "Ammonia, FR" when the suffix is a region code.
    pub fn parse(name: &str, geography: &Geography) -> Self {
        let name = name.trim();
        if let Some((substance, suffix)) = name.rsplit_once(", ") {
            let code = geography.canonical_code(suffix);
            if geography.is_region_suffix(code) {
                return Self::regional(substance, code);
            }
        }
        Self::plain(name)
    }

    pub fn with_region(&self, region: &str) -> Self {
        Self::regional(self.substance.clone(), region)
    }

    pub fn without_region(&self) -> Self {
        Self::plain(self.substance.clone())
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }
}

impl fmt::Display for FlowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}, {}", self.substance, region),
            None => write!(f, "{}", self.substance),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterizationFactor {
    pub impact_category: String,
    pub cf_unit: String,
    pub compartment: Compartment,
    pub sub_compartment: String,
    pub flow: FlowName,
    pub elem_flow_unit: String,
    pub cas_number: Option<String>,
    pub cf_value: f64,
    pub tier: Tier,
    pub resolution: Resolution,
}

impl CharacterizationFactor {
    pub fn identity(&self) -> Identity {
        Identity {
            impact_category: self.impact_category.clone(),
            cf_unit: self.cf_unit.clone(),
            compartment: self.compartment,
            sub_compartment: self.sub_compartment.clone(),
            flow: self.flow.clone(),
        }
    }

    pub fn elem_flow_name(&self) -> String {
        self.flow.to_string()
    }
}

/// Natural identity of a canonical row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    pub impact_category: String,
    pub cf_unit: String,
    pub compartment: Compartment,
    pub sub_compartment: String,
    pub flow: FlowName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Added,
    Duplicate,
    Updated,
}

/// Ordered table of canonical rows holding at most one value per identity.
#[derive(Debug, Clone, Default)]
pub struct CfTable {
    rows: Vec<CharacterizationFactor>,
    index: HashMap<Identity, usize>,
    conflicts: usize,
}

impl CfTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterizationFactor> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[CharacterizationFactor] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<CharacterizationFactor> {
        self.rows
    }

    /// Number of identities whose value was replaced by a later, differing row.
    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn get(&self, identity: &Identity) -> Option<&CharacterizationFactor> {
        self.index.get(identity).map(|&position| &self.rows[position])
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains_key(identity)
    }

    /// Appends a row. Identical rows are dropped; a differing value for an existing
    /// identity is an explicit update: the later row wins and the conflict is counted.
    pub fn push(&mut self, row: CharacterizationFactor) -> Insert {
        let identity = row.identity();
        match self.index.get(&identity) {
            None => {
                self.index.insert(identity, self.rows.len());
                self.rows.push(row);
                Insert::Added
            }
            Some(&position) if self.rows[position] == row => Insert::Duplicate,
            Some(&position) => {
                tracing::warn!(
                    category = %row.impact_category,
                    flow = %row.flow,
                    old = self.rows[position].cf_value,
                    new = row.cf_value,
                    "conflicting value for identity, keeping later row"
                );
                self.rows[position] = row;
                self.conflicts += 1;
                Insert::Updated
            }
        }
    }

    /// Appends a row only when its identity is not defined yet.
    pub fn push_if_absent(&mut self, row: CharacterizationFactor) -> bool {
        let identity = row.identity();
        if self.index.contains_key(&identity) {
            return false;
        }
        self.index.insert(identity, self.rows.len());
        self.rows.push(row);
        true
    }

    pub fn concat<I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = CharacterizationFactor>,
    {
        for row in rows {
            self.push(row);
        }
        self
    }

    pub fn retain<F>(self, mut keep: F) -> Self
    where
        F: FnMut(&CharacterizationFactor) -> bool,
    {
        let conflicts = self.conflicts;
        let mut table = Self::from_iter(self.rows.into_iter().filter(|row| keep(row)));
        table.conflicts += conflicts;
        table
    }

    pub fn sorted_by<F>(self, compare: F) -> Self
    where
        F: FnMut(&CharacterizationFactor, &CharacterizationFactor) -> std::cmp::Ordering,
    {
        let conflicts = self.conflicts;
        let mut rows = self.rows;
        rows.sort_by(compare);
        let mut table = Self::from_iter(rows);
        table.conflicts += conflicts;
        table
    }
}

impl FromIterator<CharacterizationFactor> for CfTable {
    fn from_iter<I: IntoIterator<Item = CharacterizationFactor>>(iter: I) -> Self {
        Self::new().concat(iter)
    }
}

impl IntoIterator for CfTable {
    type Item = CharacterizationFactor;
    type IntoIter = std::vec::IntoIter<CharacterizationFactor>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Returns `base` with every row replaced by `priority`'s row of the same identity.
pub fn override_with(base: CfTable, priority: &CfTable) -> CfTable {
    base.into_iter()
        .map(|row| match priority.get(&row.identity()) {
            Some(existing) => existing.clone(),
            None => row,
        })
        .collect()
}

/// Sorts by category and flow, then groups midpoints, DALY damages and PDF damages.
pub fn order_canonical(table: CfTable) -> CfTable {
    fn group(row: &CharacterizationFactor) -> u8 {
        match (row.tier, row.cf_unit.as_str()) {
            (Tier::Midpoint, _) => 0,
            (Tier::Damage, "DALY") => 1,
            (Tier::Damage, "PDF.m2.yr") => 2,
            (Tier::Damage, _) => 3,
        }
    }

    table.sorted_by(|a, b| {
        group(a)
            .cmp(&group(b))
            .then_with(|| a.impact_category.cmp(&b.impact_category))
            .then_with(|| a.elem_flow_name().cmp(&b.elem_flow_name()))
            .then_with(|| a.compartment.cmp(&b.compartment))
            .then_with(|| a.sub_compartment.cmp(&b.sub_compartment))
    })
}
