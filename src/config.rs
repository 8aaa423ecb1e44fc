use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationSettings;
use crate::biogenic::CarbonFlows;
use crate::error::HarmonizeError;
use crate::exiobase::ExiobaseSettings;
use crate::geo::{Geography, STANDARD_CONTINENTS, standard_aliases};
use crate::harmonize::default_substances;
use crate::linker::{MappingRule, TargetVocabulary, VocabularyOptions};
use crate::normalize::ClimateFactors;
use crate::rules::RuleTable;

pub const DEFAULT_CONFIG: &str = "iw-harmonizer.json";
pub const DEFAULT_SOURCE: &str = "iw-source.json";
pub const DEFAULT_OUTPUT: &str = "iw-output";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: Option<u32>,
    pub source: Option<String>,
    pub output: Option<String>,
    pub regions: Vec<RegionEntry>,
    pub continents: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    pub region_targets: Option<Vec<String>>,
    pub rules: Option<RuleTable>,
    pub harmonized_substances: Option<Vec<String>>,
    pub climate: Option<ClimateFactors>,
    pub carbon: Option<CarbonFlows>,
    pub aggregation: Option<AggregationSettings>,
    pub exiobase: Option<ExiobaseSettings>,
    pub targets: Vec<TargetEntry>,
}

/// `"FR:RER"` for a country, `"RoW"` for a region outside the continent tree.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RegionEntry {
    Shorthand(String),
    Detailed(RegionEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegionEntryObject {
    pub code: String,
    #[serde(default)]
    pub continent: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TargetEntry {
    pub name: String,
    #[serde(default)]
    pub crosswalk: Vec<MappingEntry>,
    #[serde(flatten)]
    pub options: VocabularyOptions,
}

/// `"Zinc => Zinc II"` or `{ "canonical": "Zinc", "target": "Zinc II" }`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MappingEntry {
    Shorthand(String),
    Detailed(MappingEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MappingEntryObject {
    pub canonical: String,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub geography: Geography,
    pub region_targets: Vec<String>,
    pub rules: RuleTable,
    pub harmonized_substances: Vec<String>,
    pub climate: ClimateFactors,
    pub carbon: CarbonFlows,
    pub aggregation: AggregationSettings,
    pub exiobase: Option<ExiobaseSettings>,
    pub vocabularies: Vec<TargetVocabulary>,
}

impl ResolvedConfig {
    pub fn vocabulary(&self, name: &str) -> Result<&TargetVocabulary, HarmonizeError> {
        self.vocabularies
            .iter()
            .find(|vocabulary| vocabulary.name == name)
            .ok_or_else(|| HarmonizeError::UnknownTarget(name.to_string()))
    }

    /// Keeps only the named vocabularies, in the given order.
    pub fn select_targets(&mut self, names: &[String]) -> Result<(), HarmonizeError> {
        if names.is_empty() {
            return Ok(());
        }
        let selected = names
            .iter()
            .map(|name| self.vocabulary(name).cloned())
            .collect::<Result<Vec<_>, HarmonizeError>>()?;
        self.vocabularies = selected;
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarmonizeError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HarmonizeError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarmonizeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarmonizeError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarmonizeError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let geography = resolve_geography(&config.regions, &config.continents)?
            .with_aliases(config.aliases);

        let region_targets = match config.region_targets {
            Some(targets) => targets
                .into_iter()
                .map(|code| {
                    let canonical = geography.canonical_code(&code).to_string();
                    if geography.is_known(&canonical) {
                        Ok(canonical)
                    } else {
                        Err(HarmonizeError::InvalidRegion(code))
                    }
                })
                .collect::<Result<Vec<_>, HarmonizeError>>()?,
            None => geography.target_codes(),
        };

        let mut names = BTreeSet::new();
        let vocabularies = config
            .targets
            .into_iter()
            .map(|entry| {
                if !names.insert(entry.name.clone()) {
                    return Err(HarmonizeError::InvalidMapping(format!(
                        "target `{}` declared twice",
                        entry.name
                    )));
                }
                let rules = entry
                    .crosswalk
                    .into_iter()
                    .map(|mapping| mapping_rule(mapping, &entry.name))
                    .collect::<Result<Vec<_>, HarmonizeError>>()?;
                TargetVocabulary::new(entry.name, rules, entry.options)
            })
            .collect::<Result<Vec<_>, HarmonizeError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            source: Utf8PathBuf::from(config.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string())),
            output: Utf8PathBuf::from(config.output.unwrap_or_else(|| DEFAULT_OUTPUT.to_string())),
            geography,
            region_targets,
            rules: config.rules.unwrap_or_else(RuleTable::standard),
            harmonized_substances: config
                .harmonized_substances
                .unwrap_or_else(default_substances),
            climate: config.climate.unwrap_or_default(),
            carbon: config.carbon.unwrap_or_default(),
            aggregation: config.aggregation.unwrap_or_default(),
            exiobase: config.exiobase,
            vocabularies,
        })
    }
}

fn resolve_geography(
    regions: &[RegionEntry],
    continents: &[String],
) -> Result<Geography, HarmonizeError> {
    if regions.is_empty() && continents.is_empty() {
        return Ok(Geography::standard());
    }

    let continents: BTreeSet<String> = if continents.is_empty() {
        STANDARD_CONTINENTS.iter().map(|c| c.to_string()).collect()
    } else {
        continents.iter().map(|c| c.trim().to_string()).collect()
    };

    let mut countries = BTreeMap::new();
    let mut other_regions = BTreeSet::new();
    for entry in regions {
        let (code, continent) = match entry {
            RegionEntry::Shorthand(value) => match value.split_once(':') {
                Some((code, continent)) => (code.trim(), Some(continent.trim())),
                None => (value.trim(), None),
            },
            RegionEntry::Detailed(obj) => (obj.code.trim(), obj.continent.as_deref().map(str::trim)),
        };
        if code.is_empty() {
            return Err(HarmonizeError::InvalidRegion(format!("{entry:?}")));
        }
        match continent {
            Some(continent) if continents.contains(continent) => {
                countries.insert(code.to_string(), continent.to_string());
            }
            Some(continent) => {
                return Err(HarmonizeError::InvalidRegion(format!(
                    "{code} belongs to unknown continent {continent}"
                )));
            }
            None if continents.contains(code) => {}
            None => {
                other_regions.insert(code.to_string());
            }
        }
    }

    Ok(Geography::new(
        countries,
        continents,
        other_regions,
        standard_aliases(),
    ))
}

fn mapping_rule(entry: MappingEntry, target_system: &str) -> Result<MappingRule, HarmonizeError> {
    let (canonical, target) = match entry {
        MappingEntry::Shorthand(value) => {
            let (canonical, target) = value
                .split_once("=>")
                .ok_or_else(|| HarmonizeError::InvalidMapping(value.clone()))?;
            (canonical.trim().to_string(), target.trim().to_string())
        }
        MappingEntry::Detailed(obj) => (obj.canonical.trim().to_string(), obj.target.trim().to_string()),
    };
    if canonical.is_empty() || target.is_empty() {
        return Err(HarmonizeError::InvalidMapping(format!(
            "{canonical} => {target}"
        )));
    }
    Ok(MappingRule {
        canonical,
        target,
        target_system: target_system.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Resolution;

    #[test]
    fn empty_config_uses_built_in_tables() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.source, Utf8PathBuf::from(DEFAULT_SOURCE));
        assert!(resolved.region_targets.iter().any(|code| code == "FR"));
        assert!(resolved.vocabularies.is_empty());
        assert!(!resolved.rules.rules.is_empty());
    }

    #[test]
    fn parse_region_shorthand_and_detailed() {
        let config = Config {
            regions: vec![
                RegionEntry::Shorthand("FR:RER".to_string()),
                RegionEntry::Shorthand("RoW".to_string()),
                RegionEntry::Detailed(RegionEntryObject {
                    code: "QC".to_string(),
                    continent: Some("RNA".to_string()),
                }),
            ],
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.geography.classify("QC"), Resolution::Country);
        assert_eq!(resolved.geography.ancestors("FR"), vec!["RER", "GLO"]);
        assert_eq!(resolved.geography.classify("RoW"), Resolution::OtherRegion);
        assert_eq!(resolved.geography.canonical_code("Europe"), "RER");
    }

    #[test]
    fn rejects_unknown_continent() {
        let config = Config {
            regions: vec![RegionEntry::Shorthand("FR:EUR".to_string())],
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert!(matches!(err, HarmonizeError::InvalidRegion(_)));
    }

    #[test]
    fn parse_crosswalk_shorthand() {
        let config = Config {
            targets: vec![TargetEntry {
                name: "ecoinvent".to_string(),
                crosswalk: vec![
                    MappingEntry::Shorthand("Zinc => Zinc II".to_string()),
                    MappingEntry::Detailed(MappingEntryObject {
                        canonical: "Zinc".to_string(),
                        target: "Zinc, ion".to_string(),
                    }),
                ],
                options: VocabularyOptions::default(),
            }],
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        let vocabulary = resolved.vocabulary("ecoinvent").unwrap();
        assert_eq!(
            vocabulary.targets("Zinc").unwrap(),
            &["Zinc II".to_string(), "Zinc, ion".to_string()]
        );
        assert!(matches!(
            resolved.vocabulary("simapro"),
            Err(HarmonizeError::UnknownTarget(_))
        ));
    }

    #[test]
    fn rejects_malformed_mapping() {
        let config = Config {
            targets: vec![TargetEntry {
                name: "ecoinvent".to_string(),
                crosswalk: vec![MappingEntry::Shorthand("Zinc -> Zinc II".to_string())],
                options: VocabularyOptions::default(),
            }],
            ..Config::default()
        };
        assert!(matches!(
            ConfigLoader::resolve_config(config),
            Err(HarmonizeError::InvalidMapping(_))
        ));
    }
}
