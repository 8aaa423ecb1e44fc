use std::fs;

use assert_matches::assert_matches;
use tempfile::tempdir;

use iw_harmonizer::config::{
    Config, ConfigLoader, MappingEntry, RegionEntry, RegionEntryObject, TargetEntry,
};
use iw_harmonizer::domain::{Compartment, Resolution};
use iw_harmonizer::error::HarmonizeError;
use iw_harmonizer::linker::{LocationMode, VocabularyOptions};

#[test]
fn parse_config_shorthand() {
    let config = Config {
        regions: vec![
            RegionEntry::Shorthand("FR:RER".to_string()),
            RegionEntry::Shorthand("CN:RAS".to_string()),
            RegionEntry::Detailed(RegionEntryObject {
                code: "RoW".to_string(),
                continent: None,
            }),
        ],
        region_targets: Some(vec!["FR".to_string(), "Asia".to_string()]),
        aliases: [("Asia".to_string(), "RAS".to_string())].into_iter().collect(),
        targets: vec![TargetEntry {
            name: "ecoinvent".to_string(),
            crosswalk: vec![MappingEntry::Shorthand("Zinc => Zinc II".to_string())],
            options: VocabularyOptions::default(),
        }],
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.region_targets, vec!["FR".to_string(), "RAS".to_string()]);
    assert_eq!(resolved.geography.classify("CN"), Resolution::Country);
    assert_eq!(resolved.geography.classify("US"), Resolution::OtherRegion);
    assert_eq!(resolved.vocabularies.len(), 1);
    assert_eq!(resolved.harmonized_substances[0], "Ammonia");
}

#[test]
fn unknown_region_target_is_rejected() {
    let config = Config {
        region_targets: Some(vec!["Atlantis".to_string()]),
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, HarmonizeError::InvalidRegion(_));
}

#[test]
fn duplicate_target_is_rejected() {
    let target = || TargetEntry {
        name: "simapro".to_string(),
        crosswalk: Vec::new(),
        options: VocabularyOptions::default(),
    };
    let config = Config {
        targets: vec![target(), target()],
        ..Config::default()
    };
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, HarmonizeError::InvalidMapping(_));
}

#[test]
fn loads_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("iw-harmonizer.json");
    fs::write(
        &path,
        r#"{
            "source": "data/iw-source.json",
            "targets": [
                {
                    "name": "openLCA",
                    "crosswalk": ["Ammonia => Ammonia", { "canonical": "Zinc", "target": "Zinc II" }],
                    "location": { "mode": "attribute", "spatializable": ["Ammonia"] },
                    "compartments": { "Air": "Emission to air" },
                    "unit_conversions": [{ "from": "Bq", "to": "kBq", "factor": 1000.0 }]
                }
            ]
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.source.as_str(), "data/iw-source.json");
    let vocabulary = resolved.vocabulary("openLCA").unwrap();
    assert_eq!(vocabulary.mapping_count(), 2);
    assert_matches!(vocabulary.options.location, LocationMode::Attribute { .. });
    assert_eq!(
        vocabulary.options.compartments.get(&Compartment::Air).map(String::as_str),
        Some("Emission to air")
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ \"targets\": 3 }").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, HarmonizeError::ConfigParse(_));
}

#[test]
fn explicit_missing_path_is_a_read_error() {
    let err = ConfigLoader::resolve(Some("/nonexistent/iw-harmonizer.json")).unwrap_err();
    assert_matches!(err, HarmonizeError::ConfigRead(_));
}

#[test]
fn select_targets_filters_and_rejects_unknown() {
    let config = Config {
        targets: vec![
            TargetEntry {
                name: "ecoinvent".to_string(),
                crosswalk: Vec::new(),
                options: VocabularyOptions::default(),
            },
            TargetEntry {
                name: "simapro".to_string(),
                crosswalk: Vec::new(),
                options: VocabularyOptions::default(),
            },
        ],
        ..Config::default()
    };
    let mut resolved = ConfigLoader::resolve_config(config).unwrap();
    let err = resolved
        .clone()
        .select_targets(&["umberto".to_string()])
        .unwrap_err();
    assert_matches!(err, HarmonizeError::UnknownTarget(_));

    resolved.select_targets(&["simapro".to_string()]).unwrap();
    assert_eq!(resolved.vocabularies.len(), 1);
    assert_eq!(resolved.vocabularies[0].name, "simapro");
}
