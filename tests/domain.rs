use assert_matches::assert_matches;

use iw_harmonizer::domain::{CarbonAccounting, Compartment, Resolution, Tier};
use iw_harmonizer::error::HarmonizeError;
use iw_harmonizer::geo::Geography;
use iw_harmonizer::model::FlowName;

#[test]
fn parse_compartment_valid() {
    let compartment: Compartment = "water".parse().unwrap();
    assert_eq!(compartment, Compartment::Water);
    assert_eq!(compartment.to_string(), "Water");
}

#[test]
fn parse_compartment_invalid() {
    let err = "ocean floor".parse::<Compartment>().unwrap_err();
    assert_matches!(err, HarmonizeError::InvalidCompartment(_));
}

#[test]
fn parse_tier() {
    assert_eq!("Midpoint".parse::<Tier>().unwrap(), Tier::Midpoint);
    assert_eq!("Damage".parse::<Tier>().unwrap(), Tier::Damage);
    assert_matches!("both".parse::<Tier>(), Err(HarmonizeError::InvalidTier(_)));
}

#[test]
fn parse_resolution() {
    assert_eq!(
        "Not regionalized".parse::<Resolution>().unwrap(),
        Resolution::NotRegionalized
    );
    assert_eq!(
        "other_region".parse::<Resolution>().unwrap(),
        Resolution::OtherRegion
    );
    assert!(!Resolution::Global.is_regional());
    assert!(Resolution::Country.is_regional());
}

#[test]
fn carbon_accounting_slugs() {
    let slugs: Vec<&str> = CarbonAccounting::all().iter().map(|a| a.slug()).collect();
    assert_eq!(slugs, vec!["plus-minus-one", "carbon-neutral"]);
    assert_eq!(
        "carbon-neutral".parse::<CarbonAccounting>().unwrap(),
        CarbonAccounting::CarbonNeutral
    );
}

#[test]
fn flow_name_splits_known_regions_only() {
    let geo = Geography::standard();
    assert_eq!(
        FlowName::parse("Ammonia, FR", &geo),
        FlowName::regional("Ammonia", "FR")
    );
    assert_eq!(
        FlowName::parse("Particulates, < 2.5 um", &geo),
        FlowName::plain("Particulates, < 2.5 um")
    );
    assert_eq!(
        FlowName::parse("Ammonia, Europe", &geo),
        FlowName::regional("Ammonia", "RER")
    );
    assert_eq!(FlowName::regional("Ammonia", "FR").to_string(), "Ammonia, FR");
}

#[test]
fn geography_ancestors() {
    let geo = Geography::standard();
    assert_eq!(geo.ancestors("FR"), vec!["RER", "GLO"]);
    assert_eq!(geo.ancestors("RAS"), vec!["GLO"]);
    assert_eq!(geo.ancestors("RoW"), vec!["GLO"]);
    assert!(geo.ancestors("GLO").is_empty());
    assert_eq!(geo.classify("RoW"), Resolution::OtherRegion);
}
