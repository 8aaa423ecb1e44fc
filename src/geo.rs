use std::collections::{BTreeMap, BTreeSet};

use crate::domain::Resolution;

pub const GLOBAL: &str = "GLO";
pub const REST_OF_WORLD: &str = "RoW";

pub const STANDARD_CONTINENTS: [&str; 6] = ["RNA", "RLA", "RER", "RAS", "RAF", "OCE"];

/// ISO 3166-1 alpha-2 codes grouped by continent.
const STANDARD_COUNTRIES: &[(&str, &str)] = &[
    ("US", "RNA"), ("CA", "RNA"), ("GL", "RNA"), ("BM", "RNA"), ("PM", "RNA"),
    ("MX", "RLA"), ("GT", "RLA"), ("BZ", "RLA"), ("SV", "RLA"), ("HN", "RLA"), ("NI", "RLA"),
    ("CR", "RLA"), ("PA", "RLA"), ("CU", "RLA"), ("JM", "RLA"), ("HT", "RLA"), ("DO", "RLA"),
    ("PR", "RLA"), ("BS", "RLA"), ("BB", "RLA"), ("TT", "RLA"), ("AG", "RLA"), ("DM", "RLA"),
    ("GD", "RLA"), ("KN", "RLA"), ("LC", "RLA"), ("VC", "RLA"), ("AW", "RLA"), ("CW", "RLA"),
    ("SX", "RLA"), ("BQ", "RLA"), ("KY", "RLA"), ("TC", "RLA"), ("VG", "RLA"), ("VI", "RLA"),
    ("AI", "RLA"), ("MS", "RLA"), ("GP", "RLA"), ("MQ", "RLA"), ("BL", "RLA"), ("MF", "RLA"),
    ("CO", "RLA"), ("VE", "RLA"), ("EC", "RLA"), ("PE", "RLA"), ("BO", "RLA"), ("BR", "RLA"),
    ("PY", "RLA"), ("UY", "RLA"), ("AR", "RLA"), ("CL", "RLA"), ("GY", "RLA"), ("SR", "RLA"),
    ("GF", "RLA"), ("FK", "RLA"), ("GS", "RLA"),
    ("AL", "RER"), ("AD", "RER"), ("AT", "RER"), ("AX", "RER"), ("BA", "RER"), ("BE", "RER"),
    ("BG", "RER"), ("BY", "RER"), ("CH", "RER"), ("CY", "RER"), ("CZ", "RER"), ("DE", "RER"),
    ("DK", "RER"), ("EE", "RER"), ("ES", "RER"), ("FI", "RER"), ("FO", "RER"), ("FR", "RER"),
    ("GB", "RER"), ("GG", "RER"), ("GI", "RER"), ("GR", "RER"), ("HR", "RER"), ("HU", "RER"),
    ("IE", "RER"), ("IM", "RER"), ("IS", "RER"), ("IT", "RER"), ("JE", "RER"), ("LI", "RER"),
    ("LT", "RER"), ("LU", "RER"), ("LV", "RER"), ("MC", "RER"), ("MD", "RER"), ("ME", "RER"),
    ("MK", "RER"), ("MT", "RER"), ("NL", "RER"), ("NO", "RER"), ("PL", "RER"), ("PT", "RER"),
    ("RO", "RER"), ("RS", "RER"), ("RU", "RER"), ("SE", "RER"), ("SI", "RER"), ("SJ", "RER"),
    ("SK", "RER"), ("SM", "RER"), ("UA", "RER"), ("VA", "RER"),
    ("AE", "RAS"), ("AF", "RAS"), ("AM", "RAS"), ("AZ", "RAS"), ("BD", "RAS"), ("BH", "RAS"),
    ("BN", "RAS"), ("BT", "RAS"), ("CN", "RAS"), ("GE", "RAS"), ("HK", "RAS"), ("ID", "RAS"),
    ("IL", "RAS"), ("IN", "RAS"), ("IO", "RAS"), ("IQ", "RAS"), ("IR", "RAS"), ("JO", "RAS"),
    ("JP", "RAS"), ("KG", "RAS"), ("KH", "RAS"), ("KP", "RAS"), ("KR", "RAS"), ("KW", "RAS"),
    ("KZ", "RAS"), ("LA", "RAS"), ("LB", "RAS"), ("LK", "RAS"), ("MM", "RAS"), ("MN", "RAS"),
    ("MO", "RAS"), ("MV", "RAS"), ("MY", "RAS"), ("NP", "RAS"), ("OM", "RAS"), ("PH", "RAS"),
    ("PK", "RAS"), ("PS", "RAS"), ("QA", "RAS"), ("SA", "RAS"), ("SG", "RAS"), ("SY", "RAS"),
    ("TH", "RAS"), ("TJ", "RAS"), ("TL", "RAS"), ("TM", "RAS"), ("TR", "RAS"), ("TW", "RAS"),
    ("UZ", "RAS"), ("VN", "RAS"), ("YE", "RAS"),
    ("AO", "RAF"), ("BF", "RAF"), ("BI", "RAF"), ("BJ", "RAF"), ("BW", "RAF"), ("CD", "RAF"),
    ("CF", "RAF"), ("CG", "RAF"), ("CI", "RAF"), ("CM", "RAF"), ("CV", "RAF"), ("DJ", "RAF"),
    ("DZ", "RAF"), ("EG", "RAF"), ("EH", "RAF"), ("ER", "RAF"), ("ET", "RAF"), ("GA", "RAF"),
    ("GH", "RAF"), ("GM", "RAF"), ("GN", "RAF"), ("GQ", "RAF"), ("GW", "RAF"), ("KE", "RAF"),
    ("KM", "RAF"), ("LR", "RAF"), ("LS", "RAF"), ("LY", "RAF"), ("MA", "RAF"), ("MG", "RAF"),
    ("ML", "RAF"), ("MR", "RAF"), ("MU", "RAF"), ("MW", "RAF"), ("MZ", "RAF"), ("NA", "RAF"),
    ("NE", "RAF"), ("NG", "RAF"), ("RE", "RAF"), ("RW", "RAF"), ("SC", "RAF"), ("SD", "RAF"),
    ("SH", "RAF"), ("SL", "RAF"), ("SN", "RAF"), ("SO", "RAF"), ("SS", "RAF"), ("ST", "RAF"),
    ("SZ", "RAF"), ("TD", "RAF"), ("TG", "RAF"), ("TN", "RAF"), ("TZ", "RAF"), ("UG", "RAF"),
    ("YT", "RAF"), ("ZA", "RAF"), ("ZM", "RAF"), ("ZW", "RAF"),
    ("AS", "OCE"), ("AU", "OCE"), ("CC", "OCE"), ("CK", "OCE"), ("CX", "OCE"), ("FJ", "OCE"),
    ("FM", "OCE"), ("GU", "OCE"), ("HM", "OCE"), ("KI", "OCE"), ("MH", "OCE"), ("MP", "OCE"),
    ("NC", "OCE"), ("NF", "OCE"), ("NR", "OCE"), ("NU", "OCE"), ("NZ", "OCE"), ("PF", "OCE"),
    ("PG", "OCE"), ("PN", "OCE"), ("PW", "OCE"), ("SB", "OCE"), ("TK", "OCE"), ("TO", "OCE"),
    ("TV", "OCE"), ("UM", "OCE"), ("VU", "OCE"), ("WF", "OCE"), ("WS", "OCE"),
];

const STANDARD_ALIASES: &[(&str, &str)] = &[
    ("Africa", "RAF"),
    ("South America", "RLA"),
    ("Northern America", "RNA"),
    ("Asia", "RAS"),
    ("Europe", "RER"),
    ("Oceania", "OCE"),
];

/// Country to continent lookup plus the universal `GLO` and other-region fallbacks.
///
/// Every stage that needs to recognise a region code goes through one instance, so
/// membership of the region lists is decided in a single place.
#[derive(Debug, Clone)]
pub struct Geography {
    countries: BTreeMap<String, String>,
    continents: BTreeSet<String>,
    other_regions: BTreeSet<String>,
    aliases: BTreeMap<String, String>,
}

impl Geography {
    pub fn new(
        countries: BTreeMap<String, String>,
        continents: BTreeSet<String>,
        other_regions: BTreeSet<String>,
        aliases: BTreeMap<String, String>,
    ) -> Self {
        let mut other_regions = other_regions;
        other_regions.insert(REST_OF_WORLD.to_string());
        Self {
            countries,
            continents,
            other_regions,
            aliases,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            STANDARD_COUNTRIES
                .iter()
                .map(|(country, continent)| (country.to_string(), continent.to_string()))
                .collect(),
            STANDARD_CONTINENTS.iter().map(|c| c.to_string()).collect(),
            BTreeSet::new(),
            standard_aliases(),
        )
    }

    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases.extend(aliases);
        self
    }

    pub fn canonical_code<'a>(&'a self, code: &'a str) -> &'a str {
        let trimmed = code.trim();
        self.aliases
            .get(trimmed)
            .map(String::as_str)
            .unwrap_or(trimmed)
    }

    pub fn is_known(&self, code: &str) -> bool {
        code == GLOBAL
            || self.countries.contains_key(code)
            || self.continents.contains(code)
            || self.other_regions.contains(code)
    }

    /// Whether a flow-name suffix names a region: any known code, or a bare two-letter
    /// upper-case code that the country table does not list.
    pub fn is_region_suffix(&self, code: &str) -> bool {
        self.is_known(code) || is_iso2(code)
    }

    pub fn classify(&self, code: &str) -> Resolution {
        if code == GLOBAL {
            Resolution::Global
        } else if self.countries.contains_key(code) {
            Resolution::Country
        } else if self.continents.contains(code) {
            Resolution::Continent
        } else {
            Resolution::OtherRegion
        }
    }

    pub fn continent_of(&self, country: &str) -> Option<&str> {
        self.countries.get(country).map(String::as_str)
    }

    /// Next coarser region: country to continent, anything else to `GLO`.
    pub fn parent(&self, code: &str) -> Option<&str> {
        match self.classify(code) {
            Resolution::Global => None,
            Resolution::Country => self.continent_of(code).or(Some(GLOBAL)),
            _ => Some(GLOBAL),
        }
    }

    pub fn ancestors(&self, code: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.parent(code);
        while let Some(next) = current {
            chain.push(next);
            current = self.parent(next);
        }
        chain
    }

    /// All codes a regionalized flow may be expanded to (countries, continents, other regions).
    pub fn target_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.countries.keys().cloned().collect();
        codes.extend(self.continents.iter().cloned());
        codes.extend(self.other_regions.iter().cloned());
        codes
    }
}

pub fn standard_aliases() -> BTreeMap<String, String> {
    STANDARD_ALIASES
        .iter()
        .map(|(alias, code)| (alias.to_string(), code.to_string()))
        .collect()
}

fn is_iso2(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|byte| byte.is_ascii_uppercase())
}

impl Default for Geography {
    fn default() -> Self {
        Self::standard()
    }
}
