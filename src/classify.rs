use std::str::FromStr;

use crate::record::Facets;

const TRAFFIC_KEYWORDS: &[&str] = &[
    "circulation",
    "sens unique",
    "sens interdit",
    "voie",
    "interdiction de circuler",
    "accès",
    "fermeture",
    "déviation",
];

const PARKING_KEYWORDS: &[&str] = &[
    "stationnement",
    "parking",
    "zone bleue",
    "livraison",
];

const TEMPORARY_KEYWORDS: &[&str] = &["provisoire", "temporaire", "provisoirement"];

/// Derives the facets of a notice from its title.
///
/// Matching is a case-insensitive substring search. A title without any temporariness
/// keyword is considered permanent.
pub fn classify(title: &str) -> Facets {
    let title = title.to_lowercase();
    let any = |keywords: &[&str]| keywords.iter().any(|kw| title.contains(kw));

    Facets {
        concerns_traffic_flow: any(TRAFFIC_KEYWORDS),
        concerns_parking: any(PARKING_KEYWORDS),
        is_temporary: any(TEMPORARY_KEYWORDS),
    }
}

/// Which classified notices are kept for ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeepPolicy {
    #[default]
    All,
    TrafficOnly,
    ParkingOnly,
}

impl KeepPolicy {
    pub fn keeps(self, facets: &Facets) -> bool {
        match self {
            KeepPolicy::All => true,
            KeepPolicy::TrafficOnly => facets.concerns_traffic_flow,
            KeepPolicy::ParkingOnly => facets.concerns_parking,
        }
    }
}

impl FromStr for KeepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(KeepPolicy::All),
            "circulation" | "traffic" => Ok(KeepPolicy::TrafficOnly),
            "stationnement" | "parking" => Ok(KeepPolicy::ParkingOnly),
            other => Err(format!(
                "invalid filter '{other}' (options: all, circulation, stationnement)"
            )),
        }
    }
}
