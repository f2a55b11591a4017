//! The closed set of sectors deals and targets may reference.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One of the ten sectors of the deal dataset.
///
/// Variant order is the canonical (alphabetical) order, so maps keyed by
/// `Sector` iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sector {
    AdvancedManufacturing,
    CleanEnergy,
    CreativeIndustries,
    Defence,
    DigitalTechnologies,
    Financial,
    LifeScience,
    ProfessionalBusiness,
    RealEstate,
    Retail,
}

// Word-start pattern -> sector, checked in order against a loosened name.
// Compound words ("biotech", "cleantech") sit ahead of the generic "tech",
// and a pattern only matches at the start of a word, so "intermediate"
// never hits "media".
const ALIASES: &[(&str, Sector)] = &[
    ("advanced manufactur", Sector::AdvancedManufacturing),
    ("manufactur", Sector::AdvancedManufacturing),
    ("industrial", Sector::AdvancedManufacturing),
    ("aerospace", Sector::Defence),
    ("defense", Sector::Defence),
    ("defence", Sector::Defence),
    ("military", Sector::Defence),
    ("clean energy", Sector::CleanEnergy),
    ("cleantech", Sector::CleanEnergy),
    ("renewable", Sector::CleanEnergy),
    ("net zero", Sector::CleanEnergy),
    ("energy", Sector::CleanEnergy),
    ("creative", Sector::CreativeIndustries),
    ("media", Sector::CreativeIndustries),
    ("gaming", Sector::CreativeIndustries),
    ("fintech", Sector::Financial),
    ("financ", Sector::Financial),
    ("bank", Sector::Financial),
    ("insurance", Sector::Financial),
    ("life science", Sector::LifeScience),
    ("biotech", Sector::LifeScience),
    ("healthtech", Sector::LifeScience),
    ("healthcare", Sector::LifeScience),
    ("health", Sector::LifeScience),
    ("pharma", Sector::LifeScience),
    ("digital", Sector::DigitalTechnologies),
    ("technolog", Sector::DigitalTechnologies),
    ("software", Sector::DigitalTechnologies),
    ("tech", Sector::DigitalTechnologies),
    ("professional", Sector::ProfessionalBusiness),
    ("business services", Sector::ProfessionalBusiness),
    ("consult", Sector::ProfessionalBusiness),
    ("real estate", Sector::RealEstate),
    ("property", Sector::RealEstate),
    ("reit", Sector::RealEstate),
    ("construction", Sector::RealEstate),
    ("retail", Sector::Retail),
    ("consumer", Sector::Retail),
    ("e commerce", Sector::Retail),
];

impl Sector {
    /// Every sector, in canonical order.
    pub const ALL: [Sector; 10] = [
        Sector::AdvancedManufacturing,
        Sector::CleanEnergy,
        Sector::CreativeIndustries,
        Sector::Defence,
        Sector::DigitalTechnologies,
        Sector::Financial,
        Sector::LifeScience,
        Sector::ProfessionalBusiness,
        Sector::RealEstate,
        Sector::Retail,
    ];

    /// Canonical name, as spelled in the deal dataset.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::AdvancedManufacturing => "Advanced_Manufacturing",
            Sector::CleanEnergy => "Clean_Energy",
            Sector::CreativeIndustries => "Creative_Industries",
            Sector::Defence => "Defence",
            Sector::DigitalTechnologies => "Digital&Technologies",
            Sector::Financial => "Financial",
            Sector::LifeScience => "Life_Science",
            Sector::ProfessionalBusiness => "Professional_Business",
            Sector::RealEstate => "Real_Estate",
            Sector::Retail => "Retail",
        }
    }

    /// Map a loosely written sector name onto the closed set.
    ///
    /// Tries the canonical spelling first, then a case/punctuation-insensitive
    /// comparison, then the alias table. Returns `None` when nothing matches.
    pub fn canonicalize(name: &str) -> Option<Sector> {
        if let Ok(sector) = name.parse() {
            return Some(sector);
        }

        let loose = loosen(name);
        if loose.is_empty() {
            return None;
        }
        if let Some(sector) = Sector::ALL.iter().find(|s| loosen(s.as_str()) == loose) {
            return Some(*sector);
        }

        ALIASES
            .iter()
            .find(|(pattern, _)| starts_a_word(&loose, pattern))
            .map(|(_, sector)| *sector)
    }
}

fn starts_a_word(text: &str, pattern: &str) -> bool {
    text.match_indices(pattern)
        .any(|(at, _)| at == 0 || text.as_bytes()[at - 1] == b' ')
}

// Lowercase, treat '_' '-' '/' as word breaks, collapse whitespace, and
// spell out '&' so "Digital & Technologies" == "digital and technologies".
fn loosen(name: &str) -> String {
    name.to_lowercase()
        .replace('&', " and ")
        .replace(['_', '-', '/'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name is not one of the ten canonical sector names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sector '{0}'")]
pub struct UnknownSector(pub String);

impl FromStr for Sector {
    type Err = UnknownSector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Sector::ALL
            .iter()
            .find(|sector| sector.as_str() == trimmed)
            .copied()
            .ok_or_else(|| UnknownSector(s.to_string()))
    }
}

impl Serialize for Sector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Sector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn canonical_names_round_trip() {
        for sector in Sector::ALL {
            assert_eq!(sector.as_str().parse::<Sector>(), Ok(sector));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_eq!(
            "Unknown".parse::<Sector>(),
            Err(UnknownSector("Unknown".into()))
        );
    }

    #[test]
    fn canonicalize_accepts_loose_spellings() {
        assert_eq!(
            Sector::canonicalize("digital and technologies"),
            Some(Sector::DigitalTechnologies)
        );
        assert_eq!(Sector::canonicalize("Life Sciences"), Some(Sector::LifeScience));
        assert_eq!(Sector::canonicalize("real_estate"), Some(Sector::RealEstate));
        assert_eq!(Sector::canonicalize("UK Defense Tech"), Some(Sector::Defence));
        assert_eq!(Sector::canonicalize("Financial services"), Some(Sector::Financial));
        assert_eq!(Sector::canonicalize("Agriculture"), None);
        assert_eq!(Sector::canonicalize("  "), None);
    }

    #[test]
    fn compound_names_beat_generic_tech() {
        assert_eq!(Sector::canonicalize("Biotech"), Some(Sector::LifeScience));
        assert_eq!(Sector::canonicalize("Healthcare Technology"), Some(Sector::LifeScience));
        assert_eq!(Sector::canonicalize("Cleantech"), Some(Sector::CleanEnergy));
        assert_eq!(Sector::canonicalize("Fintech"), Some(Sector::Financial));
        assert_eq!(Sector::canonicalize("Deep Tech"), Some(Sector::DigitalTechnologies));
        assert_eq!(Sector::canonicalize("E-Commerce"), Some(Sector::Retail));
    }

    #[test]
    fn aliases_only_match_at_word_starts() {
        assert_eq!(Sector::canonicalize("Intermediate Goods"), None);
        assert_eq!(Sector::canonicalize("Social Media"), Some(Sector::CreativeIndustries));
    }

    #[test]
    fn every_alias_is_reachable() {
        for (pattern, sector) in ALIASES {
            assert_eq!(Sector::canonicalize(pattern), Some(*sector), "alias '{pattern}'");
        }
    }

    #[test]
    fn map_keys_serialize_as_canonical_names() {
        let mut weights = BTreeMap::new();
        weights.insert(Sector::Retail, 0.5);
        weights.insert(Sector::DigitalTechnologies, 0.5);

        let json = serde_json::to_string(&weights).unwrap();
        assert_eq!(json, r#"{"Digital&Technologies":0.5,"Retail":0.5}"#);

        let back: BTreeMap<Sector, f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, weights);
    }
}
