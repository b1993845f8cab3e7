//! Review records and the fixed vocabularies used on review cards
//!
//! Cards list pros, cons and the typical use of the car with Ukrainian
//! labels. Those labels are stored as stable English names so the data can
//! be queried without knowing the site's wording; the card text itself is
//! kept next to them.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A car characteristic a reviewer can list as a pro or a con
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Characteristic {
    Acceleration,
    Brakes,
    BuildQuality,
    ExteriorDesign,
    FuelConsumption,
    GroundClearance,
    Handling,
    InteriorSpace,
    MaterialQuality,
    MaintenanceCost,
    Price,
    SoundInsulation,
    Transmission,
    TrunkSpace,
}

impl Characteristic {
    pub const ALL: [Characteristic; 14] = [
        Characteristic::Acceleration,
        Characteristic::Brakes,
        Characteristic::BuildQuality,
        Characteristic::ExteriorDesign,
        Characteristic::FuelConsumption,
        Characteristic::GroundClearance,
        Characteristic::Handling,
        Characteristic::InteriorSpace,
        Characteristic::MaterialQuality,
        Characteristic::MaintenanceCost,
        Characteristic::Price,
        Characteristic::SoundInsulation,
        Characteristic::Transmission,
        Characteristic::TrunkSpace,
    ];

    /// Label shown on the review card
    pub fn label(self) -> &'static str {
        match self {
            Characteristic::Acceleration => "динаміка",
            Characteristic::Brakes => "гальма",
            Characteristic::BuildQuality => "якість збірки",
            Characteristic::ExteriorDesign => "дизайн кузова",
            Characteristic::FuelConsumption => "витрати палива",
            Characteristic::GroundClearance => "дорожній просвіт",
            Characteristic::Handling => "керованість",
            Characteristic::InteriorSpace => "простір салону",
            Characteristic::MaterialQuality => "якість матеріалів",
            Characteristic::MaintenanceCost => "вартість обслуговування",
            Characteristic::Price => "ціна",
            Characteristic::SoundInsulation => "шумоізоляція",
            Characteristic::Transmission => "коробка передач",
            Characteristic::TrunkSpace => "об`єм багажника",
        }
    }

    /// Looks up a card label, ignoring surrounding whitespace
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// What the reviewer mostly uses the car for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriveType {
    CityTrips,
    CommercialTransport,
    Family,
    Travel,
}

impl DriveType {
    pub const ALL: [DriveType; 4] = [
        DriveType::CityTrips,
        DriveType::CommercialTransport,
        DriveType::Family,
        DriveType::Travel,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DriveType::CityTrips => "Поїздки в місті",
            DriveType::CommercialTransport => "Комерційні перевезення",
            DriveType::Family => "Сім'я",
            DriveType::Travel => "Подорожі",
        }
    }

    /// Stored name, identical to the serialized form
    pub fn name(self) -> &'static str {
        match self {
            DriveType::CityTrips => "CITY_TRIPS",
            DriveType::CommercialTransport => "COMMERCIAL_TRANSPORT",
            DriveType::Family => "FAMILY",
            DriveType::Travel => "TRAVEL",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|d| d.label() == label)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.name() == name)
    }
}

/// A single review card from the listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Relative link to the full review; identifies the record
    pub link: String,
    pub name: String,
    pub year: u16,
    pub review_text: Option<String>,
    pub total_rating: Option<f64>,
    /// Category (English) -> score
    pub rating_components: BTreeMap<String, u8>,
    pub mileage: Option<u32>,
    pub fuel_consumption: Option<f64>,
    pub drive_type: Option<DriveType>,
    /// Recognised pros; `pros_text` keeps every label as shown
    pub pros: Vec<Characteristic>,
    pub pros_text: Option<String>,
    pub cons: Vec<Characteristic>,
    pub cons_text: Option<String>,
    pub date: Option<NaiveDate>,
}

impl Review {
    /// Creates a review with only its identifying fields set
    pub fn new(link: impl Into<String>, name: impl Into<String>, year: u16) -> Self {
        Self {
            link: link.into(),
            name: name.into(),
            year,
            review_text: None,
            total_rating: None,
            rating_components: BTreeMap::new(),
            mileage: None,
            fuel_consumption: None,
            drive_type: None,
            pros: Vec::new(),
            pros_text: None,
            cons: Vec::new(),
            cons_text: None,
            date: None,
        }
    }
}
