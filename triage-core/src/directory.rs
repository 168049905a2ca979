use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

use crate::{
    models::Doctor,
    transport::{TransportError, send_json},
};

/// Transient search state from the directory page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default, alias = "region")]
    pub selected_region: Option<String>,
    #[serde(default, alias = "search")]
    pub search_term: Option<String>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.selected_region = Some(region.into());
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search_term = Some(term.into());
        self
    }

    fn active_region(&self) -> Option<&str> {
        self.selected_region.as_deref().filter(|region| !region.is_empty())
    }

    fn needle(&self) -> Option<String> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }
}

/// Doctors matching both the region and the search term, in input order.
pub fn filter(doctors: &[Doctor], criteria: &FilterCriteria) -> Vec<Doctor> {
    let region = criteria.active_region();
    let needle = criteria.needle();

    doctors
        .iter()
        .filter(|doctor| region.is_none_or(|region| doctor.country == region))
        .filter(|doctor| {
            needle
                .as_deref()
                .is_none_or(|needle| doctor.matches_search(needle))
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    /// Value the directory stores in `Doctor::country`.
    pub value: &'static str,
    pub label: &'static str,
}

/// Directory records use both spellings of Sharkia, so both stay selectable.
const GOVERNORATES: &[Region] = &[
    Region { value: "الجيزة", label: "Giza" },
    Region { value: "القاهرة", label: "Cairo" },
    Region { value: "الاسكندرية", label: "Alexandria" },
    Region { value: "الشرقية", label: "Sharkia" },
    Region { value: "المنيا", label: "Minya" },
    Region { value: "الوادي الجديد", label: "New Valley" },
    Region { value: "الفيوم", label: "Faiyum" },
    Region { value: "المنوفية", label: "Menoufia" },
    Region { value: "الغربية", label: "Gharbia" },
    Region { value: "الشرقيه", label: "Sharkia (الشرقيه)" },
    Region { value: "الدمياط", label: "Dakahlia" },
    Region { value: "البحر الأحمر", label: "Red Sea" },
    Region { value: "السنبلاوين", label: "Sohag" },
    Region { value: "الاسماعيلية", label: "Ismailia" },
    Region { value: "كفر الشيخ", label: "Kafr el-Sheikh" },
    Region { value: "Port Said", label: "Port Said" },
    Region { value: "السويس", label: "Suez" },
    Region { value: "الاقصر", label: "Luxor" },
    Region { value: "اسيوط", label: "Asyut" },
    Region { value: "البحيرة", label: "Beheira" },
    Region { value: "مرسى مطروح", label: "Matruh" },
    Region { value: "المنيا", label: "Minya" },
    Region { value: "الوادي الجديد", label: "New Valley" },
    Region { value: "شمال سيناء", label: "North Sinai" },
    Region { value: "جنوب سيناء", label: "South Sinai" },
];

/// Selectable regions, one per distinct value, in display order.
pub fn regions() -> Vec<Region> {
    let mut seen = HashSet::new();
    GOVERNORATES
        .iter()
        .copied()
        .filter(|region| seen.insert(region.value))
        .collect()
}

/// Seniority badge derived from a free-text specialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpecialtyTier {
    Consultant,
    Professor,
    Specialist,
    General,
}

impl SpecialtyTier {
    pub fn of(specialization: &str) -> Self {
        if specialization.contains("Consultant") {
            Self::Consultant
        } else if specialization.contains("Professor") {
            Self::Professor
        } else if specialization.contains("Specialist") {
            Self::Specialist
        } else {
            Self::General
        }
    }
}

/// Prefix Egyptian mobile and landline numbers with the country code.
pub fn format_phone_number(phone: &str) -> String {
    if ["01", "02", "03"].iter().any(|prefix| phone.starts_with(prefix)) {
        format!("+20 {}", phone)
    } else {
        phone.to_string()
    }
}

/// Source of the full doctor list. Fetched once per page visit.
#[async_trait]
pub trait DoctorDirectory: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Doctor>, TransportError>;
}

pub struct HttpDoctorDirectory {
    client: reqwest::Client,
    url: String,
}

impl HttpDoctorDirectory {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl DoctorDirectory for HttpDoctorDirectory {
    async fn fetch_all(&self) -> Result<Vec<Doctor>, TransportError> {
        info!("Fetching doctor directory from {}", self.url);
        let doctors: Vec<Doctor> = send_json(self.client.get(&self.url)).await?;
        info!("Fetched {} doctors", doctors.len());
        Ok(doctors)
    }
}

/// Fixed in-memory directory.
#[derive(Default)]
pub struct StaticDoctorDirectory {
    doctors: Vec<Doctor>,
}

impl StaticDoctorDirectory {
    pub fn new(doctors: Vec<Doctor>) -> Self {
        Self { doctors }
    }
}

#[async_trait]
impl DoctorDirectory for StaticDoctorDirectory {
    async fn fetch_all(&self) -> Result<Vec<Doctor>, TransportError> {
        Ok(self.doctors.clone())
    }
}
