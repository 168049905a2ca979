use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Label returned by the inference service for a chest X-ray.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Classification {
    Normal,
    BacterialPneumonia,
    ViralPneumonia,
    Covid19,
    /// A label this client does not recognise, kept verbatim.
    Other(String),
}

impl Classification {
    pub fn label(&self) -> &str {
        match self {
            Self::Normal => "Normal",
            Self::BacterialPneumonia => "Bacterial Pneumonia",
            Self::ViralPneumonia => "Viral Pneumonia",
            Self::Covid19 => "COVID-19",
            Self::Other(label) => label,
        }
    }

    /// Follow-up guidance shown next to a result.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Normal => {
                "The chest X-ray appears normal with no signs of pneumonia. Continue regular monitoring as appropriate."
            }
            Self::BacterialPneumonia => {
                "Bacterial pneumonia detected. Consider antibiotic treatment and follow-up imaging. Consult with a specialist if needed."
            }
            Self::ViralPneumonia => {
                "Viral pneumonia detected. Supportive care is typically recommended. Monitor symptoms and consider follow-up evaluation."
            }
            Self::Covid19 | Self::Other(_) => {
                "Please consult with a healthcare professional for proper interpretation of these results."
            }
        }
    }
}

impl From<String> for Classification {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "normal" => Self::Normal,
            "bacterial" | "bacterial pneumonia" => Self::BacterialPneumonia,
            "viral" | "viral pneumonia" => Self::ViralPneumonia,
            "covid" | "covid19" | "covid 19" => Self::Covid19,
            _ => Self::Other(raw),
        }
    }
}

impl From<&str> for Classification {
    fn from(raw: &str) -> Self {
        Self::from(raw.to_string())
    }
}

impl From<Classification> for String {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Other(label) => label,
            known => known.label().to_string(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One completed analysis, as persisted in the local result history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub classification: Classification,
    /// Percentage in [0, 100].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Bytes. Kept as the number that was stored or received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<Number>,
    /// Milliseconds, possibly fractional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<Number>,
    /// Per-class percentages when the endpoint reports a full breakdown.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, f64>,
    /// Any other fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DiagnosisResult {
    pub fn new(classification: impl Into<Classification>, confidence: f64) -> Self {
        Self {
            id: None,
            timestamp: None,
            classification: classification.into(),
            confidence,
            model_name: None,
            filename: None,
            file_size: None,
            processing_time: None,
            scores: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_file(mut self, filename: impl Into<String>, file_size: u64) -> Self {
        self.filename = Some(filename.into());
        self.file_size = Some(Number::from(file_size));
        self
    }
}

/// A referral doctor as served by the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    pub id: i64,
    pub name: String,
    pub specialization: String,
    pub location: String,
    /// Region code; the directory filter matches it exactly.
    pub country: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub email: String,
}

impl Doctor {
    pub(crate) fn matches_search(&self, needle: &str) -> bool {
        [&self.name, &self.specialization, &self.location]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}
