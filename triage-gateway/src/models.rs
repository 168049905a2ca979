use serde::{Deserialize, Serialize};
use triage_core::{DiagnosisResult, Doctor, SpecialtyTier, User, format_phone_number};

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: Option<User>,
}

/// A stored result plus the guidance shown next to it.
#[derive(Debug, Serialize)]
pub struct DiagnosisResponse {
    pub result: DiagnosisResult,
    pub recommendation: String,
}

impl From<DiagnosisResult> for DiagnosisResponse {
    fn from(result: DiagnosisResult) -> Self {
        let recommendation = result.classification.recommendation().to_string();
        Self {
            result,
            recommendation,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorView {
    #[serde(flatten)]
    pub doctor: Doctor,
    pub tier: SpecialtyTier,
    pub display_phone: String,
}

impl From<Doctor> for DoctorView {
    fn from(doctor: Doctor) -> Self {
        Self {
            tier: SpecialtyTier::of(&doctor.specialization),
            display_phone: format_phone_number(&doctor.phone_number),
            doctor,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorSearchResponse {
    pub total: usize,
    pub matched: usize,
    pub doctors: Vec<DoctorView>,
}
