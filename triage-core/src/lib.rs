pub mod auth;
pub mod directory;
pub mod error;
pub mod inference;
pub mod models;
pub mod result_store;
pub mod storage;
pub mod transport;
pub mod validation;

// Re-export commonly used types
pub use auth::{AuthApi, AuthSession, HttpAuthApi, SimulatedAuthApi};
pub use directory::{
    DoctorDirectory, FilterCriteria, HttpDoctorDirectory, Region, SpecialtyTier,
    StaticDoctorDirectory, filter, format_phone_number, regions,
};
pub use error::{AuthError, StorageError, ValidationError};
pub use inference::{
    HttpInferenceClient, InferenceClient, InferenceResponse, SimulatedInferenceClient,
};
pub use models::{AuthResponse, Classification, DiagnosisResult, Doctor, User};
pub use result_store::{MAX_RESULTS, ResultExport, ResultStore, StorageInfo};
pub use storage::{FileStorage, InMemoryStorage, KeyValueStorage};
pub use transport::TransportError;
pub use validation::ImageUpload;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upload_to_history() {
        let storage = Arc::new(InMemoryStorage::new());
        let store = ResultStore::new(storage);
        let inference = SimulatedInferenceClient::new();

        let upload = ImageUpload::new("chest.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF]);
        upload.validate().unwrap();

        let result = inference.classify(&upload).await.unwrap();
        let stored = store.save(result);

        let history = store.get_all();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], stored);
        assert_eq!(history[0].filename.as_deref(), Some("chest.jpg"));
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let doctors = vec![Doctor {
            id: 7,
            name: "Dr. Hala Nabil".to_string(),
            specialization: "Chest Consultant".to_string(),
            location: "Zamalek".to_string(),
            country: "القاهرة".to_string(),
            phone_number: "01099999999".to_string(),
            email: "hala@example.com".to_string(),
        }];
        let directory = StaticDoctorDirectory::new(doctors);

        let fetched = directory.fetch_all().await.unwrap();
        let cairo = regions()
            .into_iter()
            .find(|region| region.label == "Cairo")
            .unwrap();
        let matched = filter(&fetched, &FilterCriteria::new().region(cairo.value).search("chest"));
        assert_eq!(matched.len(), 1);
        assert_eq!(SpecialtyTier::of(&matched[0].specialization), SpecialtyTier::Consultant);
        assert_eq!(format_phone_number(&matched[0].phone_number), "+20 01099999999");
    }
}
