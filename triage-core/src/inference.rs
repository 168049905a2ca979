use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::{
    models::{Classification, DiagnosisResult},
    storage::KeyValueStorage,
    transport::{TransportError, read_json, with_bearer},
    validation::ImageUpload,
};

pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends an X-ray to a classifier and returns the normalized result.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn classify(&self, upload: &ImageUpload) -> Result<DiagnosisResult, TransportError>;
}

/// The two response shapes served by the inference endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InferenceResponse {
    /// Live classifier: confidence is a probability in [0, 1].
    Scored {
        predicted_class: String,
        confidence: f64,
        #[serde(default)]
        all_predictions: BTreeMap<String, f64>,
    },
    /// Upload API: confidence is already a percentage.
    Labelled {
        classification: String,
        confidence: f64,
        #[serde(default, rename = "processingTime")]
        processing_time: Option<Number>,
        #[serde(default, rename = "gradCam")]
        grad_cam: Option<Value>,
    },
}

impl InferenceResponse {
    pub fn parse(body: &Value) -> Result<Self, TransportError> {
        Self::deserialize(body).map_err(|e| {
            TransportError::InvalidResponse(format!("unrecognised inference response: {}", e))
        })
    }

    /// Fold either shape into a [`DiagnosisResult`] with percentage confidences.
    pub fn into_result(self) -> Result<DiagnosisResult, TransportError> {
        match self {
            Self::Scored {
                predicted_class,
                confidence,
                all_predictions,
            } => {
                let mut result =
                    DiagnosisResult::new(predicted_class, percentage(confidence * 100.0)?);
                for (label, score) in all_predictions {
                    result.scores.insert(label, percentage(score * 100.0)?);
                }
                Ok(result)
            }
            Self::Labelled {
                classification,
                confidence,
                processing_time,
                grad_cam,
            } => {
                let mut result = DiagnosisResult::new(classification, percentage(confidence)?);
                result.processing_time = processing_time;
                if let Some(grad_cam) = grad_cam {
                    result.extra.insert("gradCam".to_string(), grad_cam);
                }
                Ok(result)
            }
        }
    }
}

fn percentage(value: f64) -> Result<f64, TransportError> {
    if !value.is_finite() {
        return Err(TransportError::InvalidResponse(format!(
            "confidence is not a number: {}",
            value
        )));
    }
    Ok(value.clamp(0.0, 100.0))
}

/// Multipart upload to a remote classifier.
pub struct HttpInferenceClient {
    client: reqwest::Client,
    endpoint: String,
    field_name: String,
    model_name: Option<String>,
    token_storage: Option<Arc<dyn KeyValueStorage>>,
}

impl HttpInferenceClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            field_name: "image".to_string(),
            model_name: None,
            token_storage: None,
        })
    }

    /// Multipart field carrying the image ("image" or "file" depending on the endpoint).
    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = field_name.into();
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Read the bearer token from this storage on every request.
    pub fn with_token_storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
        self.token_storage = Some(storage);
        self
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn classify(&self, upload: &ImageUpload) -> Result<DiagnosisResult, TransportError> {
        info!(
            "Sending {} ({} bytes) to {}",
            upload.filename,
            upload.size(),
            self.endpoint
        );

        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
            .file_name(upload.filename.clone())
            .mime_str(&upload.content_type)?;
        let form = reqwest::multipart::Form::new().part(self.field_name.clone(), part);
        let request = with_bearer(
            self.client.post(&self.endpoint).multipart(form),
            self.token_storage.as_ref(),
        );

        let started = Instant::now();
        let response = request.send().await?;
        let body: Value = read_json(response).await?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!("Inference response after {} ms: {}", elapsed, body);

        let mut result = InferenceResponse::parse(&body)?.into_result()?;
        result
            .processing_time
            .get_or_insert_with(|| Number::from(elapsed));
        result.model_name = self.model_name.clone();
        result.filename = Some(upload.filename.clone());
        result.file_size = Some(Number::from(upload.size() as u64));
        Ok(result)
    }
}

/// Random classifier for demos and tests. Never touches the network.
#[derive(Default)]
pub struct SimulatedInferenceClient {
    latency: Option<Duration>,
}

impl SimulatedInferenceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
        }
    }

    fn sample() -> (Classification, f64, u64) {
        let mut rng = rand::rng();
        let classification = match rng.random_range(0..3) {
            0 => Classification::Normal,
            1 => Classification::BacterialPneumonia,
            _ => Classification::ViralPneumonia,
        };
        let confidence: u32 = match classification {
            Classification::Normal => rng.random_range(85..100),
            Classification::BacterialPneumonia => rng.random_range(75..95),
            _ => rng.random_range(70..95),
        };
        let processing_time: u64 = rng.random_range(1000..4000);
        (classification, f64::from(confidence), processing_time)
    }
}

#[async_trait]
impl InferenceClient for SimulatedInferenceClient {
    async fn classify(&self, upload: &ImageUpload) -> Result<DiagnosisResult, TransportError> {
        let (classification, confidence, processing_time) = Self::sample();
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        info!(
            "Simulated inference for {}: {} ({}%)",
            upload.filename, classification, confidence
        );

        let mut result = DiagnosisResult::new(classification, confidence)
            .with_file(upload.filename.clone(), upload.size() as u64);
        result.model_name = Some("simulated".to_string());
        result.processing_time = Some(Number::from(processing_time));
        Ok(result)
    }
}
