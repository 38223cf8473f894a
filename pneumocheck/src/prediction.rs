use crate::config::PredictionServiceConfig;
use crate::image::SelectedImage;
use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Url,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::instrument;

const UPLOAD_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum PredictionServiceError {
    #[error("Invalid prediction service URL `{url}`: {reason}")]
    InvalidEndpoint { url: String, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    ClientInit(#[source] reqwest::Error),
    #[error("Failed to reach the prediction service: {}", error_chain(.0))]
    Network(#[source] reqwest::Error),
    #[error("HTTP error! status: {status}.{}", server_response(.body))]
    Server { status: u16, body: Option<String> },
    #[error("Could not encode the image for upload: {0}")]
    MalformedInput(String),
    #[error("Unexpected response from the prediction service: {0}")]
    UnexpectedResponse(String),
}

/// reqwest keeps the interesting part (refused, reset, DNS) in its sources.
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

fn server_response(body: &Option<String>) -> String {
    match body {
        Some(body) => format!(" Server response: {}", body),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictedClass {
    Normal,
    Pneumonia,
}

impl PredictedClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedClass::Normal => "NORMAL",
            PredictedClass::Pneumonia => "PNEUMONIA",
        }
    }
}

impl fmt::Display for PredictedClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for PredictedClass {
    type Error = PredictionServiceError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "PNEUMONIA" => Ok(Self::Pneumonia),
            other => Err(PredictionServiceError::UnexpectedResponse(format!(
                "unknown predicted class `{}`",
                other
            ))),
        }
    }
}

/// Body returned by the inference server on success.
#[derive(Debug, Deserialize)]
pub struct PredictionResponse {
    pub predicted_class: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub predicted_class: PredictedClass,
    /// Percentage in `[0, 100]`.
    pub confidence: f64,
}

impl PredictionResult {
    pub fn formatted_confidence(&self) -> String {
        format!("{:.2}%", self.confidence)
    }
}

impl TryFrom<PredictionResponse> for PredictionResult {
    type Error = PredictionServiceError;

    fn try_from(response: PredictionResponse) -> Result<Self, Self::Error> {
        let predicted_class = PredictedClass::try_from(response.predicted_class.as_str())?;

        if !(0.0..=100.0).contains(&response.confidence) {
            return Err(PredictionServiceError::UnexpectedResponse(format!(
                "confidence {} is outside [0, 100]",
                response.confidence
            )));
        }

        Ok(Self {
            predicted_class,
            confidence: response.confidence,
        })
    }
}

#[async_trait]
pub trait Predictor: Send + Sync + 'static {
    async fn predict(&self, image: &SelectedImage)
        -> Result<PredictionResult, PredictionServiceError>;
}

/// Client for the remote inference endpoint. One multipart `POST` per call,
/// no retries, transport default timeouts.
#[derive(Debug, Clone)]
pub struct PredictionService {
    client: Client,
    endpoint: Url,
}

impl PredictionService {
    pub fn new(config: &PredictionServiceConfig) -> Result<Self, PredictionServiceError> {
        let endpoint =
            Url::parse(&config.url).map_err(|e| PredictionServiceError::InvalidEndpoint {
                url: config.url.clone(),
                reason: e.to_string(),
            })?;

        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(PredictionServiceError::ClientInit)?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn encode(image: &SelectedImage) -> Result<Form, PredictionServiceError> {
        if image.bytes.is_empty() {
            return Err(PredictionServiceError::MalformedInput(
                "image payload is empty".into(),
            ));
        }

        let part = Part::stream_with_length(image.bytes.clone(), image.bytes.len() as u64)
            .file_name(image.name.clone())
            .mime_str(&image.media_type)
            .map_err(|e| {
                PredictionServiceError::MalformedInput(format!(
                    "missing or invalid MIME type `{}`: {}",
                    image.media_type, e
                ))
            })?;

        Ok(Form::new().part(UPLOAD_FIELD, part))
    }
}

#[async_trait]
impl Predictor for PredictionService {
    #[instrument(skip(self, image), fields(file_name = %image.name, size = image.size))]
    async fn predict(
        &self,
        image: &SelectedImage,
    ) -> Result<PredictionResult, PredictionServiceError> {
        let form = Self::encode(image)?;

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(PredictionServiceError::Network)?;

        let status = response.status();
        if !status.is_success() {
            // Best effort: an unreadable or blank body is reported as absent.
            let body = response
                .text()
                .await
                .ok()
                .map(|body| body.trim().to_string())
                .filter(|body| !body.is_empty());
            tracing::warn!(status = status.as_u16(), ?body, "Prediction service returned an error");
            return Err(PredictionServiceError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let payload: PredictionResponse = response
            .json()
            .await
            .map_err(|e| PredictionServiceError::UnexpectedResponse(e.to_string()))?;
        let result = PredictionResult::try_from(payload)?;

        tracing::info!(
            predicted_class = %result.predicted_class,
            confidence = result.confidence,
            "Prediction received"
        );

        Ok(result)
    }
}
