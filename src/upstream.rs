/// Upstream advisory services
///
/// Thin HTTP clients for the externally-hosted collaborators: the crop
/// prediction model, the plant-disease image model, the chat assistant, and
/// the weather provider. The core's only contract with them is that calls
/// are gated by the access-control chain and recorded into the quota
/// tracker; their payloads pass through opaquely.
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::config::UpstreamConfig;
use crate::error::{ApiError, ApiResult};

/// Soil and climate parameters for a crop recommendation
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SoilSample {
    /// Nitrogen content in soil
    #[serde(rename = "N")]
    #[validate(range(min = 0.0, max = 200.0, message = "must be between 0 and 200"))]
    pub n: f64,
    /// Phosphorus content in soil
    #[serde(rename = "P")]
    #[validate(range(min = 0.0, max = 200.0, message = "must be between 0 and 200"))]
    pub p: f64,
    /// Potassium content in soil
    #[serde(rename = "K")]
    #[validate(range(min = 0.0, max = 200.0, message = "must be between 0 and 200"))]
    pub k: f64,
    /// Temperature in Celsius
    #[validate(range(min = 0.0, max = 50.0, message = "must be between 0 and 50"))]
    pub temperature: f64,
    /// Humidity percentage
    #[validate(range(min = 0.0, max = 100.0, message = "must be between 0 and 100"))]
    pub humidity: f64,
    /// pH value of soil
    #[validate(range(min = 0.0, max = 14.0, message = "must be between 0 and 14"))]
    pub ph: f64,
    /// Rainfall in mm
    #[validate(range(min = 0.0, max = 500.0, message = "must be between 0 and 500"))]
    pub rainfall: f64,
}

/// Prediction returned by the crop model: one category plus a probability
/// distribution over all categories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropPrediction {
    pub predicted_crop: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_probabilities: Option<BTreeMap<String, f64>>,
}

/// Disease detection request; the image travels base64-encoded
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DiseaseRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub image: String,
    pub crop_type: Option<String>,
}

/// Chat assistant request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000, message = "must be between 1 and 2000 characters"))]
    pub message: String,
}

/// HTTP clients for all upstream advisory services
#[derive(Clone)]
pub struct AdvisoryClients {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl AdvisoryClients {
    pub fn new(config: UpstreamConfig) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::Internal(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Ask the prediction model for the best crop given soil parameters
    pub async fn recommend_crop(&self, sample: &SoilSample) -> ApiResult<CropPrediction> {
        let url = format!("{}/predict", self.config.prediction_url.trim_end_matches('/'));
        let timer = crate::metrics::UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&["prediction"])
            .start_timer();

        // The model endpoint takes the feature names verbatim
        let body = json!({
            "N": sample.n,
            "P": sample.p,
            "K": sample.k,
            "temperature": sample.temperature,
            "humidity": sample.humidity,
            "ph": sample.ph,
            "rainfall": sample.rainfall,
        });

        let response = self.http.post(&url).json(&body).send().await;
        timer.observe_duration();

        let response = response
            .map_err(|e| ApiError::Upstream(format!("prediction service unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "prediction service returned {}",
                response.status()
            )));
        }

        response
            .json::<CropPrediction>()
            .await
            .map_err(|e| ApiError::Upstream(format!("malformed prediction response: {}", e)))
    }

    /// Submit a plant image to the disease model; the report passes through
    pub async fn detect_disease(&self, request: &DiseaseRequest) -> ApiResult<Value> {
        let url = format!("{}/detect", self.config.disease_url.trim_end_matches('/'));
        let timer = crate::metrics::UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&["disease"])
            .start_timer();

        let body = json!({
            "image": request.image,
            "cropType": request.crop_type,
        });

        let response = self.http.post(&url).json(&body).send().await;
        timer.observe_duration();

        passthrough_json(response, "disease service").await
    }

    /// Forward a message to the chat assistant; the completion passes through
    pub async fn chat(&self, request: &ChatRequest) -> ApiResult<Value> {
        let url = format!("{}/chat", self.config.chat_url.trim_end_matches('/'));
        let timer = crate::metrics::UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&["chat"])
            .start_timer();

        let mut builder = self.http.post(&url).json(&json!({
            "message": request.message,
        }));
        if let Some(ref key) = self.config.chat_api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await;
        timer.observe_duration();

        passthrough_json(response, "chat service").await
    }

    /// Look up current weather for a location
    pub async fn weather(&self, location: &str) -> ApiResult<Value> {
        let timer = crate::metrics::UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&["weather"])
            .start_timer();

        let mut builder = self
            .http
            .get(&self.config.weather_url)
            .query(&[("q", location), ("units", "metric")]);
        if let Some(ref key) = self.config.weather_api_key {
            builder = builder.query(&[("appid", key)]);
        }

        let response = builder.send().await;
        timer.observe_duration();

        passthrough_json(response, "weather service").await
    }
}

async fn passthrough_json(
    response: Result<reqwest::Response, reqwest::Error>,
    service: &str,
) -> ApiResult<Value> {
    let response =
        response.map_err(|e| ApiError::Upstream(format!("{} unreachable: {}", service, e)))?;

    if !response.status().is_success() {
        return Err(ApiError::Upstream(format!(
            "{} returned {}",
            service,
            response.status()
        )));
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| ApiError::Upstream(format!("malformed {} response: {}", service, e)))
}
