//! HTTP client implementation using reqwest

use crate::config::SecretString;
use crate::http::{RequestOptions, REQUEST_ID_HEADER};
use crate::providers::vendor::{Completion, CompletionRequest, Vendor};
use crate::providers::BackendError;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum response size (10MB)
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Default user agent
const USER_AGENT: &str = concat!("docval/", env!("CARGO_PKG_VERSION"));

/// A decoded completion plus the raw response headers
#[derive(Debug, Clone)]
pub struct HttpCompletion {
    pub completion: Completion,
    pub headers: HeaderMap,
}

/// Shared HTTP client with connection pooling
#[derive(Clone)]
pub struct HttpClient {
    /// The underlying reqwest client
    client: Arc<Client>,

    /// Maximum response size to prevent OOM
    max_response_size: usize,
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, BackendError> {
        Self::with_config(Duration::from_secs(10), Duration::from_secs(60), 10)
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_config(
        connect_timeout: Duration,
        request_timeout: Duration,
        max_idle_per_host: usize,
    ) -> Result<Self, BackendError> {
        let client = ClientBuilder::new()
            .pool_max_idle_per_host(max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(|e| {
                BackendError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client: Arc::new(client),
            max_response_size: MAX_RESPONSE_SIZE,
        })
    }

    /// Build the full URL for a vendor
    fn build_url(vendor: &dyn Vendor) -> String {
        format!("{}{}", vendor.base_url().trim_end_matches('/'), vendor.endpoint())
    }

    /// Check response size to prevent OOM
    fn check_content_length(&self, response: &Response) -> Result<(), BackendError> {
        if let Some(content_length) = response.content_length() {
            if content_length as usize > self.max_response_size {
                return Err(BackendError::Other(format!(
                    "Response size {} exceeds maximum {}",
                    content_length, self.max_response_size
                )));
            }
        }

        Ok(())
    }

    /// Execute one completion against a vendor
    pub async fn execute_completion(
        &self,
        vendor: &dyn Vendor,
        api_key: Option<&SecretString>,
        request: &CompletionRequest,
        options: &RequestOptions,
    ) -> Result<HttpCompletion, BackendError> {
        let request_id = options.request_id;

        // Fail fast instead of sending a request that will certainly be rejected
        let api_key = api_key.filter(|k| !k.is_empty()).map(|k| k.expose_secret());
        if vendor.requires_api_key() && api_key.is_none() {
            return Err(BackendError::MissingCredentials(vendor.name().to_string()));
        }

        let url = Self::build_url(vendor);
        info!(
            "Executing {} request to {} [request_id: {}]",
            options.label(),
            vendor.name(),
            request_id
        );
        debug!("Request URL: {}", url);

        let body = vendor.build_body(request);

        let mut req_builder = self.client.post(&url).timeout(options.timeout).json(&body);

        for (key, value) in vendor.headers(api_key) {
            req_builder = req_builder.header(key, value);
        }

        req_builder = req_builder.header(REQUEST_ID_HEADER, request_id.to_string());

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                warn!("Request timeout for {} [request_id: {}]", vendor.name(), request_id);
                BackendError::Timeout
            } else if e.is_connect() {
                error!(
                    "Connection error for {} [request_id: {}]: {}",
                    vendor.name(),
                    request_id,
                    e
                );
                BackendError::Network(format!(
                    "Connection failed: {} [request_id: {}]",
                    e, request_id
                ))
            } else {
                error!("Request error for {} [request_id: {}]: {}", vendor.name(), request_id, e);
                BackendError::Network(format!("{} [request_id: {}]", e, request_id))
            }
        })?;

        let status = response.status();
        debug!("Response status: {} [request_id: {}]", status, request_id);
        let headers = response.headers().clone();

        if !status.is_success() {
            let body = response.text().await.ok();

            warn!(
                "Request failed with status {} for {} [request_id: {}]",
                status,
                vendor.name(),
                request_id
            );

            return Err(crate::http::error::map_http_error(
                status,
                Some(&headers),
                body,
                request_id,
            ));
        }

        self.check_content_length(&response)?;

        let response_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout
            } else {
                BackendError::Network(format!(
                    "Failed to read response body: {} [request_id: {}]",
                    e, request_id
                ))
            }
        })?;

        if response_text.len() > self.max_response_size {
            return Err(BackendError::Other(format!(
                "Response size {} exceeds maximum {} [request_id: {}]",
                response_text.len(),
                self.max_response_size,
                request_id
            )));
        }

        let json = serde_json::from_str(&response_text).map_err(|e| {
            error!(
                "Failed to parse response from {} [request_id: {}]: {}",
                vendor.name(),
                request_id,
                e
            );
            BackendError::parse(format!("Invalid response envelope: {}", e), response_text.clone())
        })?;

        let completion = vendor.decode(json)?;

        info!(
            "Request completed successfully for {} [request_id: {}]",
            vendor.name(),
            request_id
        );

        Ok(HttpCompletion { completion, headers })
    }
}
