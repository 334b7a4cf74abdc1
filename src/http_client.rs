use crate::config::NetworkConfig;
use crate::error::TaxonomyError;
use futures::TryStreamExt;
use reqwest::{Client, Proxy, Response};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    /// User agent string
    pub user_agent: String,
    /// Proxy applied to every request
    pub proxy: Option<String>,
    /// Pick up proxies from the environment when `proxy` is unset
    pub use_system_proxy: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: format!("taxonomy-reader/{}", env!("CARGO_PKG_VERSION")),
            proxy: None,
            use_system_proxy: true,
        }
    }
}

impl HttpClientConfig {
    /// Backoff before retry number `attempt` (0-based)
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_retry_delay_ms))
    }

    /// Longest a download may take: every attempt timing out, plus the
    /// backoff between attempts
    pub fn download_deadline(&self) -> Duration {
        let attempts = self.retry_attempts.saturating_add(1);
        let requests = Duration::from_secs(self.timeout_seconds).saturating_mul(attempts);
        (0..self.retry_attempts)
            .map(|attempt| self.retry_delay(attempt))
            .fold(requests, Duration::saturating_add)
    }
}

impl From<&NetworkConfig> for HttpClientConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            timeout_seconds: network.timeout_seconds,
            retry_attempts: network.retry_attempts,
            retry_delay_ms: network.retry_delay_ms,
            proxy: network.proxy.clone(),
            use_system_proxy: network.use_system_proxy,
            ..Default::default()
        }
    }
}

/// Async HTTP client for downloading remote taxonomy documents
pub struct AsyncHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl AsyncHttpClient {
    /// Create a new async HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, TaxonomyError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10);

        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy.as_str())
                .map_err(|e| TaxonomyError::Config(format!("Invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        } else if !config.use_system_proxy {
            builder = builder.no_proxy();
        }

        let client = builder.build().map_err(TaxonomyError::from)?;

        Ok(Self { client, config })
    }

    /// Download a document, failing on an empty body
    ///
    /// Some servers answer a missing document with a success status and no
    /// content, so a zero-byte payload is reported as `FetchFailed`.
    pub async fn download_document(&self, url: &str) -> Result<Vec<u8>, TaxonomyError> {
        let response = self.get_response_with_retry(url).await?;

        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = TryStreamExt::try_next(&mut stream)
            .await
            .map_err(TaxonomyError::from)?
        {
            buffer.extend_from_slice(&chunk);
        }

        if buffer.is_empty() {
            return Err(TaxonomyError::fetch_failed(
                url,
                "server returned an empty document (probably 404)",
            ));
        }

        Ok(buffer)
    }

    /// Get response with retry logic
    async fn get_response_with_retry(&self, url: &str) -> Result<Response, TaxonomyError> {
        let mut current_attempt = 0;

        loop {
            match self.make_request(url).await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    let error = TaxonomyError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                        message: format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    };

                    // Retry on server errors (5xx) but not client errors (4xx)
                    if status.is_server_error() && current_attempt < self.config.retry_attempts {
                        tracing::debug!(url, status = status.as_u16(), "retrying download");
                        self.wait_before_retry(current_attempt).await;
                        current_attempt += 1;
                        continue;
                    }

                    return Err(error);
                }
                Err(error) => {
                    if current_attempt < self.config.retry_attempts
                        && self.is_retryable_error(&error)
                    {
                        tracing::debug!(url, %error, "retrying download");
                        self.wait_before_retry(current_attempt).await;
                        current_attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Make a single HTTP request with timeout
    async fn make_request(&self, url: &str) -> Result<Response, TaxonomyError> {
        let request_future = self.client.get(url).send();

        timeout(
            Duration::from_secs(self.config.timeout_seconds),
            request_future,
        )
        .await
        .map_err(|_| self.timeout_error(url))?
        .map_err(|e| {
            // The client's own timeout races the one above
            if e.is_timeout() {
                self.timeout_error(url)
            } else {
                TaxonomyError::from(e)
            }
        })
    }

    fn timeout_error(&self, url: &str) -> TaxonomyError {
        TaxonomyError::Timeout {
            url: url.to_string(),
            timeout_seconds: self.config.timeout_seconds,
        }
    }

    /// Wait before retry with exponential backoff
    async fn wait_before_retry(&self, attempt: u32) {
        sleep(self.retry_delay(attempt)).await;
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.config.retry_delay(attempt)
    }

    /// Check if an error is retryable
    fn is_retryable_error(&self, error: &TaxonomyError) -> bool {
        match error {
            TaxonomyError::Http(reqwest_error) => {
                reqwest_error.is_timeout() || reqwest_error.is_connect() || reqwest_error.is_request()
            }
            TaxonomyError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}
