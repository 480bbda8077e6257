use std::future::Future;
use std::time::Duration;

use equipment_contracts::{
    Credentials, ErrorBody, HistoryEntry, MessageResponse, SummaryStats, TokenResponse,
};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;

mod cancel;

pub use cancel::{CancelToken, TaskSet};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The service answered with a non-success status.
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

/// Unauthenticated entry point. Logging in yields an [`ApiSession`] that
/// carries the bearer token for every later call.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Per-call deadline applied on top of cancellation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<String, ClientError> {
        let body = credentials(username, password);
        let message = self
            .guarded(None, async {
                let response = self.http.post(self.url("/signup")).json(&body).send().await?;
                read_json::<MessageResponse>(response).await
            })
            .await?;
        tracing::debug!(username, "account created");
        Ok(message.message)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<ApiSession, ClientError> {
        let body = credentials(username, password);
        let issued = self
            .guarded(None, async {
                let response = self.http.post(self.url("/token")).json(&body).send().await?;
                read_json::<TokenResponse>(response).await
            })
            .await?;
        tracing::debug!(username, "session opened");

        Ok(ApiSession {
            client: self.clone(),
            username: username.to_string(),
            token: issued.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn guarded<T, F>(&self, cancel: Option<&CancelToken>, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let timeout = self.timeout;
        let timed = tokio::time::timeout(timeout, call);

        let Some(cancel) = cancel else {
            return timed.await.map_err(|_| ClientError::Timeout(timeout))?;
        };
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            res = timed => res.map_err(|_| ClientError::Timeout(timeout))?,
        }
    }
}

/// One login session. The token lives here and nowhere else; dropping or
/// [`ApiSession::logout`] ends the session on this side.
pub struct ApiSession {
    client: ApiClient,
    username: String,
    token: String,
}

impl std::fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("base_url", &self.client.base_url)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A downloaded report with the file name the service suggested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ApiSession {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub async fn upload_csv(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        cancel: &CancelToken,
    ) -> Result<SummaryStats, ClientError> {
        let file_bytes = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("text/csv")?;
        let form = Form::new().part("file", part);

        let stats = self
            .client
            .guarded(Some(cancel), async {
                let response = self
                    .client
                    .http
                    .post(self.client.url("/upload"))
                    .bearer_auth(&self.token)
                    .multipart(form)
                    .send()
                    .await?;
                read_json::<SummaryStats>(response).await
            })
            .await?;
        tracing::debug!(file_bytes, total_equipment = stats.total_equipment, "upload accepted");
        Ok(stats)
    }

    pub async fn history(&self, cancel: &CancelToken) -> Result<Vec<HistoryEntry>, ClientError> {
        self.client
            .guarded(Some(cancel), async {
                let response = self
                    .client
                    .http
                    .get(self.client.url("/history"))
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                read_json::<Vec<HistoryEntry>>(response).await
            })
            .await
    }

    pub async fn download_report(&self, cancel: &CancelToken) -> Result<ReportFile, ClientError> {
        self.client
            .guarded(Some(cancel), async {
                let response = self
                    .client
                    .http
                    .get(self.client.url("/report"))
                    .bearer_auth(&self.token)
                    .send()
                    .await?;
                let response = check_status(response).await?;
                let filename = response
                    .headers()
                    .get(reqwest::header::CONTENT_DISPOSITION)
                    .and_then(|value| value.to_str().ok())
                    .and_then(attachment_filename)
                    .unwrap_or_else(|| "report.pdf".to_string());
                let bytes = response.bytes().await?.to_vec();
                Ok::<_, ClientError>(ReportFile { filename, bytes })
            })
            .await
    }

    pub fn logout(self) {
        tracing::debug!(username = %self.username, "session closed");
    }
}

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice::<T>(&bytes).map_err(|err| ClientError::Decode(err.to_string()))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let bytes = response.bytes().await?;
    let body = serde_json::from_slice::<ErrorBody>(&bytes).ok();
    Err(ClientError::Api {
        status: status.as_u16(),
        code: body.as_ref().and_then(|b| b.code.clone()),
        message: body
            .map(|b| b.error)
            .unwrap_or_else(|| status.to_string()),
    })
}

fn attachment_filename(disposition: &str) -> Option<String> {
    disposition.split(';').find_map(|part| {
        let value = part.trim().strip_prefix("filename=")?;
        let value = value.trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}
