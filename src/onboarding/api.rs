//! Remote onboarding service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::OnboardingConfig;
use crate::error::HttpError;
use crate::http::JsonClient;
use crate::types::Address;

/// `GET /accounts/{address}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    /// `None` when the account never signed.
    pub last_signed_version: Option<u32>,
}

/// `GET /accounts/{address}/message`. Each challenge is single-use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignChallenge {
    pub message: String,
    pub version: u32,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
struct SignatureSubmission<'a> {
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct SignatureVerdict {
    success: bool,
}

#[async_trait]
pub trait OnboardingApi: Send + Sync {
    /// Currently required terms version.
    async fn sign_message_version(&self) -> Result<u32, HttpError>;

    async fn account(&self, address: &Address) -> Result<AccountStatus, HttpError>;

    async fn sign_message(&self, address: &Address) -> Result<SignChallenge, HttpError>;

    /// Whether the server accepted `signature` for challenge `request_id`.
    async fn submit_signature(
        &self,
        address: &Address,
        request_id: &str,
        signature: &str,
    ) -> Result<bool, HttpError>;
}

#[derive(Debug, Clone)]
pub struct HttpOnboardingApi {
    http: JsonClient,
}

impl HttpOnboardingApi {
    pub fn new(config: &OnboardingConfig) -> Result<Self, HttpError> {
        let endpoint = config.api_endpoint.as_deref().ok_or_else(|| {
            HttpError::Config("ONBOARD_API_ENDPOINT is not configured".to_string())
        })?;
        Ok(Self {
            http: JsonClient::new("onboarding", endpoint, config.timeout, config.max_retries)?,
        })
    }

    pub fn with_client(http: JsonClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl OnboardingApi for HttpOnboardingApi {
    #[instrument(skip_all)]
    async fn sign_message_version(&self) -> Result<u32, HttpError> {
        self.http
            .get_json("sign_message_version", "signMessageVersion")
            .await
    }

    #[instrument(skip_all, fields(%address))]
    async fn account(&self, address: &Address) -> Result<AccountStatus, HttpError> {
        self.http
            .get_json("get_account", &format!("accounts/{address}"))
            .await
    }

    #[instrument(skip_all, fields(%address))]
    async fn sign_message(&self, address: &Address) -> Result<SignChallenge, HttpError> {
        self.http
            .get_json("get_sign_message", &format!("accounts/{address}/message"))
            .await
    }

    #[instrument(skip_all, fields(%address, request_id = %request_id))]
    async fn submit_signature(
        &self,
        address: &Address,
        request_id: &str,
        signature: &str,
    ) -> Result<bool, HttpError> {
        let path = format!(
            "accounts/{address}/signature/{}",
            urlencoding::encode(request_id)
        );
        let verdict: SignatureVerdict = self
            .http
            .post_json_once("post_signature", &path, &SignatureSubmission { signature })
            .await?;
        Ok(verdict.success)
    }
}
