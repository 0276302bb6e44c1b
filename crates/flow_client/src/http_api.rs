use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{AuthorizationSession, Institution, InstitutionId, SessionManifest},
    error::ErrorEnvelope,
    protocol::{
        ClientSecretRequest, CreateAuthorizationSessionRequest, FeaturedInstitutionsQuery,
        InstitutionList, InstitutionSearchQuery,
    },
};
use tracing::debug;
use url::Url;

use crate::{FinancialConnectionsApi, RequestError};

const CONSENT_ACQUIRED_PATH: &str = "v1/link_account_sessions/consent_acquired";
const SYNCHRONIZE_PATH: &str = "v1/link_account_sessions/synchronize";
const AUTH_SESSIONS_PATH: &str = "v1/connections/auth_sessions";
const INSTITUTIONS_PATH: &str = "v1/connections/institutions";
const FEATURED_INSTITUTIONS_PATH: &str = "v1/connections/featured_institutions";

pub struct HttpFinancialConnectionsApi {
    http: Client,
    base_url: Url,
}

impl HttpFinancialConnectionsApi {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(http, normalize_base_url(base_url)?))
    }

    pub fn with_client(http: Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Fetches the manifest a flow is started from.
    pub async fn synchronize(&self, client_secret: &str) -> Result<SessionManifest, RequestError> {
        self.post_json(
            SYNCHRONIZE_PATH,
            &ClientSecretRequest {
                client_secret: client_secret.to_string(),
            },
        )
        .await
    }

    fn endpoint(&self, path: &str) -> Result<Url, RequestError> {
        self.base_url
            .join(path)
            .map_err(|err| RequestError::Transport(format!("invalid endpoint '{path}': {err}")))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "financial connections: POST");
        let response = self.http.post(url).json(body).send().await?;
        decode_response(response).await
    }

    async fn get_json<Q, T>(&self, path: &str, query: &Q) -> Result<T, RequestError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%url, "financial connections: GET");
        let response = self.http.get(url).query(query).send().await?;
        decode_response(response).await
    }
}

#[async_trait]
impl FinancialConnectionsApi for HttpFinancialConnectionsApi {
    async fn acquire_consent(&self, client_secret: &str) -> Result<SessionManifest, RequestError> {
        self.post_json(
            CONSENT_ACQUIRED_PATH,
            &ClientSecretRequest {
                client_secret: client_secret.to_string(),
            },
        )
        .await
    }

    async fn create_authorization_session(
        &self,
        client_secret: &str,
        institution_id: &InstitutionId,
    ) -> Result<AuthorizationSession, RequestError> {
        self.post_json(
            AUTH_SESSIONS_PATH,
            &CreateAuthorizationSessionRequest {
                client_secret: client_secret.to_string(),
                institution: institution_id.clone(),
            },
        )
        .await
    }

    async fn search_institutions(
        &self,
        client_secret: &str,
        query: &str,
    ) -> Result<Vec<Institution>, RequestError> {
        let list: InstitutionList = self
            .get_json(
                INSTITUTIONS_PATH,
                &InstitutionSearchQuery {
                    client_secret: client_secret.to_string(),
                    query: query.to_string(),
                },
            )
            .await?;
        Ok(list.data)
    }

    async fn fetch_featured_institutions(
        &self,
        client_secret: &str,
    ) -> Result<Vec<Institution>, RequestError> {
        let list: InstitutionList = self
            .get_json(
                FEATURED_INSTITUTIONS_PATH,
                &FeaturedInstitutionsQuery {
                    client_secret: client_secret.to_string(),
                },
            )
            .await?;
        Ok(list.data)
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, RequestError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| RequestError::Decode(err.to_string()));
    }

    let body = response.bytes().await?;
    match serde_json::from_slice::<ErrorEnvelope>(&body) {
        Ok(envelope) => Err(RequestError::Api(envelope.error)),
        Err(_) => Err(RequestError::Status(status.as_u16())),
    }
}

/// Makes sure relative endpoint paths are joined below the base path instead
/// of replacing its last segment.
pub fn normalize_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
#[path = "tests/http_api_tests.rs"]
mod tests;
