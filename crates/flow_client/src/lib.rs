use async_trait::async_trait;
use shared::domain::{AuthorizationSession, Institution, InstitutionId, SessionManifest};

pub mod auth_flow;
pub mod error;
pub mod http_api;
pub mod institution_search;

pub use auth_flow::{AuthFlowDataManager, AuthFlowState, FlowEvent, FlowOperation, VersionedNextPane};
pub use error::{AuthFlowError, RequestError, SearchError};
pub use http_api::HttpFinancialConnectionsApi;
pub use institution_search::{
    InstitutionSearch, SearchEpoch, SearchEvent, SearchOptions, SearchPhase, SearchState,
    SEARCH_QUERY_DELAY,
};

/// Remote operations the linking flow depends on.
///
/// Each call resolves exactly once. The client secret is passed through
/// untouched; implementations own transport concerns such as timeouts.
#[async_trait]
pub trait FinancialConnectionsApi: Send + Sync {
    async fn acquire_consent(&self, client_secret: &str) -> Result<SessionManifest, RequestError>;
    async fn create_authorization_session(
        &self,
        client_secret: &str,
        institution_id: &InstitutionId,
    ) -> Result<AuthorizationSession, RequestError>;
    async fn search_institutions(
        &self,
        client_secret: &str,
        query: &str,
    ) -> Result<Vec<Institution>, RequestError>;
    async fn fetch_featured_institutions(
        &self,
        client_secret: &str,
    ) -> Result<Vec<Institution>, RequestError>;
}

#[cfg(test)]
#[path = "tests/scripted_api.rs"]
pub(crate) mod scripted_api;
