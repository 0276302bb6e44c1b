use serde::{Deserialize, Serialize};

use crate::domain::{Institution, InstitutionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecretRequest {
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuthorizationSessionRequest {
    pub client_secret: String,
    pub institution: InstitutionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionSearchQuery {
    pub client_secret: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedInstitutionsQuery {
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionList {
    pub data: Vec<Institution>,
}
