use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(InstitutionId);
id_newtype!(ManifestId);
id_newtype!(AuthorizationSessionId);

/// Identifier of the next screen the flow should present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextPane {
    Consent,
    InstitutionPicker,
    PartnerAuth,
    AccountPicker,
    AttachLinkedPaymentAccount,
    ManualEntry,
    ManualEntrySuccess,
    Reset,
    Success,
    UnexpectedError,
    #[serde(other)]
    Unparsable,
}

impl NextPane {
    pub fn as_str(self) -> &'static str {
        match self {
            NextPane::Consent => "consent",
            NextPane::InstitutionPicker => "institution_picker",
            NextPane::PartnerAuth => "partner_auth",
            NextPane::AccountPicker => "account_picker",
            NextPane::AttachLinkedPaymentAccount => "attach_linked_payment_account",
            NextPane::ManualEntry => "manual_entry",
            NextPane::ManualEntrySuccess => "manual_entry_success",
            NextPane::Reset => "reset",
            NextPane::Success => "success",
            NextPane::UnexpectedError => "unexpected_error",
            NextPane::Unparsable => "unparsable",
        }
    }
}

impl std::fmt::Display for NextPane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Server-authoritative state of the whole linking session.
///
/// Fields the client does not interpret are kept in `extra` so a manifest can
/// be handed back to the presentation layer exactly as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: ManifestId,
    pub next_pane: NextPane,
    #[serde(default)]
    pub allow_manual_entry: bool,
    #[serde(default)]
    pub institution_search_disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    #[serde(default)]
    pub livemode: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationSession {
    pub id: AuthorizationSessionId,
    pub next_pane: NextPane,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_skip_account_selection: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
