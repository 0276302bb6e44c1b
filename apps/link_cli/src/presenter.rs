//! Terminal rendering of coordinator and search notifications.

use std::{collections::HashMap, sync::Arc};

use flow_client::{FlowEvent, FlowOperation, SearchEvent};
use shared::domain::{Institution, InstitutionId, NextPane};
use tokio::sync::{broadcast, RwLock};

/// Institutions the user has seen so far, so `pick <id>` can resolve names.
pub type KnownInstitutions = Arc<RwLock<HashMap<InstitutionId, Institution>>>;

pub fn describe_flow_event(event: &FlowEvent) -> String {
    match event {
        FlowEvent::NextPaneChanged(step) if step.pane == NextPane::Success => {
            format!("next pane: {} (v{}) - account linked", step.pane, step.version)
        }
        FlowEvent::NextPaneChanged(step) => {
            format!("next pane: {} (v{})", step.pane, step.version)
        }
        FlowEvent::ManifestUpdated(manifest) => {
            format!("manifest {} updated", manifest.id)
        }
        FlowEvent::AuthorizationSessionUpdated(session) => match &session.url {
            Some(url) => format!("authorization session {}: continue at {url}", session.id),
            None => format!("authorization session {}", session.id),
        },
        FlowEvent::OperationFailed { operation, error } => {
            let operation = match operation {
                FlowOperation::AcceptConsent => "accepting consent",
            };
            format!("error while {operation}: {error}; try again")
        }
    }
}

/// Returns `None` for events with nothing worth printing.
pub fn describe_search_event(event: &SearchEvent) -> Option<String> {
    match event {
        SearchEvent::ResultsChanged(institutions) if institutions.is_empty() => None,
        SearchEvent::ResultsChanged(institutions) => {
            Some(format_institutions("results", institutions))
        }
        SearchEvent::FeaturedInstitutionsLoaded(institutions) => {
            Some(format_institutions("featured", institutions))
        }
        SearchEvent::NoResults { query } => Some(format!("no results for \"{query}\"")),
        SearchEvent::ErrorShown(true) => {
            Some("search failed; edit the query to retry".to_string())
        }
        SearchEvent::Loading(true) => Some("searching...".to_string()),
        SearchEvent::FeaturedLoading(true) => Some("loading featured institutions...".to_string()),
        SearchEvent::TerminalError {
            error,
            allow_manual_entry,
        } => {
            let choices = if *allow_manual_entry {
                "type `manual` to enter your account details, or `quit` to close"
            } else {
                "type `quit` to close"
            };
            Some(format!("could not load institutions: {error}\n{choices}"))
        }
        SearchEvent::ErrorShown(false) | SearchEvent::Loading(false) | SearchEvent::FeaturedLoading(false) => {
            None
        }
    }
}

fn format_institutions(title: &str, institutions: &[Institution]) -> String {
    let mut out = format!("{title}:");
    for institution in institutions {
        out.push_str(&format!("\n  {}  {}", institution.id, institution.name));
    }
    out
}

pub async fn print_flow_events(mut events: broadcast::Receiver<FlowEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe_flow_event(&event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "flow notifications lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub async fn print_search_events(
    mut events: broadcast::Receiver<SearchEvent>,
    known: KnownInstitutions,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let SearchEvent::ResultsChanged(institutions)
                | SearchEvent::FeaturedInstitutionsLoaded(institutions) = &event
                {
                    let mut known = known.write().await;
                    for institution in institutions {
                        known.insert(institution.id.clone(), institution.clone());
                    }
                }
                if let Some(line) = describe_search_event(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "search notifications lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
