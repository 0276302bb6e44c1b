//! Flow state coordinator: owns the current pane of the linking flow and
//! arbitrates completions of the mutating Request Service calls.
//!
//! Every mutating call reserves a version when it is initiated. A completion
//! may only move the flow forward if its version is newer than the one
//! currently applied, so a slow, older response can never overwrite the
//! result of a newer call.

use std::sync::Arc;

use shared::domain::{AuthorizationSession, Institution, InstitutionId, NextPane, SessionManifest};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{AuthFlowError, FinancialConnectionsApi, RequestError};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionedNextPane {
    pub pane: NextPane,
    pub version: u64,
}

/// Operations whose failure is reported to subscribers. A failed institution
/// pick is only logged, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOperation {
    AcceptConsent,
}

#[derive(Debug, Clone)]
pub enum FlowEvent {
    NextPaneChanged(VersionedNextPane),
    ManifestUpdated(SessionManifest),
    AuthorizationSessionUpdated(AuthorizationSession),
    OperationFailed {
        operation: FlowOperation,
        error: RequestError,
    },
}

/// Synchronous core of the coordinator. Holds no I/O; every transition
/// returns the notifications it produced, in emission order.
#[derive(Debug, Clone)]
pub struct AuthFlowState {
    manifest: SessionManifest,
    authorization_session: Option<AuthorizationSession>,
    current: VersionedNextPane,
    issued_version: u64,
}

impl AuthFlowState {
    pub fn new(initial: SessionManifest) -> Self {
        let current = VersionedNextPane {
            pane: initial.next_pane,
            version: 0,
        };
        Self {
            manifest: initial,
            authorization_session: None,
            current,
            issued_version: 0,
        }
    }

    pub fn current_step(&self) -> NextPane {
        self.current.pane
    }

    pub fn versioned_step(&self) -> VersionedNextPane {
        self.current
    }

    pub fn manifest(&self) -> &SessionManifest {
        &self.manifest
    }

    pub fn authorization_session(&self) -> Option<&AuthorizationSession> {
        self.authorization_session.as_ref()
    }

    /// Hands out the version for a call that is about to be sent.
    pub fn reserve_version(&mut self) -> u64 {
        self.issued_version += 1;
        self.issued_version
    }

    pub fn apply_consent_result(
        &mut self,
        version: u64,
        result: Result<SessionManifest, RequestError>,
    ) -> Vec<FlowEvent> {
        match result {
            Ok(manifest) => {
                let next_pane = manifest.next_pane;
                self.manifest = manifest.clone();
                let mut events = vec![FlowEvent::ManifestUpdated(manifest)];
                events.extend(self.update_next_pane(next_pane, version));
                events
            }
            Err(error) => {
                warn!(version, %error, "auth flow: consent acquisition failed");
                vec![FlowEvent::OperationFailed {
                    operation: FlowOperation::AcceptConsent,
                    error,
                }]
            }
        }
    }

    pub fn apply_authorization_session_result(
        &mut self,
        version: u64,
        institution_id: &InstitutionId,
        result: Result<AuthorizationSession, RequestError>,
    ) -> Vec<FlowEvent> {
        match result {
            Ok(session) => {
                let next_pane = session.next_pane;
                self.authorization_session = Some(session.clone());
                let mut events = vec![FlowEvent::AuthorizationSessionUpdated(session)];
                events.extend(self.update_next_pane(next_pane, version));
                events
            }
            Err(error) => {
                // The manifest and the authorization session are two separate
                // sources of truth; a failed pick leaves both untouched.
                warn!(
                    version,
                    institution_id = %institution_id,
                    %error,
                    "auth flow: authorization session creation failed"
                );
                Vec::new()
            }
        }
    }

    /// Moves the flow to manual entry without a request, if the manifest
    /// allows it. Takes its own version, so it beats any earlier call still in
    /// flight.
    pub fn enter_manual_entry(&mut self) -> Vec<FlowEvent> {
        if !self.manifest.allow_manual_entry {
            debug!(
                manifest_id = %self.manifest.id,
                "auth flow: manual entry not allowed for this session"
            );
            return Vec::new();
        }
        let version = self.reserve_version();
        self.update_next_pane(NextPane::ManualEntry, version)
            .into_iter()
            .collect()
    }

    fn update_next_pane(&mut self, pane: NextPane, version: u64) -> Option<FlowEvent> {
        if version > self.current.version {
            self.current = VersionedNextPane { pane, version };
            Some(FlowEvent::NextPaneChanged(self.current))
        } else {
            debug!(
                version,
                applied_version = self.current.version,
                pane = %pane,
                "auth flow: dropping superseded next pane"
            );
            None
        }
    }
}

/// Latest state published to readers after every transition.
#[derive(Debug, Clone)]
struct PublishedFlowState {
    step: VersionedNextPane,
    manifest: SessionManifest,
    authorization_session: Option<AuthorizationSession>,
}

impl PublishedFlowState {
    fn from_state(state: &AuthFlowState) -> Self {
        Self {
            step: state.versioned_step(),
            manifest: state.manifest().clone(),
            authorization_session: state.authorization_session().cloned(),
        }
    }
}

enum FlowCommand {
    AcceptConsent,
    SelectInstitution(Institution),
    ManualEntry,
    Shutdown,
}

enum FlowCompletion {
    Consent {
        version: u64,
        result: Result<SessionManifest, RequestError>,
    },
    AuthorizationSession {
        version: u64,
        institution_id: InstitutionId,
        result: Result<AuthorizationSession, RequestError>,
    },
}

/// Handle to the coordinator task.
///
/// Cloning the handle shares the same coordinator. The task stops when
/// [`AuthFlowDataManager::shutdown`] is called or every handle is dropped;
/// requests still in flight at that point are aborted.
#[derive(Clone)]
pub struct AuthFlowDataManager {
    commands: mpsc::UnboundedSender<FlowCommand>,
    published: watch::Receiver<PublishedFlowState>,
    events: broadcast::WeakSender<FlowEvent>,
}

impl AuthFlowDataManager {
    /// Starts the coordinator on the current tokio runtime.
    pub fn spawn(
        initial: SessionManifest,
        api: Arc<dyn FinancialConnectionsApi>,
        client_secret: impl Into<String>,
    ) -> Self {
        let state = AuthFlowState::new(initial);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = watch::channel(PublishedFlowState::from_state(&state));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = AuthFlowActor {
            state,
            api,
            client_secret: Arc::from(client_secret.into()),
            commands: commands_rx,
            requests: JoinSet::new(),
            published: published_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            published: published_rx,
            events: events.downgrade(),
        }
    }

    pub fn current_step(&self) -> NextPane {
        self.published.borrow().step.pane
    }

    pub fn versioned_step(&self) -> VersionedNextPane {
        self.published.borrow().step
    }

    pub fn manifest(&self) -> SessionManifest {
        self.published.borrow().manifest.clone()
    }

    pub fn authorization_session(&self) -> Option<AuthorizationSession> {
        self.published.borrow().authorization_session.clone()
    }

    pub fn accept_consent(&self) -> Result<(), AuthFlowError> {
        self.send(FlowCommand::AcceptConsent)
    }

    pub fn select_institution(&self, institution: Institution) -> Result<(), AuthFlowError> {
        self.send(FlowCommand::SelectInstitution(institution))
    }

    /// Leaves the institution flow for manual account entry. Ignored unless
    /// the current manifest sets `allow_manual_entry`.
    pub fn choose_manual_entry(&self) -> Result<(), AuthFlowError> {
        self.send(FlowCommand::ManualEntry)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(FlowCommand::Shutdown);
    }

    /// Receivers see `RecvError::Closed` once the coordinator has stopped.
    pub fn subscribe_events(&self) -> broadcast::Receiver<FlowEvent> {
        match self.events.upgrade() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    fn send(&self, command: FlowCommand) -> Result<(), AuthFlowError> {
        self.commands
            .send(command)
            .map_err(|_| AuthFlowError::Closed)
    }
}

struct AuthFlowActor {
    state: AuthFlowState,
    api: Arc<dyn FinancialConnectionsApi>,
    client_secret: Arc<str>,
    commands: mpsc::UnboundedReceiver<FlowCommand>,
    requests: JoinSet<FlowCompletion>,
    published: watch::Sender<PublishedFlowState>,
    events: broadcast::Sender<FlowEvent>,
}

impl AuthFlowActor {
    async fn run(mut self) {
        info!(
            manifest_id = %self.state.manifest().id,
            next_pane = %self.state.current_step(),
            "auth flow: coordinator started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(FlowCommand::AcceptConsent) => self.start_consent(),
                    Some(FlowCommand::SelectInstitution(institution)) => {
                        self.start_institution_selection(institution)
                    }
                    Some(FlowCommand::ManualEntry) => {
                        let events = self.state.enter_manual_entry();
                        self.publish(events);
                    }
                    Some(FlowCommand::Shutdown) | None => break,
                },
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    match joined {
                        Ok(completion) => self.complete(completion),
                        Err(err) if err.is_cancelled() => {}
                        Err(err) => error!(%err, "auth flow: request task panicked"),
                    }
                }
            }
        }

        self.requests.shutdown().await;
        info!("auth flow: coordinator stopped");
    }

    fn start_consent(&mut self) {
        let version = self.state.reserve_version();
        debug!(version, "auth flow: acquiring consent");

        let api = Arc::clone(&self.api);
        let client_secret = Arc::clone(&self.client_secret);
        self.requests.spawn(async move {
            let result = api.acquire_consent(&client_secret).await;
            FlowCompletion::Consent { version, result }
        });
    }

    fn start_institution_selection(&mut self, institution: Institution) {
        let version = self.state.reserve_version();
        debug!(
            version,
            institution_id = %institution.id,
            "auth flow: creating authorization session"
        );

        let api = Arc::clone(&self.api);
        let client_secret = Arc::clone(&self.client_secret);
        self.requests.spawn(async move {
            let result = api
                .create_authorization_session(&client_secret, &institution.id)
                .await;
            FlowCompletion::AuthorizationSession {
                version,
                institution_id: institution.id,
                result,
            }
        });
    }

    fn complete(&mut self, completion: FlowCompletion) {
        let events = match completion {
            FlowCompletion::Consent { version, result } => {
                self.state.apply_consent_result(version, result)
            }
            FlowCompletion::AuthorizationSession {
                version,
                institution_id,
                result,
            } => self
                .state
                .apply_authorization_session_result(version, &institution_id, result),
        };
        self.publish(events);
    }

    fn publish(&self, events: Vec<FlowEvent>) {
        if events.is_empty() {
            return;
        }

        self.published
            .send_replace(PublishedFlowState::from_state(&self.state));
        for event in events {
            if let FlowEvent::NextPaneChanged(step) = &event {
                info!(
                    pane = %step.pane,
                    version = step.version,
                    "auth flow: next pane updated"
                );
            }
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
#[path = "tests/auth_flow_tests.rs"]
mod tests;
