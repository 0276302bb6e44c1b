//! Search-as-you-type over the institution directory.
//!
//! Keystrokes are debounced by [`SEARCH_QUERY_DELAY`]. Each scheduled fetch is
//! tagged with a fresh [`SearchEpoch`]; only the completion whose epoch is the
//! one currently in flight may touch the displayed results.

use std::{sync::Arc, time::Duration};

use shared::domain::{Institution, SessionManifest};
use tokio::{
    sync::{broadcast, mpsc},
    task::{AbortHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{FinancialConnectionsApi, RequestError, SearchError};

pub const SEARCH_QUERY_DELAY: Duration = Duration::from_millis(200);

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchEpoch(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPhase {
    Idle,
    PendingFetch { epoch: SearchEpoch, query: String },
    InFlight { epoch: SearchEpoch, query: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchEvent {
    ResultsChanged(Vec<Institution>),
    Loading(bool),
    ErrorShown(bool),
    NoResults { query: String },
    FeaturedLoading(bool),
    FeaturedInstitutionsLoaded(Vec<Institution>),
    /// The picker cannot continue. The user may close the flow with `error`,
    /// or switch to manual entry when `allow_manual_entry` is set.
    TerminalError {
        error: RequestError,
        allow_manual_entry: bool,
    },
}

/// Per-session switches taken from the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub search_enabled: bool,
    pub allow_manual_entry: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_enabled: true,
            allow_manual_entry: false,
        }
    }
}

impl SearchOptions {
    pub fn from_manifest(manifest: &SessionManifest) -> Self {
        Self {
            search_enabled: !manifest.institution_search_disabled,
            allow_manual_entry: manifest.allow_manual_entry,
        }
    }
}

/// What the caller has to do after a text change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChangeOutcome {
    pub events: Vec<SearchEvent>,
    pub schedule: Option<SearchEpoch>,
}

#[derive(Debug, Clone)]
pub struct SearchState {
    phase: SearchPhase,
    last_epoch: u64,
}

impl Default for SearchState {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchState {
    pub fn new() -> Self {
        Self {
            phase: SearchPhase::Idle,
            last_epoch: 0,
        }
    }

    pub fn phase(&self) -> &SearchPhase {
        &self.phase
    }

    /// Supersedes whatever was pending or in flight.
    pub fn on_text_changed(&mut self, query: &str) -> TextChangeOutcome {
        let mut events = vec![SearchEvent::ErrorShown(false)];

        if query.is_empty() {
            self.phase = SearchPhase::Idle;
            events.push(SearchEvent::ResultsChanged(Vec::new()));
            events.push(SearchEvent::Loading(false));
            return TextChangeOutcome {
                events,
                schedule: None,
            };
        }

        self.last_epoch += 1;
        let epoch = SearchEpoch(self.last_epoch);
        self.phase = SearchPhase::PendingFetch {
            epoch,
            query: query.to_string(),
        };
        events.push(SearchEvent::Loading(true));
        TextChangeOutcome {
            events,
            schedule: Some(epoch),
        }
    }

    /// Returns the query to dispatch, or `None` if the schedule was superseded.
    pub fn on_quiet_period_elapsed(&mut self, epoch: SearchEpoch) -> Option<String> {
        let query = match &self.phase {
            SearchPhase::PendingFetch {
                epoch: pending,
                query,
            } if *pending == epoch => query.clone(),
            _ => return None,
        };
        self.phase = SearchPhase::InFlight {
            epoch,
            query: query.clone(),
        };
        Some(query)
    }

    pub fn on_search_completed(
        &mut self,
        epoch: SearchEpoch,
        result: Result<Vec<Institution>, RequestError>,
    ) -> Vec<SearchEvent> {
        let query = match &self.phase {
            SearchPhase::InFlight {
                epoch: current,
                query,
            } if *current == epoch => query.clone(),
            _ => {
                debug!(?epoch, "institution search: dropping superseded result");
                return Vec::new();
            }
        };
        self.phase = SearchPhase::Idle;

        let mut events = Vec::with_capacity(3);
        match result {
            Ok(institutions) => {
                let empty = institutions.is_empty();
                events.push(SearchEvent::ResultsChanged(institutions));
                if empty {
                    events.push(SearchEvent::NoResults { query });
                }
            }
            Err(err) => {
                warn!(%err, %query, "institution search: fetch failed");
                events.push(SearchEvent::ResultsChanged(Vec::new()));
                events.push(SearchEvent::ErrorShown(true));
            }
        }
        events.push(SearchEvent::Loading(false));
        events
    }
}

enum SearchCommand {
    TextChanged(String),
    LoadFeatured,
    Shutdown,
}

enum SearchTaskOutput {
    QuietPeriodElapsed(SearchEpoch),
    SearchCompleted {
        epoch: SearchEpoch,
        result: Result<Vec<Institution>, RequestError>,
    },
    FeaturedLoaded(Result<Vec<Institution>, RequestError>),
}

/// Handle to the search task. Mirrors [`crate::AuthFlowDataManager`]: cloning
/// shares the task, dropping every handle stops it.
#[derive(Clone)]
pub struct InstitutionSearch {
    commands: mpsc::UnboundedSender<SearchCommand>,
    events: broadcast::WeakSender<SearchEvent>,
}

impl InstitutionSearch {
    /// Starts the search task on the current tokio runtime.
    ///
    /// With `search_enabled` false (the manifest disabled search) text changes
    /// are ignored; featured institutions can still be loaded.
    pub fn spawn(
        api: Arc<dyn FinancialConnectionsApi>,
        client_secret: impl Into<String>,
        options: SearchOptions,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = SearchActor {
            state: SearchState::new(),
            api,
            client_secret: Arc::from(client_secret.into()),
            options,
            commands: commands_rx,
            tasks: JoinSet::new(),
            pending_fetch: None,
            events: events.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            events: events.downgrade(),
        }
    }

    pub fn on_text_changed(&self, query: impl Into<String>) -> Result<(), SearchError> {
        self.send(SearchCommand::TextChanged(query.into()))
    }

    pub fn load_featured(&self) -> Result<(), SearchError> {
        self.send(SearchCommand::LoadFeatured)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SearchCommand::Shutdown);
    }

    /// Receivers see `RecvError::Closed` once the search task has stopped.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SearchEvent> {
        match self.events.upgrade() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    fn send(&self, command: SearchCommand) -> Result<(), SearchError> {
        self.commands.send(command).map_err(|_| SearchError::Closed)
    }
}

struct SearchActor {
    state: SearchState,
    api: Arc<dyn FinancialConnectionsApi>,
    client_secret: Arc<str>,
    options: SearchOptions,
    commands: mpsc::UnboundedReceiver<SearchCommand>,
    tasks: JoinSet<SearchTaskOutput>,
    pending_fetch: Option<AbortHandle>,
    events: broadcast::Sender<SearchEvent>,
}

impl SearchActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SearchCommand::TextChanged(query)) => self.text_changed(&query),
                    Some(SearchCommand::LoadFeatured) => self.load_featured(),
                    Some(SearchCommand::Shutdown) | None => break,
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(output) => self.task_finished(output),
                        Err(err) if err.is_cancelled() => {}
                        Err(err) => error!(%err, "institution search: task panicked"),
                    }
                }
            }
        }

        self.tasks.shutdown().await;
        debug!("institution search: stopped");
    }

    fn text_changed(&mut self, query: &str) {
        if !self.options.search_enabled {
            debug!("institution search: disabled for this session, ignoring input");
            return;
        }

        if let Some(pending) = self.pending_fetch.take() {
            pending.abort();
        }

        let outcome = self.state.on_text_changed(query);
        if let Some(epoch) = outcome.schedule {
            self.pending_fetch = Some(self.tasks.spawn(async move {
                tokio::time::sleep(SEARCH_QUERY_DELAY).await;
                SearchTaskOutput::QuietPeriodElapsed(epoch)
            }));
        }
        self.emit(outcome.events);
    }

    fn load_featured(&mut self) {
        let _ = self.events.send(SearchEvent::FeaturedLoading(true));
        let api = Arc::clone(&self.api);
        let client_secret = Arc::clone(&self.client_secret);
        self.tasks.spawn(async move {
            SearchTaskOutput::FeaturedLoaded(api.fetch_featured_institutions(&client_secret).await)
        });
    }

    fn task_finished(&mut self, output: SearchTaskOutput) {
        match output {
            SearchTaskOutput::QuietPeriodElapsed(epoch) => {
                let Some(query) = self.state.on_quiet_period_elapsed(epoch) else {
                    return;
                };
                self.pending_fetch = None;
                debug!(?epoch, %query, "institution search: dispatching");

                let api = Arc::clone(&self.api);
                let client_secret = Arc::clone(&self.client_secret);
                self.tasks.spawn(async move {
                    let result = api.search_institutions(&client_secret, &query).await;
                    SearchTaskOutput::SearchCompleted { epoch, result }
                });
            }
            SearchTaskOutput::SearchCompleted { epoch, result } => {
                let events = self.state.on_search_completed(epoch, result);
                self.emit(events);
            }
            SearchTaskOutput::FeaturedLoaded(result) => {
                match result {
                    Ok(institutions) => {
                        info!(
                            count = institutions.len(),
                            "institution search: featured institutions loaded"
                        );
                        let _ = self
                            .events
                            .send(SearchEvent::FeaturedInstitutionsLoaded(institutions));
                    }
                    Err(error) => {
                        warn!(%error, "institution search: featured institutions failed");
                        let _ = self.events.send(SearchEvent::TerminalError {
                            error,
                            allow_manual_entry: self.options.allow_manual_entry,
                        });
                    }
                }
                let _ = self.events.send(SearchEvent::FeaturedLoading(false));
            }
        }
    }

    fn emit(&self, events: Vec<SearchEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
#[path = "tests/institution_search_tests.rs"]
mod tests;
