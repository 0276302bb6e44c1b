use super::*;
use crate::scripted_api::{institution, manifest, scripted_api, settle, ApiCall, Reply};
use shared::domain::NextPane;
use tokio::sync::broadcast::error::TryRecvError;

fn drain(events: &mut broadcast::Receiver<SearchEvent>) -> Vec<SearchEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn scheduled(outcome: TextChangeOutcome) -> SearchEpoch {
    outcome.schedule.expect("fetch scheduled")
}

#[test]
fn text_change_schedules_fetch_with_fresh_epoch() {
    let mut state = SearchState::new();

    let first = state.on_text_changed("a");
    assert_eq!(
        first.events,
        vec![SearchEvent::ErrorShown(false), SearchEvent::Loading(true)]
    );
    let first_epoch = scheduled(first);
    let second_epoch = scheduled(state.on_text_changed("ab"));

    assert_ne!(first_epoch, second_epoch);
    assert_eq!(
        state.phase(),
        &SearchPhase::PendingFetch {
            epoch: second_epoch,
            query: "ab".into()
        }
    );
}

#[test]
fn empty_query_clears_results_without_scheduling() {
    let mut state = SearchState::new();
    let pending = scheduled(state.on_text_changed("chase"));

    let outcome = state.on_text_changed("");

    assert_eq!(outcome.schedule, None);
    assert_eq!(
        outcome.events,
        vec![
            SearchEvent::ErrorShown(false),
            SearchEvent::ResultsChanged(Vec::new()),
            SearchEvent::Loading(false),
        ]
    );
    assert_eq!(state.phase(), &SearchPhase::Idle);
    assert_eq!(state.on_quiet_period_elapsed(pending), None);
    assert_eq!(state.phase(), &SearchPhase::Idle);
}

#[test]
fn options_follow_manifest_flags() {
    let mut session = manifest("fcsess_1", NextPane::InstitutionPicker);
    assert_eq!(SearchOptions::from_manifest(&session), SearchOptions::default());

    session.institution_search_disabled = true;
    session.allow_manual_entry = true;
    assert_eq!(
        SearchOptions::from_manifest(&session),
        SearchOptions {
            search_enabled: false,
            allow_manual_entry: true,
        }
    );
}

#[test]
fn superseded_schedule_does_not_dispatch() {
    let mut state = SearchState::new();
    let stale = scheduled(state.on_text_changed("a"));
    let current = scheduled(state.on_text_changed("ab"));

    assert_eq!(state.on_quiet_period_elapsed(stale), None);
    assert_eq!(state.on_quiet_period_elapsed(current), Some("ab".into()));
    assert_eq!(
        state.phase(),
        &SearchPhase::InFlight {
            epoch: current,
            query: "ab".into()
        }
    );
}

#[test]
fn result_of_superseded_fetch_is_dropped() {
    let mut state = SearchState::new();
    let stale = scheduled(state.on_text_changed("a"));
    state.on_quiet_period_elapsed(stale);
    let current = scheduled(state.on_text_changed("ab"));

    let events = state.on_search_completed(stale, Ok(vec![institution("ins_a", "Ally")]));

    assert!(events.is_empty());
    assert!(matches!(state.phase(), SearchPhase::PendingFetch { epoch, .. } if *epoch == current));
}

#[test]
fn empty_result_surfaces_no_results_notice() {
    let mut state = SearchState::new();
    let epoch = scheduled(state.on_text_changed("zzz"));
    state.on_quiet_period_elapsed(epoch);

    let events = state.on_search_completed(epoch, Ok(Vec::new()));

    assert_eq!(
        events,
        vec![
            SearchEvent::ResultsChanged(Vec::new()),
            SearchEvent::NoResults {
                query: "zzz".into()
            },
            SearchEvent::Loading(false),
        ]
    );
    assert_eq!(state.phase(), &SearchPhase::Idle);
}

#[test]
fn failed_fetch_clears_results_and_shows_error() {
    let mut state = SearchState::new();
    let epoch = scheduled(state.on_text_changed("chase"));
    state.on_quiet_period_elapsed(epoch);

    let events = state.on_search_completed(epoch, Err(RequestError::Status(500)));

    assert_eq!(
        events,
        vec![
            SearchEvent::ResultsChanged(Vec::new()),
            SearchEvent::ErrorShown(true),
            SearchEvent::Loading(false),
        ]
    );
}

#[test]
fn clearing_the_query_discards_in_flight_result() {
    let mut state = SearchState::new();
    let epoch = scheduled(state.on_text_changed("chase"));
    state.on_quiet_period_elapsed(epoch);
    state.on_text_changed("");

    assert!(state
        .on_search_completed(epoch, Ok(vec![institution("ins_1", "Chase")]))
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn fetch_waits_for_quiet_period() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());

    search.on_text_changed("chase").expect("text changed");
    tokio::time::sleep(SEARCH_QUERY_DELAY - Duration::from_millis(1)).await;
    assert!(calls.try_next().is_none());

    let call = calls.next().await;
    assert_eq!(
        call.call,
        ApiCall::SearchInstitutions {
            query: "chase".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn rapid_typing_issues_a_single_search() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    for query in ["c", "ch", "cha"] {
        search.on_text_changed(query).expect("text changed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let call = calls.next().await;
    assert_eq!(call.call, ApiCall::SearchInstitutions { query: "cha".into() });
    settle().await;
    assert!(calls.try_next().is_none());

    drain(&mut events);
    call.respond(Reply::Institutions(Ok(vec![institution("ins_1", "Chase")])));
    settle().await;

    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::ResultsChanged(vec![institution("ins_1", "Chase")]),
            SearchEvent::Loading(false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn slower_older_search_does_not_replace_newer_results() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    search.on_text_changed("a").expect("text changed");
    let older = calls.next().await;
    assert_eq!(older.call, ApiCall::SearchInstitutions { query: "a".into() });

    search.on_text_changed("ab").expect("text changed");
    let newer = calls.next().await;
    assert_eq!(newer.call, ApiCall::SearchInstitutions { query: "ab".into() });

    drain(&mut events);
    newer.respond(Reply::Institutions(Ok(vec![institution("ins_ab", "AB Bank")])));
    settle().await;
    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::ResultsChanged(vec![institution("ins_ab", "AB Bank")]),
            SearchEvent::Loading(false),
        ]
    );

    older.respond(Reply::Institutions(Ok(vec![institution("ins_a", "Ally")])));
    settle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn clearing_text_suppresses_in_flight_search() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    search.on_text_changed("chase").expect("text changed");
    let call = calls.next().await;
    search.on_text_changed("").expect("text cleared");
    settle().await;
    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::ErrorShown(false),
            SearchEvent::Loading(true),
            SearchEvent::ErrorShown(false),
            SearchEvent::ResultsChanged(Vec::new()),
            SearchEvent::Loading(false),
        ]
    );

    call.respond(Reply::Institutions(Ok(vec![institution("ins_1", "Chase")])));
    settle().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn clearing_text_cancels_pending_search() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    search.on_text_changed("chase").expect("text changed");
    tokio::time::sleep(SEARCH_QUERY_DELAY / 2).await;
    search.on_text_changed("").expect("text cleared");
    settle().await;
    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::ErrorShown(false),
            SearchEvent::Loading(true),
            SearchEvent::ErrorShown(false),
            SearchEvent::ResultsChanged(Vec::new()),
            SearchEvent::Loading(false),
        ]
    );

    tokio::time::sleep(SEARCH_QUERY_DELAY * 2).await;
    assert!(calls.try_next().is_none());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_search_ignores_text_changes() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(
        api,
        "fcsess_secret_1",
        SearchOptions {
            search_enabled: false,
            ..SearchOptions::default()
        },
    );
    let mut events = search.subscribe_events();

    search.on_text_changed("chase").expect("text changed");
    tokio::time::sleep(SEARCH_QUERY_DELAY * 2).await;

    assert!(calls.try_next().is_none());
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn featured_institutions_toggle_loading_around_fetch() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    search.load_featured().expect("load featured");
    let call = calls.next().await;
    assert_eq!(call.call, ApiCall::FetchFeaturedInstitutions);
    call.respond(Reply::Institutions(Ok(vec![institution("ins_1", "Chase")])));
    settle().await;

    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::FeaturedLoading(true),
            SearchEvent::FeaturedInstitutionsLoaded(vec![institution("ins_1", "Chase")]),
            SearchEvent::FeaturedLoading(false),
        ]
    );

    search.load_featured().expect("load featured");
    calls
        .next()
        .await
        .respond(Reply::Institutions(Err(RequestError::Status(503))));
    settle().await;
    assert_eq!(
        drain(&mut events),
        vec![
            SearchEvent::FeaturedLoading(true),
            SearchEvent::TerminalError {
                error: RequestError::Status(503),
                allow_manual_entry: false,
            },
            SearchEvent::FeaturedLoading(false),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn featured_failure_offers_manual_entry_when_allowed() {
    let (api, mut calls) = scripted_api();
    let search = InstitutionSearch::spawn(
        api,
        "fcsess_secret_1",
        SearchOptions {
            allow_manual_entry: true,
            ..SearchOptions::default()
        },
    );
    let mut events = search.subscribe_events();

    search.load_featured().expect("load featured");
    calls
        .next()
        .await
        .respond(Reply::Institutions(Err(RequestError::Transport("reset".into()))));
    settle().await;

    assert!(drain(&mut events).contains(&SearchEvent::TerminalError {
        error: RequestError::Transport("reset".into()),
        allow_manual_entry: true,
    }));
}

#[tokio::test(start_paused = true)]
async fn closed_search_rejects_input() {
    let (api, _calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());

    search.shutdown();
    settle().await;

    assert_eq!(search.on_text_changed("chase"), Err(SearchError::Closed));
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_close_after_shutdown() {
    let (api, _calls) = scripted_api();
    let search = InstitutionSearch::spawn(api, "fcsess_secret_1", SearchOptions::default());
    let mut events = search.subscribe_events();

    search.shutdown();
    settle().await;

    assert!(matches!(events.try_recv(), Err(TryRecvError::Closed)));
    let mut late = search.subscribe_events();
    assert!(matches!(late.try_recv(), Err(TryRecvError::Closed)));
}
