//! Poll window scenarios against a scripted session with paused time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use portal_snapshot::auth::Authenticator;
use portal_snapshot::credentials::Credentials;
use portal_snapshot::poller::{
    AssetCollector, PollError, PollSettings, Poller, SnapshotStore, StopReason,
};
use portal_snapshot::session::FetchResponse;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{Event, Load, ScriptedSession, TokioClock, LOGIN_URL, TARGET_URL};

fn credentials() -> Credentials {
    Credentials {
        username: "maria".to_string(),
        password: "s3cret".to_string(),
    }
}

fn settings(min_successes: u32, max_attempts: u32) -> PollSettings {
    PollSettings {
        window: Duration::from_secs(60),
        interval: Duration::from_secs(5),
        min_successes,
        max_attempts,
        max_consecutive_storage_failures: 3,
        extract_assets: false,
    }
}

fn poller(dir: &TempDir, settings: PollSettings) -> Poller {
    let authenticator = Authenticator::new(
        LOGIN_URL,
        Duration::from_secs(30),
        Duration::ZERO,
        dir.path(),
    );
    let store = SnapshotStore::new(dir.path(), Arc::new(TokioClock::new()));
    Poller::new(authenticator, store, None, settings, Duration::from_secs(30))
}

fn files_with_prefix(dir: &TempDir, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_steady_session_stops_at_min_successes() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated();
    let mut poller = poller(&dir, settings(5, 10));
    let started = Instant::now();

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successes, 5);
    assert_eq!(outcome.failures, 0);
    assert_eq!(outcome.attempts, 5);
    assert_eq!(outcome.stop_reason, StopReason::MinSuccesses);

    // Attempts start at 0, 5, 10, 15, 20 seconds.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(20), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(21), "elapsed {elapsed:?}");

    let names = files_with_prefix(&dir, "application_view_");
    assert_eq!(names.len(), 5);
    let recorded: Vec<_> = outcome.snapshots.iter().map(|s| s.filename.clone()).collect();
    assert_eq!(recorded, names);
    assert!(outcome
        .snapshots
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));

    // First attempt navigates, the rest reload.
    assert_eq!(session.events[0], Event::Goto(TARGET_URL.to_string()));
    assert_eq!(session.count(|e| *e == Event::Reload), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_are_counted_without_relogin() {
    let dir = TempDir::new().unwrap();
    let mut session =
        ScriptedSession::authenticated().with_loads(&[Load::Fail, Load::Fail, Load::Ok]);
    let mut poller = poller(&dir, settings(3, 10));

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.failures, 2);
    assert_eq!(outcome.successes, 3);
    assert_eq!(outcome.attempts, 5);
    assert_eq!(outcome.reauthentications, 0);
    assert_eq!(session.count(|e| *e == Event::Click), 0);
    assert_eq!(files_with_prefix(&dir, "application_view_").len(), 3);

    let error_pages = files_with_prefix(&dir, "error_page_");
    assert_eq!(error_pages.len(), 2);
    assert!(error_pages.iter().all(|n| n.ends_with("_reload.html")));
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_triggers_one_relogin_before_next_load() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated().with_loads(&[Load::Ok, Load::LoggedOut]);
    let mut poller = poller(&dir, settings(3, 10));

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reauthentications, 1);
    assert_eq!(outcome.failures, 0);
    assert_eq!(outcome.successes, 3);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(session.count(|e| *e == Event::Click), 1);

    // The logged-out load is followed by the login, then a fresh navigation.
    let click = session
        .events
        .iter()
        .position(|e| *e == Event::Click)
        .unwrap();
    let logged_out_load = session.events[..click]
        .iter()
        .rposition(|e| *e == Event::Reload)
        .unwrap();
    assert_eq!(
        session.events[logged_out_load + 1],
        Event::Goto(LOGIN_URL.to_string())
    );
    assert_eq!(
        session.events[click + 1],
        Event::Goto(TARGET_URL.to_string())
    );

    let lost = files_with_prefix(&dir, "error_page_");
    assert_eq!(lost.len(), 1);
    assert!(lost[0].ends_with("_session_lost.html"));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_relogin_aborts_window() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated().with_loads(&[Load::Ok, Load::LoggedOut]);
    session.accept_login = false;
    let mut poller = poller(&dir, settings(5, 10));

    let err = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PollError::ReauthenticationFailed { attempt, successes } => {
            assert_eq!(attempt, 3);
            assert_eq!(successes, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(dir.path().join("login_failed_response.html").exists());
}

#[tokio::test(start_paused = true)]
async fn test_max_attempts_bound() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated().with_loads(&[Load::Fail; 10]);
    let mut poller = poller(&dir, settings(5, 4));

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.failures, 4);
    assert_eq!(outcome.successes, 0);
    assert_eq!(outcome.stop_reason, StopReason::MaxAttempts);
}

#[tokio::test(start_paused = true)]
async fn test_counters_never_exceed_attempts() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated().with_loads(&[
        Load::Ok,
        Load::Fail,
        Load::LoggedOut,
        Load::Ok,
        Load::Fail,
        Load::Ok,
    ]);
    let mut poller = poller(&dir, settings(20, 8));

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.successes + outcome.failures <= outcome.attempts);
    assert!(outcome.attempts <= 8);
    assert_eq!(outcome.snapshots.len() as u32, outcome.successes);
}

#[tokio::test(start_paused = true)]
async fn test_window_elapsed_before_next_attempt() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated();
    let mut poll_settings = settings(100, 100);
    poll_settings.window = Duration::from_secs(12);
    let mut poller = poller(&dir, poll_settings);

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    // Attempts at 0, 5, 10; the next one would start past the window.
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.stop_reason, StopReason::WindowElapsed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_loads_shorten_the_pause() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated();
    session.load_time = Duration::from_secs(3);
    let mut poller = poller(&dir, settings(3, 10));
    let started = Instant::now();

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successes, 3);
    // Starts stay 5s apart: loads at 0, 5, 10, the last finishing at 13.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(13), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(14), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_pacing() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated();
    let mut poller = poller(&dir, settings(10, 20));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.successes, 2);
}

#[tokio::test(start_paused = true)]
async fn test_assets_downloaded_once_per_content() {
    let dir = TempDir::new().unwrap();
    let asset_dir = dir.path().join("assets_run");
    let mut session = ScriptedSession::authenticated();
    session.page_extra =
        r#"<a href="/Files/decision.pdf">Decision</a><img src="/img/missing.png">"#.to_string();
    session.assets.insert(
        "https://portal.test/Files/decision.pdf".to_string(),
        FetchResponse {
            status: 200,
            body: b"%PDF-1.4 decision".to_vec(),
        },
    );

    let mut poll_settings = settings(2, 10);
    poll_settings.extract_assets = true;
    let authenticator =
        Authenticator::new(LOGIN_URL, Duration::from_secs(30), Duration::ZERO, dir.path());
    let store = SnapshotStore::new(dir.path(), Arc::new(TokioClock::new()));
    let collector = AssetCollector::new(
        &asset_dir,
        vec!["pdf".to_string(), "png".to_string()],
        Duration::from_secs(30),
    );
    let mut poller = Poller::new(
        authenticator,
        store,
        Some(collector),
        poll_settings,
        Duration::from_secs(30),
    );

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successes, 2);
    // Both cycles fetch, only the first writes; the 404 is skipped.
    assert_eq!(outcome.assets.len(), 1);
    assert_eq!(outcome.assets[0].filename, "decision.pdf");
    assert_eq!(
        std::fs::read(asset_dir.join("decision.pdf")).unwrap(),
        b"%PDF-1.4 decision"
    );
    assert_eq!(std::fs::read_dir(&asset_dir).unwrap().count(), 1);
    assert_eq!(
        session.count(|e| matches!(e, Event::RequestGet(u) if u.ends_with("decision.pdf"))),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_same_named_assets_in_one_cycle_get_suffixes() {
    let dir = TempDir::new().unwrap();
    let asset_dir = dir.path().join("assets_run");
    let mut session = ScriptedSession::authenticated();
    session.page_extra =
        r#"<a href="/a/x.pdf">First</a><a href="/b/x.pdf">Second</a>"#.to_string();
    for (path, body) in [("/a/x.pdf", "%PDF first"), ("/b/x.pdf", "%PDF second")] {
        session.assets.insert(
            format!("https://portal.test{path}"),
            FetchResponse {
                status: 200,
                body: body.as_bytes().to_vec(),
            },
        );
    }

    let mut poll_settings = settings(2, 10);
    poll_settings.extract_assets = true;
    let authenticator =
        Authenticator::new(LOGIN_URL, Duration::from_secs(30), Duration::ZERO, dir.path());
    let store = SnapshotStore::new(dir.path(), Arc::new(TokioClock::new()));
    let collector = AssetCollector::new(&asset_dir, vec!["pdf".to_string()], Duration::from_secs(30));
    let mut poller = Poller::new(
        authenticator,
        store,
        Some(collector),
        poll_settings,
        Duration::from_secs(30),
    );

    let outcome = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.successes, 2);
    // The second cycle finds both files unchanged and writes nothing.
    let names: Vec<&str> = outcome.assets.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, vec!["x.pdf", "x_1.pdf"]);
    assert_eq!(std::fs::read(asset_dir.join("x.pdf")).unwrap(), b"%PDF first");
    assert_eq!(std::fs::read(asset_dir.join("x_1.pdf")).unwrap(), b"%PDF second");
    assert_eq!(std::fs::read_dir(&asset_dir).unwrap().count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failures_abort_after_threshold() {
    let dir = TempDir::new().unwrap();
    let mut session = ScriptedSession::authenticated();
    let authenticator =
        Authenticator::new(LOGIN_URL, Duration::from_secs(30), Duration::ZERO, dir.path());
    let store = SnapshotStore::new(dir.path().join("missing"), Arc::new(TokioClock::new()));
    let mut poller = Poller::new(
        authenticator,
        store,
        None,
        settings(5, 10),
        Duration::from_secs(30),
    );

    let err = poller
        .poll_window(&mut session, TARGET_URL, &credentials(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PollError::Storage { failures: 3, .. }));
}
