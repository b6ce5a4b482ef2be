mod common;

use common::{ctx, repo, Note};
use docrepo_core::{ErrorKind, FixStrategy, RepoError, RepoPolicy, RetryConfig};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn without_backoff_missing_record_fails_immediately() {
    let repo = repo::<Note>("notes").with_retry(RetryConfig {
        attempts: 3,
        base_delay_ms: 200,
        max_jitter_ms: 0,
    });
    let started = Instant::now();
    let err = repo.get(&ctx(), &"late".to_string()).unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[test]
fn backoff_retries_before_reporting_not_found() {
    let repo = repo::<Note>("notes").with_retry(RetryConfig {
        attempts: 3,
        base_delay_ms: 10,
        max_jitter_ms: 0,
    });
    let started = Instant::now();
    let err = repo
        .get(&ctx().with_fix_strategy(FixStrategy::Backoff), &"late".to_string())
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn backoff_sees_a_record_written_during_retries() {
    let repo = repo::<Note>("notes")
        .with_policy(RepoPolicy::default().fix_strategy(FixStrategy::Backoff))
        .with_retry(RetryConfig {
            attempts: 6,
            base_delay_ms: 20,
            max_jitter_ms: 5,
        });

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(30));
            repo.create(&ctx(), Note::new("late", "arrived")).unwrap();
        });

        let note = repo.get(&ctx(), &"late".to_string()).unwrap();
        assert_eq!(note.text, "arrived");
    });
}

#[test]
fn backoff_gives_up_when_the_deadline_is_closer_than_the_next_delay() {
    let repo = repo::<Note>("notes").with_retry(RetryConfig {
        attempts: 3,
        base_delay_ms: 500,
        max_jitter_ms: 0,
    });
    let ctx = ctx()
        .with_fix_strategy(FixStrategy::Backoff)
        .with_timeout(Duration::from_millis(100));

    let started = Instant::now();
    let err = repo.get(&ctx, &"late".to_string()).unwrap_err();
    assert!(err.is(ErrorKind::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_millis(500));
}
