//! Public-API admission scenarios.

use rampart_breaker::{AdaptiveBreaker, BreakerError};
use std::io;

#[test]
fn sparse_traffic_is_never_dropped() {
    let breaker = AdaptiveBreaker::new("orders");
    for _ in 0..5 {
        breaker.allow().expect("below the protection floor").accept();
    }
    for _ in 0..5 {
        breaker.allow().expect("healthy history").accept();
    }
}

#[test]
fn rejected_promises_degrade_admission() {
    let breaker = AdaptiveBreaker::new("orders");
    for _ in 0..100 {
        match breaker.allow() {
            Ok(promise) => promise.reject(),
            Err(_) => {}
        }
    }

    let rejected = (0..200).filter(|_| breaker.allow().is_err()).count();
    assert!(rejected > 100, "rejected only {rejected} of 200");
}

#[tokio::test]
async fn wrapped_calls_report_inner_errors() {
    let breaker = AdaptiveBreaker::new("orders");
    let result = breaker
        .call(|| async { Err::<(), _>(io::Error::other("down")) })
        .await;

    match result {
        Err(BreakerError::Inner(e)) => assert_eq!(e.to_string(), "down"),
        other => panic!("expected inner error, got {other:?}"),
    }
}

#[tokio::test]
async fn recovery_reopens_admission() {
    let breaker = AdaptiveBreaker::builder()
        .name("orders")
        .window(std::time::Duration::from_millis(400))
        .buckets(8)
        .build();

    for _ in 0..100 {
        breaker.mark_failure();
    }

    // once the failures age out of the short window, traffic flows again
    std::thread::sleep(std::time::Duration::from_millis(500));
    breaker
        .allow()
        .expect("an empty window admits everything")
        .accept();
}
