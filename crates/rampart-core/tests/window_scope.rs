//! Reduce-scope behavior of the rolling window through the public API.

use rampart_core::RollingWindow;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_millis(100);

fn scanned(window: &RollingWindow<f64>) -> usize {
    let mut visited = 0;
    window.reduce(|_| visited += 1);
    visited
}

#[test]
fn reduce_visits_all_live_buckets() {
    let window = RollingWindow::<f64>::new(5, INTERVAL);
    window.add(1.0);
    assert_eq!(scanned(&window), 5);
}

#[test]
fn ignore_current_shrinks_the_scan_by_one() {
    let window = RollingWindow::<f64>::new(5, INTERVAL).ignore_current();
    window.add(1.0);
    assert_eq!(scanned(&window), 4);
}

#[test]
fn elapsed_intervals_shrink_the_scan() {
    let window = RollingWindow::<f64>::new(5, INTERVAL);
    window.add(1.0);

    std::thread::sleep(2 * INTERVAL + Duration::from_millis(20));
    // two expired slots are excluded until the next write reclaims them
    assert_eq!(scanned(&window), 3);
}

#[test]
fn a_write_restores_the_full_scan() {
    let window = RollingWindow::<f64>::new(5, INTERVAL);
    window.add(1.0);
    std::thread::sleep(2 * INTERVAL + Duration::from_millis(20));

    window.add(1.0);
    assert_eq!(scanned(&window), 5);
}

#[test]
fn concurrent_readers_and_writers_stay_consistent() {
    use std::sync::Arc;

    let window = Arc::new(RollingWindow::<f64>::new(10, Duration::from_millis(10)));
    let mut handles = Vec::new();

    for _ in 0..4 {
        let window = Arc::clone(&window);
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                window.add(1.0);
            }
        }));
    }
    for _ in 0..4 {
        let window = Arc::clone(&window);
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                let mut total = 0.0;
                window.reduce(|b| total += b.sum);
                assert!(total >= 0.0);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}
