// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use wp2p_task::{delay, Runtime};

#[test]
fn shorter_delay_logs_first_and_total_time_is_bounded() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let log: Arc<parking_lot::Mutex<Vec<&str>>> = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let start = Instant::now();

    let log_a = log.clone();
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(1000)).await;
        log_a.lock().push("A");
        Ok(())
    });
    let log_b = log.clone();
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(500)).await;
        log_b.lock().push("B");
        Ok(())
    });

    dispatcher.pump_until_idle();
    let elapsed = start.elapsed();

    assert_eq!(*log.lock(), vec!["B", "A"]);
    assert!(elapsed >= Duration::from_millis(1000), "finished early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "took too long: {elapsed:?}");
}
