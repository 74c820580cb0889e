// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::time::Duration;

use crate::runtime::Runtime;
use crate::task::delay;

#[test]
fn notify_before_wait_leaves_a_token() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<()> = Cond::new(());
    cond.notify(|_| {});
    let result = dispatcher.block_on(async move { cond.wait().await });
    assert!(result.is_ok());
}

#[test]
fn wait_suspends_until_notified() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<()> = Cond::new(());
    let waiter = cond.clone();
    let task = dispatcher.spawn(async move { waiter.wait().await });
    // Give the waiter a chance to suspend, then wake it.
    let nudger = cond.clone();
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(20)).await;
        nudger.notify(|_| {});
        Ok(())
    });
    assert!(task.get_result().is_ok());
}

#[test]
fn wait_timeout_fails_with_timed_out() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<()> = Cond::new(());
    let result = dispatcher
        .block_on(async move { cond.wait_timeout(Some(Duration::from_millis(30))).await });
    assert!(matches!(result, Err(Error::TimedOut)));
}

#[test]
fn predicate_runs_under_the_mutex_and_consumes_state() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<u32> = Cond::new(0);
    let waiter = cond.clone();
    let task = dispatcher.spawn(async move {
        waiter
            .wait_until(|tokens| {
                if *tokens == 0 {
                    return Ok(false);
                }
                *tokens -= 1;
                Ok(true)
            })
            .await
    });
    let producer = cond.clone();
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(10)).await;
        producer.notify(|tokens| *tokens += 1);
        Ok(())
    });
    assert!(task.get_result().is_ok());
    assert_eq!(cond.test(|tokens| *tokens), 0);
}

#[test]
fn notify_wakes_awaiters_in_arrival_order() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<u32> = Cond::new(0);
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for tag in 1..=3u32 {
        let waiter = cond.clone();
        let order = order.clone();
        dispatcher.start_thread(async move {
            waiter
                .wait_until(move |tokens| {
                    if *tokens == 0 {
                        return Ok(false);
                    }
                    *tokens -= 1;
                    Ok(true)
                })
                .await?;
            order.lock().push(tag);
            Ok(())
        });
        // Let each waiter register before the next, so arrival order is
        // deterministic.
        dispatcher.pump_until_idle();
    }

    for _ in 0..3 {
        cond.notify(|tokens| *tokens += 1);
        dispatcher.pump_until_idle();
    }
    assert_eq!(*order.lock(), vec![1, 2, 3]);
}

#[test]
fn notify_all_drains_every_passing_awaiter() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<bool> = Cond::new(false);
    let woken = Arc::new(parking_lot::Mutex::new(0u32));

    for _ in 0..4 {
        let waiter = cond.clone();
        let woken = woken.clone();
        dispatcher.start_thread(async move {
            waiter.wait_until(|open| Ok(*open)).await?;
            *woken.lock() += 1;
            Ok(())
        });
    }
    dispatcher.pump_until_idle();
    cond.notify_all(|open| *open = true);
    dispatcher.pump_until_idle();
    assert_eq!(*woken.lock(), 4);
}

#[test]
fn predicate_errors_resume_the_awaiter_with_the_error() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cond: Cond<bool> = Cond::new(false);
    let waiter = cond.clone();
    let task = dispatcher.spawn(async move {
        waiter
            .wait_until(|closed| {
                if *closed {
                    return Err(Error::Closed);
                }
                Ok(false)
            })
            .await
    });
    let closer = cond.clone();
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(10)).await;
        closer.notify(|closed| *closed = true);
        Ok(())
    });
    assert!(matches!(task.get_result(), Err(Error::Closed)));
}

#[test]
fn mutex_is_exclusive() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let mutex = Arc::new(Mutex::new());
    let in_section = Arc::new(parking_lot::Mutex::new((0u32, 0u32))); // (current, max)

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let mutex = mutex.clone();
        let in_section = in_section.clone();
        tasks.push(dispatcher.spawn(async move {
            let _guard = mutex.lock().await?;
            {
                let mut section = in_section.lock();
                section.0 += 1;
                section.1 = section.1.max(section.0);
            }
            delay(Duration::from_millis(5)).await;
            in_section.lock().0 -= 1;
            Ok::<(), Error>(())
        }));
    }
    for task in tasks {
        assert!(task.get_result().is_ok());
    }
    assert_eq!(in_section.lock().1, 1);
}
