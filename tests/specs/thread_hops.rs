// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use wp2p_task::{background, foreground, Dispatcher, Runtime};

#[test]
fn hops_land_on_the_right_worlds() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let observed = dispatcher.block_on(async {
        let mut worlds = Vec::new();
        worlds.push(Dispatcher::current().is_foreground());
        background().await;
        worlds.push(Dispatcher::current().is_foreground());
        foreground().await;
        worlds.push(Dispatcher::current().is_foreground());
        worlds
    });
    assert_eq!(observed, vec![true, false, true]);
}

#[test]
fn hops_survive_repeated_round_trips() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let flips = dispatcher.block_on(async {
        let mut wrong = 0;
        for _ in 0..25 {
            background().await;
            if Dispatcher::current().is_foreground() {
                wrong += 1;
            }
            foreground().await;
            if !Dispatcher::current().is_foreground() {
                wrong += 1;
            }
        }
        wrong
    });
    assert_eq!(flips, 0);
}
