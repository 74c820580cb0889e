// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use wp2p_task::{delay, BlockingQueue, Error, Runtime};

#[test]
fn producer_and_consumer_conserve_every_item() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let queue: Arc<BlockingQueue<u32>> = Arc::new(BlockingQueue::new(5));

    let producer_queue = queue.clone();
    let producer = dispatcher.spawn(async move {
        for i in 0..99u32 {
            if i % 7 == 0 {
                delay(Duration::from_millis(1)).await;
            }
            producer_queue.push(i, None).await?;
        }
        producer_queue.close();
        Ok::<_, Error>(())
    });

    let consumer_queue = queue.clone();
    let consumer = dispatcher.spawn(async move {
        let mut taken = Vec::new();
        loop {
            if taken.len() % 11 == 0 {
                delay(Duration::from_millis(1)).await;
            }
            match consumer_queue.take(None).await {
                Ok(item) => taken.push(item),
                Err(Error::Closed) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(taken)
    });

    producer.get_result().unwrap();
    let taken = consumer.get_result().unwrap();
    assert_eq!(taken, (0..99).collect::<Vec<_>>());

    let after_close = dispatcher.block_on(async move { queue.take(None).await });
    assert!(matches!(after_close, Err(Error::Closed)));
}
