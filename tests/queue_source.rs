//! Integration tests for the queue-backed source

use std::time::Duration;

use sourceweld::prelude::*;
use tokio_test::{assert_pending, task};

fn queue<T: Send + 'static>(
    capacity: usize,
    strategy: OverflowStrategy,
) -> (SourceHandle<T>, SourceQueue<T>) {
    QueueSource::new(capacity, strategy).materialize().unwrap()
}

#[tokio::test]
async fn test_offers_flow_in_order() {
    let (mut handle, queue) = queue(4, OverflowStrategy::DropNew);
    for i in 0..4 {
        let result = queue.offer(i).await.unwrap();
        assert!(matches!(result, OfferResult::Enqueued(EnqueueKind::Plain)));
    }
    for i in 0..4 {
        assert_eq!(handle.pull().await.unwrap(), Some(i));
    }
}

#[tokio::test]
async fn test_offer_with_pending_demand_is_pushed() {
    let (mut handle, queue) = queue(2, OverflowStrategy::DropHead);
    let pulled = tokio::spawn(async move { handle.pull().await });
    tokio::task::yield_now().await;

    let result = queue.offer("x").await.unwrap();
    assert!(result.is_enqueued());
    assert_eq!(pulled.await.unwrap().unwrap(), Some("x"));
}

#[tokio::test]
async fn test_drop_head_keeps_newest() {
    let (mut handle, queue) = queue(2, OverflowStrategy::DropHead);
    let first = queue.offer(1).await.unwrap();
    let second = queue.offer(2).await.unwrap();
    let third = queue.offer(3).await.unwrap();

    assert!(matches!(first, OfferResult::Enqueued(EnqueueKind::Plain)));
    assert!(matches!(second, OfferResult::Enqueued(EnqueueKind::Plain)));
    assert!(matches!(third, OfferResult::Enqueued(EnqueueKind::DroppedHead)));

    queue.complete();
    assert_eq!(handle.pull().await.unwrap(), Some(2));
    assert_eq!(handle.pull().await.unwrap(), Some(3));
    assert_eq!(handle.pull().await.unwrap(), None);
}

async fn drain<T: Send + 'static>(handle: &mut SourceHandle<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Some(item) = handle.pull().await.unwrap() {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn test_drop_strategies_never_exceed_capacity() {
    let expectations = [
        (OverflowStrategy::DropHead, vec![7, 8, 9]),
        (OverflowStrategy::DropTail, vec![0, 1, 9]),
        (OverflowStrategy::DropBuffer, vec![9]),
        (OverflowStrategy::DropNew, vec![0, 1, 2]),
    ];

    for (strategy, expected) in expectations {
        let (mut handle, queue) = queue(3, strategy);
        for i in 0..10 {
            queue.offer(i).await.unwrap();
        }
        queue.complete();
        assert_eq!(drain(&mut handle).await, expected, "strategy {}", strategy);
    }
}

#[tokio::test]
async fn test_drop_new_reports_dropped() {
    let (_handle, queue) = queue(1, OverflowStrategy::DropNew);
    assert!(queue.offer(1).await.unwrap().is_enqueued());
    assert!(matches!(queue.offer(2).await.unwrap(), OfferResult::Dropped));
}

#[tokio::test]
async fn test_fail_strategy_fails_stream() {
    let (mut handle, queue) = queue(1, OverflowStrategy::Fail);
    assert!(queue.offer(1).await.unwrap().is_enqueued());

    let overflow = queue.offer(2).await.unwrap();
    assert!(matches!(
        overflow,
        OfferResult::Failure(Error::BufferOverflow { capacity: 1 })
    ));
    assert!(matches!(
        queue.watch_completion().await,
        Err(Error::BufferOverflow { capacity: 1 })
    ));
    assert!(matches!(handle.pull().await, Err(Error::BufferOverflow { .. })));
    assert!(matches!(queue.offer(3).await, Err(Error::StreamDetached)));
}

#[tokio::test]
async fn test_backpressure_holds_one_pending_offer() {
    let (mut handle, queue) = queue(1, OverflowStrategy::Backpressure);
    assert!(queue.offer(1).await.unwrap().is_enqueued());

    let mut held = task::spawn(queue.offer(2));
    assert_pending!(held.poll());

    assert!(matches!(
        queue.offer(3).await,
        Err(Error::IllegalConcurrentOffer)
    ));

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert!(matches!(
        held.await.unwrap(),
        OfferResult::Enqueued(EnqueueKind::Plain)
    ));
    assert_eq!(handle.pull().await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_zero_capacity_drop_tail_keeps_first() {
    let (mut handle, queue) = queue(0, OverflowStrategy::DropTail);
    let a = queue.offer("A");
    let b = queue.offer("B");

    assert!(matches!(b.await.unwrap(), OfferResult::Dropped));
    assert_eq!(handle.pull().await.unwrap(), Some("A"));
    assert!(matches!(
        a.await.unwrap(),
        OfferResult::Enqueued(EnqueueKind::Plain)
    ));
}

#[tokio::test]
async fn test_zero_capacity_backpressure_rejects_second() {
    let (mut handle, queue) = queue(0, OverflowStrategy::Backpressure);
    let a = queue.offer("A");
    let b = queue.offer("B");

    assert!(matches!(b.await, Err(Error::IllegalConcurrentOffer)));
    assert_eq!(handle.pull().await.unwrap(), Some("A"));
    assert!(a.await.unwrap().is_enqueued());
}

#[tokio::test]
async fn test_zero_capacity_drop_head_keeps_latest() {
    let (mut handle, queue) = queue(0, OverflowStrategy::DropHead);
    let a = queue.offer("A");
    let b = queue.offer("B");

    assert!(matches!(a.await.unwrap(), OfferResult::Dropped));
    assert_eq!(handle.pull().await.unwrap(), Some("B"));
    assert!(b.await.unwrap().is_enqueued());
}

#[tokio::test]
async fn test_zero_capacity_fail_fails_stage() {
    let (mut handle, queue) = queue(0, OverflowStrategy::Fail);
    let a = queue.offer("A");
    let b = queue.offer("B");

    assert!(matches!(
        a.await.unwrap(),
        OfferResult::Failure(Error::BufferOverflow { capacity: 0 })
    ));
    assert!(matches!(
        b.await.unwrap(),
        OfferResult::Failure(Error::BufferOverflow { capacity: 0 })
    ));
    assert!(matches!(handle.pull().await, Err(Error::BufferOverflow { .. })));
}

#[tokio::test]
async fn test_complete_waits_for_drain() {
    let (mut handle, queue) = queue(4, OverflowStrategy::DropNew);
    queue.offer(1).await.unwrap();
    queue.offer(2).await.unwrap();
    queue.complete();

    let mut completion = task::spawn(queue.watch_completion());
    tokio::task::yield_now().await;
    assert_pending!(completion.poll());

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert_eq!(handle.pull().await.unwrap(), Some(2));
    assert_eq!(handle.pull().await.unwrap(), None);
    completion.await.unwrap();
}

#[tokio::test]
async fn test_complete_with_backpressured_offer_delivers_it() {
    let (mut handle, queue) = queue(1, OverflowStrategy::Backpressure);
    queue.offer(1).await.unwrap();
    let held = queue.offer(2);
    queue.complete();

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert!(held.await.unwrap().is_enqueued());
    assert_eq!(handle.pull().await.unwrap(), Some(2));
    assert_eq!(handle.pull().await.unwrap(), None);
    queue.watch_completion().await.unwrap();
}

#[tokio::test]
async fn test_fail_terminates_immediately() {
    let (mut handle, queue) = queue(0, OverflowStrategy::DropNew);
    let pending = queue.offer(1);
    queue.fail(Error::custom("upstream gone"));

    assert!(matches!(pending.await.unwrap(), OfferResult::QueueClosed));
    assert!(matches!(queue.watch_completion().await, Err(Error::Custom(_))));
    assert!(matches!(handle.pull().await, Err(Error::Custom(_))));
}

#[tokio::test]
async fn test_cancel_settles_everything() {
    let (handle, queue) = queue(0, OverflowStrategy::DropNew);
    let pending = queue.offer(1);
    handle.cancel();

    assert!(matches!(pending.await.unwrap(), OfferResult::QueueClosed));
    queue.watch_completion().await.unwrap();
    assert!(matches!(queue.offer(2).await, Err(Error::StreamDetached)));
}

#[tokio::test]
async fn test_dropping_handle_cancels() {
    let (handle, queue) = queue::<u32>(2, OverflowStrategy::DropHead);
    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), queue.watch_completion())
        .await
        .expect("completion after cancel")
        .unwrap();
}

#[tokio::test]
async fn test_completion_has_many_observers() {
    let (mut handle, queue) = queue::<u32>(1, OverflowStrategy::DropHead);
    let first = queue.watch_completion();
    let second = queue.clone().watch_completion();
    queue.complete();

    assert_eq!(handle.pull().await.unwrap(), None);
    first.await.unwrap();
    second.await.unwrap();
    queue.watch_completion().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_offers_from_many_tasks() {
    let (handle, queue) = queue(16, OverflowStrategy::Backpressure);
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for i in 0..25 {
                    loop {
                        match queue.offer(p * 100 + i).await {
                            Ok(result) => {
                                assert!(result.is_enqueued());
                                break;
                            }
                            Err(Error::IllegalConcurrentOffer) => tokio::task::yield_now().await,
                            Err(error) => panic!("unexpected {}", error),
                        }
                    }
                }
            })
        })
        .collect();

    let consumer = tokio::spawn(async move {
        let mut handle = handle;
        let mut seen = Vec::new();
        while let Some(item) = handle.pull().await.unwrap() {
            seen.push(item);
        }
        seen
    });

    for producer in producers {
        producer.await.unwrap();
    }
    queue.complete();

    let mut seen = consumer.await.unwrap();
    assert_eq!(seen.len(), 100);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 100);
}

#[tokio::test]
async fn test_queue_handle_is_debug() {
    let (_handle, queue) = queue::<u32>(1, OverflowStrategy::DropNew);
    let rendered = format!("{:?}", queue);
    assert!(rendered.starts_with("SourceQueue"));
    assert!(rendered.contains("stopped: false"));
}
