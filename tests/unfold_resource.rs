//! Integration tests for the synchronous resource-unfold source

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sourceweld::prelude::*;

#[derive(Clone, Copy, Debug)]
enum Step {
    Item(u32),
    Fault,
}

#[derive(Default)]
struct Stats {
    opened: AtomicUsize,
    closed: AtomicUsize,
    reads: AtomicUsize,
}

impl Stats {
    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

fn fault() -> Error {
    Error::resource(io::Error::new(io::ErrorKind::Other, "read fault"))
}

/// Each `create` opens the next generation of scripted reads.
fn scripted(
    stats: Arc<Stats>,
    generations: Vec<Vec<Step>>,
) -> impl SourceStage<Item = u32, Mat = ()> {
    let opened = stats.clone();
    let read = stats.clone();
    let closed = stats;
    UnfoldResourceSource::new(
        move || {
            let generation = opened.opened.fetch_add(1, Ordering::SeqCst);
            match generations.get(generation) {
                Some(steps) => Ok(steps.iter().copied().collect::<VecDeque<_>>()),
                None => Err(Error::custom("no resource left")),
            }
        },
        move |steps: &mut VecDeque<Step>| {
            read.reads.fetch_add(1, Ordering::SeqCst);
            match steps.pop_front() {
                Some(Step::Item(item)) => Ok(Some(item)),
                Some(Step::Fault) => Err(fault()),
                None => Ok(None),
            }
        },
        move |_steps| {
            closed.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
}

async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn test_reads_until_exhausted_then_closes() {
    let stats = Arc::new(Stats::default());
    let source = scripted(stats.clone(), vec![vec![Step::Item(1), Step::Item(2), Step::Item(3)]]);
    let (mut handle, ()) = source.materialize().unwrap();

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert_eq!(handle.pull().await.unwrap(), Some(2));
    assert_eq!(handle.pull().await.unwrap(), Some(3));
    assert_eq!(handle.pull().await.unwrap(), None);
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_create_failure_fails_stage() {
    let stats = Arc::new(Stats::default());
    let (mut handle, ()) = scripted(stats.clone(), vec![]).materialize().unwrap();
    assert!(matches!(handle.pull().await, Err(Error::Custom(_))));
    assert_eq!(stats.closed(), 0);
}

#[tokio::test]
async fn test_stop_closes_and_fails() {
    let stats = Arc::new(Stats::default());
    let source = scripted(stats.clone(), vec![vec![Step::Item(1), Step::Fault, Step::Item(2)]]);
    let (mut handle, ()) = source.materialize().unwrap();

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert!(matches!(handle.pull().await, Err(Error::Resource(_))));
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_resume_skips_fault() {
    let stats = Arc::new(Stats::default());
    let source = scripted(stats.clone(), vec![vec![Step::Item(1), Step::Fault, Step::Item(3)]]);
    let (mut handle, ()) = Materializer::try_current()
        .unwrap()
        .materialize_with(source, &Attributes::new().with_supervision(Directive::Resume))
        .unwrap();

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    assert_eq!(handle.pull().await.unwrap(), Some(3));
    assert_eq!(handle.pull().await.unwrap(), None);
    assert_eq!(stats.opened(), 1);
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_restart_reopens_resource() {
    let stats = Arc::new(Stats::default());
    let source = scripted(
        stats.clone(),
        vec![
            vec![Step::Item(1), Step::Fault, Step::Item(2)],
            vec![Step::Item(10), Step::Item(11)],
        ],
    );
    let config = MaterializerConfig::new()
        .default_attributes(Attributes::new().with_supervision(Directive::Restart));
    let materializer = Materializer::try_current_with(config).unwrap();
    let (mut handle, ()) = materializer.materialize(source).unwrap();

    let mut seen = Vec::new();
    while let Some(item) = handle.pull().await.unwrap() {
        seen.push(item);
    }
    assert_eq!(seen, vec![1, 10, 11]);
    assert_eq!(stats.opened(), 2);
    assert_eq!(stats.closed(), 2);
}

#[tokio::test]
async fn test_failed_recreate_fails_stage() {
    let stats = Arc::new(Stats::default());
    let source = scripted(stats.clone(), vec![vec![Step::Fault]]);
    let (mut handle, ()) = Materializer::try_current()
        .unwrap()
        .materialize_with(source, &Attributes::new().with_supervision(Directive::Restart))
        .unwrap();

    assert!(matches!(handle.pull().await, Err(Error::Custom(_))));
    assert_eq!(stats.opened(), 2);
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_cancel_closes_exactly_once() {
    let stats = Arc::new(Stats::default());
    let source = scripted(stats.clone(), vec![vec![Step::Item(1), Step::Item(2)]]);
    let (mut handle, ()) = source.materialize().unwrap();

    assert_eq!(handle.pull().await.unwrap(), Some(1));
    handle.cancel();

    eventually(|| stats.closed() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(stats.closed(), 1);
}

#[tokio::test]
async fn test_close_failure_at_end_fails_stage() {
    let source = UnfoldResourceSource::new(
        || Ok(0u32),
        |_count: &mut u32| Ok(None::<u32>),
        |_count| Err(Error::resource(io::Error::new(io::ErrorKind::Other, "close"))),
    );
    let (mut handle, ()) = source.materialize().unwrap();
    assert!(matches!(handle.pull().await, Err(Error::Resource(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resume_on_endless_faults_keeps_stage_alive() {
    let reads = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = reads.clone();
    let closed = closes.clone();
    let source = UnfoldResourceSource::new(
        || Ok(()),
        move |_: &mut ()| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<Option<u32>, _>(fault())
        },
        move |()| {
            closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )
    .with_attributes(
        Attributes::new()
            .with_supervision(Directive::Resume)
            .with_sync_retry_budget(8),
    );
    let (mut handle, ()) = source.materialize().unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(100), handle.pull()).await;
    assert!(outcome.is_err(), "nothing should be pushed");
    assert!(!handle.is_terminated());
    assert!(reads.load(Ordering::SeqCst) > 8);

    drop(handle);
    eventually(|| closes.load(Ordering::SeqCst) == 1).await;
}
