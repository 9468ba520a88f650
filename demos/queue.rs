//! Feeding a stream from several producer tasks through a queue source.

use std::time::Duration;

use sourceweld::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Queue Source Example ===");

    let (handle, queue) = QueueSource::new(4, OverflowStrategy::DropHead)
        .with_attributes(Attributes::named("sensor-readings"))
        .materialize()?;

    let producers: Vec<_> = (0..3u32)
        .map(|sensor| {
            let queue = queue.clone();
            tokio::spawn(async move {
                for reading in 0..5u32 {
                    match queue.offer((sensor, reading)).await {
                        Ok(OfferResult::Enqueued(EnqueueKind::Plain)) => {}
                        Ok(result) => println!("sensor {}: reading {} -> {:?}", sensor, reading, result),
                        Err(error) => println!("sensor {}: {}", sensor, error),
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        })
        .collect();

    let collector = CollectSink::new();
    let readings = collector.clone();
    let pipeline = tokio::spawn(
        Pipeline::new(handle, MapProcessor::new(|(sensor, reading): (u32, u32)| {
            format!("sensor-{}={}", sensor, reading)
        }))
        .sink(collector),
    );

    for producer in producers {
        producer.await.expect("producer task");
    }
    queue.complete();
    pipeline.await.expect("pipeline task")?;
    queue.watch_completion().await?;

    let readings = readings.take().await;
    println!("received {} readings", readings.len());
    for reading in readings {
        println!("  {}", reading);
    }
    Ok(())
}
