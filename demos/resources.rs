//! Unfolding blocking and async resources under supervision.

use std::io::{self, BufRead, BufReader, Cursor};
use std::sync::Arc;

use sourceweld::prelude::*;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Resource Sources Example ===");

    // A blocking reader; malformed lines are skipped by resuming.
    let text = "1\n2\nnot-a-number\n4\n";
    let numbers = UnfoldResourceSource::new(
        move || Ok(BufReader::new(Cursor::new(text))),
        |reader: &mut BufReader<Cursor<&'static str>>| {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            line.trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|e| Error::resource(io::Error::new(io::ErrorKind::InvalidData, e)))
        },
        |_reader| Ok(()),
    )
    .with_attributes(Attributes::named("numbers").with_supervision(Directive::Resume));

    let (handle, ()) = numbers.materialize()?;
    let sink = CollectSink::new();
    let parsed = sink.clone();
    Pipeline::new(handle, NoOpProcessor::new()).sink(sink).await?;
    println!("parsed: {:?}", parsed.items().await);

    // An async "connection" shared through an Arc.
    let pages = UnfoldResourceAsyncSource::new(
        || async {
            println!("opening connection");
            Ok::<_, Error>(Arc::new(Mutex::new(0u32)))
        },
        |cursor: Arc<Mutex<u32>>| async move {
            let mut page = cursor.lock().await;
            *page += 1;
            Ok::<_, Error>((*page <= 3).then(|| format!("page {}", *page)))
        },
        |_cursor| async {
            println!("closing connection");
            Ok::<_, Error>(())
        },
    );

    let (mut handle, ()) = pages.materialize()?;
    while let Some(page) = handle.pull().await? {
        println!("fetched {}", page);
    }
    Ok(())
}
