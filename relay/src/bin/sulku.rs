//! Minimal relay executable: stdin lines in, JSON events out
//!
//! Serves standard input as a single connection through the full
//! pipeline and prints each relayed event as one JSON object per line.
//! Mostly useful for poking at configuration and breaker behaviour:
//!
//! ```text
//! SULKU_LOG_FORMAT=pretty cargo run --bin sulku < events.log
//! ```

use sulku_relay::{
    init_tracing, ChannelQueue, ChannelSource, Config, Pipeline, Record,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let (source, handle) = ChannelSource::new();
    let (queue, mut events) = ChannelQueue::new();

    let runner = Pipeline::new(config)
        .source(source)
        .downstream(queue)
        .build()?;

    tokio::spawn(async move {
        let feed = match handle.connect("stdin") {
            Ok(feed) => feed,
            Err(_) => return,
        };
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if feed.send(Record::new(line)).is_err() {
                break;
            }
        }
        // Dropping the feed ends the stdin connection.
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!(
                "{}",
                serde_json::json!({
                    "id": event.id.to_string(),
                    "timestamp": event.timestamp,
                    "source": event.source,
                    "fields": event.fields,
                    "metadata": event.metadata,
                })
            );
        }
    });

    runner.run_until_signal().await?;
    Ok(())
}
