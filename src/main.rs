use electrum_tx_query::{query_transaction, Query};
use slog::{o, Drain};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), electrum_tx_query::Error> {
    // stdout carries only the response
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stderr());
    let drain = slog_term::FullFormat::new(decorator).build();
    let drain = slog::LevelFilter::new(drain, slog::Level::Info).fuse();
    let logger = slog::Logger::root(drain, o!());

    let query = Query::from_defaults()?;
    let response = query_transaction(&query, &logger).await?;
    println!("{}", response);
    Ok(())
}
