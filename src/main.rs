//! readthru - serve health queries through a read-through cache
//!
//! Runs one query against a JSON document store, answering from the cache when
//! a live entry exists, and prints the result as JSON on stdout.

use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info};

use readthru::cache::CacheManager;
use readthru::cli::{AppConfig, Cli, Command};
use readthru::data::JsonFileSource;
use readthru::logging;
use readthru::queries::HealthQueries;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log_level, cli.log_format)?;

    let config = AppConfig::from_cli(&cli)?;
    debug!(key = %config.cache_key, store = ?config.store, "starting");

    let cache = CacheManager::new(config.open_store()?);
    let source = Arc::new(JsonFileSource::new(&config.fetcher));
    let mut queries = HealthQueries::new(cache, source);
    if let Some(ttl) = config.ttl {
        queries = queries.with_aggregate_ttl(ttl).with_records_ttl(ttl);
    }

    let results = match &config.command {
        Command::AvgWeight => queries.average_weight_by_gender().await?,
        Command::HealthRecords { user_id } => queries.health_records(user_id).await?,
    };

    let stats = queries.cache().stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        write_failures = stats.write_failures,
        "query served"
    );

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
