use std::sync::Arc;

use anyhow::Result;

use livefeed::config::PlayerConfig;
use livefeed::stream::extractor::{relays_from_config, StreamExtractor};
use livefeed::{MediaClient, StrategySelector, StreamDescriptor};

pub fn cmd_select(descriptor: &StreamDescriptor) -> Result<()> {
    let kind = StrategySelector::new().select(descriptor)?;
    println!("{kind}");
    Ok(())
}

pub async fn cmd_resolve(
    descriptor: &StreamDescriptor,
    config: &PlayerConfig,
    extract: bool,
    json: bool,
) -> Result<()> {
    let selector = if extract {
        build_selector(config)?
    } else {
        StrategySelector::new()
    };

    eprintln!("📡 Resolving: {}", descriptor.label());
    let plan = selector.resolve(descriptor).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Engine: {}", plan.kind);
    println!("URL: {}", plan.url);
    println!("Source: {}", plan.source_url);
    if plan.extracted {
        println!("Extracted: yes");
    }
    Ok(())
}

/// Selector with the configured relay chain.
pub fn build_selector(config: &PlayerConfig) -> Result<StrategySelector> {
    let client = MediaClient::new(config.device)?;
    let relays = relays_from_config(&config.extractor, &client);
    let extractor = StreamExtractor::new(relays, &config.extractor);
    Ok(StrategySelector::new().with_extractor(Arc::new(extractor)))
}
