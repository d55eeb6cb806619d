//! CLI commands for usage, cost and pricing.

use crate::commands::price_table_from;
use ledgerline_config::ObserverConfig;
use ledgerline_storage::SqliteStore;

/// Show aggregate usage over every persisted trace.
pub async fn usage() -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load()?;
    let store = SqliteStore::new(&config.storage.path).await?;
    let summary = store.usage_summary().await?;

    println!("📊 Usage Summary");
    println!("─────────────────────────────────────");
    println!("  Traces:        {}", summary.trace_count);
    println!("  Spans:         {}", summary.span_count);
    println!("  Input tokens:  {}", summary.total_input_tokens);
    println!("  Output tokens: {}", summary.total_output_tokens);
    println!("  Total cost:    ${:.6}", summary.total_cost_usd);

    if !summary.by_service.is_empty() {
        println!();
        println!("  By service:");
        for service in &summary.by_service {
            println!(
                "    {:<24} {} trace(s), {} in / {} out, ${:.6}",
                service.service_name,
                service.trace_count,
                service.total_input_tokens,
                service.total_output_tokens,
                service.total_cost_usd,
            );
        }
    }

    Ok(())
}

/// List available model pricing (defaults plus config overrides).
pub async fn pricing() -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load()?;
    let table = price_table_from(&config);
    let models = table.models();

    println!("💰 Model Pricing (USD per 1k tokens)");
    println!("─────────────────────────────────────────────────────────────");
    println!(
        "{:<40} {:>9} {:>9}",
        "Provider/Model", "Input", "Output"
    );
    for key in &models {
        if let Some((provider, model)) = key.split_once('/') {
            if let Some(rate) = table.get(provider, model) {
                println!(
                    "{:<40} ${:>8.5} ${:>8.5}",
                    key, rate.input_per_1k, rate.output_per_1k
                );
            }
        }
    }

    println!();
    println!("  {} models with pricing data", models.len());

    Ok(())
}

/// Estimate cost for a given provider/model and token counts.
pub async fn estimate(
    provider: &str,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cache_read_tokens: u32,
    cache_creation_tokens: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load()?;
    let table = price_table_from(&config);

    match table.estimate(
        provider,
        model,
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_creation_tokens,
    ) {
        Some(cost) => {
            println!("💵 Cost estimate for {provider}/{model}");
            println!("   Input tokens:  {input_tokens}");
            println!("   Output tokens: {output_tokens}");
            if cache_read_tokens > 0 || cache_creation_tokens > 0 {
                println!(
                    "   Cache tokens:  {cache_read_tokens} read / {cache_creation_tokens} created"
                );
            }
            println!("   Estimated cost: ${cost:.6}");
        }
        None => {
            println!("⚠ No price entry for '{provider}/{model}'.");
            println!("  Use `ledgerline pricing` to see available models.");
        }
    }

    Ok(())
}
