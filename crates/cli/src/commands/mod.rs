//! CLI command implementations.

pub mod traces;
pub mod usage;

use ledgerline_config::ObserverConfig;
use ledgerline_telemetry::{ModelRate, PriceTable};

/// Defaults plus any `[pricing]` overrides from the config file.
pub(crate) fn price_table_from(config: &ObserverConfig) -> PriceTable {
    let mut table = PriceTable::with_defaults();
    for (key, rate) in &config.pricing {
        if let Some((provider, model)) = key.split_once('/') {
            table.set(
                provider,
                model,
                ModelRate {
                    input_per_1k: rate.input_per_1k,
                    output_per_1k: rate.output_per_1k,
                    cache_read_per_1k: rate.cache_read_per_1k,
                    cache_creation_per_1k: rate.cache_creation_per_1k,
                },
            );
        }
    }
    table
}
