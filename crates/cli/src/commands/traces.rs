//! CLI commands for inspecting recorded traces.

use ledgerline_config::ObserverConfig;
use ledgerline_core::model::{Span, StatusCode};
use ledgerline_storage::SqliteStore;
use std::collections::HashMap;

/// List recent traces, optionally filtered by service.
pub async fn list(limit: u32, service: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load()?;
    let store = SqliteStore::new(&config.storage.path).await?;
    let traces = store.recent_traces(limit, service.as_deref()).await?;

    if traces.is_empty() {
        println!("No traces recorded yet.");
        return Ok(());
    }

    println!("🧾 Recent Traces");
    println!("{:─<100}", "");
    println!(
        "{:<34} {:<16} {:>6} {:>9} {:>9} {:>10} {:>7}",
        "Trace", "Service", "Spans", "In", "Out", "Cost", "Status"
    );
    for trace in &traces {
        println!(
            "{:<34} {:<16} {:>6} {:>9} {:>9} {:>10} {:>7}",
            trace.trace_id,
            trace.service_name,
            trace.total_spans,
            trace.total_input_tokens,
            trace.total_output_tokens,
            format!("${:.6}", trace.estimated_cost),
            status_label(trace.status),
        );
    }
    println!();
    println!("  {} trace(s)", traces.len());

    Ok(())
}

/// Show one trace as a span tree with durations, tokens and cost.
pub async fn show(trace_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ObserverConfig::load()?;
    let store = SqliteStore::new(&config.storage.path).await?;

    let Some(trace) = store.get_trace(trace_id).await? else {
        println!("Trace {trace_id} not found.");
        return Ok(());
    };
    let spans = store.spans_for_trace(trace_id).await?;

    println!("🧾 Trace {}", trace.trace_id);
    println!("{:─<72}", "");
    println!("  Service:  {}", trace.service_name);
    println!("  Started:  {}", trace.start_time.format("%Y-%m-%d %H:%M:%S%.3f UTC"));
    println!("  Status:   {}", status_label(trace.status));
    if let Some(ms) = trace.duration_ms() {
        println!("  Duration: {ms} ms");
    }
    println!("  Spans:    {}", trace.total_spans);
    println!(
        "  Tokens:   {} in / {} out",
        trace.total_input_tokens, trace.total_output_tokens
    );
    println!("  Cost:     ${:.6}", trace.estimated_cost);
    println!();

    if spans.is_empty() {
        println!("  (no spans recorded)");
        return Ok(());
    }

    let mut children: HashMap<Option<&str>, Vec<&Span>> = HashMap::new();
    for span in &spans {
        children
            .entry(span.parent_span_id.as_deref())
            .or_default()
            .push(span);
    }
    for root in children.get(&None).cloned().unwrap_or_default() {
        print_span(root, &children, 0);
    }

    Ok(())
}

fn print_span<'a>(span: &'a Span, children: &HashMap<Option<&'a str>, Vec<&'a Span>>, depth: usize) {
    let indent = "  ".repeat(depth + 1);
    let duration = span
        .duration_ms()
        .map(|ms| format!("{ms} ms"))
        .unwrap_or_else(|| "open".into());
    let mut detail = format!("[{}] {}", span.kind, duration);
    if span.input_tokens.is_some() || span.output_tokens.is_some() {
        detail.push_str(&format!(
            ", {} in / {} out",
            span.input_tokens.unwrap_or(0),
            span.output_tokens.unwrap_or(0)
        ));
    }
    if let Some(cost) = span.cost_estimate {
        detail.push_str(&format!(", ${cost:.6}"));
    }
    println!(
        "{indent}{} {} ({detail})",
        status_glyph(span.status_code),
        span.name
    );
    if let Some(description) = &span.status_description {
        if span.status_code == StatusCode::Error {
            println!("{indent}   ↳ {description}");
        }
    }
    for child in children.get(&Some(span.span_id.as_str())).cloned().unwrap_or_default() {
        print_span(child, children, depth + 1);
    }
}

fn status_label(status: StatusCode) -> &'static str {
    match status {
        StatusCode::Ok => "ok",
        StatusCode::Error => "ERROR",
        StatusCode::Unset => "open",
    }
}

fn status_glyph(status: StatusCode) -> &'static str {
    match status {
        StatusCode::Ok => "✅",
        StatusCode::Error => "⛔",
        StatusCode::Unset => "…",
    }
}
