// Compact, deterministic text summary of a metric record for the advisor.
//
// Only aggregates go in; row-level data never leaves the record.
use crate::config::{MAX_CONTEXT_CHARS, PROFIT_ESTIMATE_RATE, VAT_RATE};
use crate::types::{MetricRecord, RankedItem};
use crate::util::{format_int, format_number, format_pct, format_sar};
use std::fmt::Write;

const LISTED_ENTRIES: usize = 3;
const MAX_LABEL_CHARS: usize = 40;

pub fn render_context(record: &MetricRecord) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(
        out,
        "You are a business consultant. Answer questions about this sales dataset using only the figures below."
    );
    let _ = writeln!(out, "Key figures:");
    let _ = writeln!(out, "- Total revenue: {}", format_sar(record.total_revenue));
    if record.meta.has_real_profit {
        let _ = writeln!(out, "- Total profit: {}", format_sar(record.total_profit));
    } else {
        let _ = writeln!(
            out,
            "- Total profit: {} (estimated as {:.0}% of revenue, no profit or cost column)",
            format_sar(record.total_profit),
            PROFIT_ESTIMATE_RATE * 100.0
        );
    }
    let _ = writeln!(out, "- Profit margin: {}", format_pct(record.margin_pct));
    let _ = writeln!(
        out,
        "- VAT due at {:.0}%: {}",
        VAT_RATE * 100.0,
        format_sar(record.vat_due)
    );
    let _ = writeln!(
        out,
        "- Average order value: {}",
        format_sar(record.avg_order_value)
    );
    let _ = writeln!(out, "- Orders (rows): {}", format_int(record.units));
    if let Some(units) = record.total_units {
        let _ = writeln!(out, "- Units sold: {}", format_number(units, 0));
    }
    if let Some(cost) = record.total_cost {
        let _ = writeln!(out, "- Total cost: {}", format_sar(cost));
    }
    if let Some(trend) = &record.trend_data {
        if let (Some(first), Some(last)) = (trend.keys().next(), trend.keys().next_back()) {
            let _ = writeln!(
                out,
                "- Period covered: {} to {} ({} days with sales)",
                first,
                last,
                trend.len()
            );
        }
    }
    if let Some(cities) = &record.city_dist {
        write_list(&mut out, "Top cities by revenue", cities);
    }
    write_list(&mut out, "Top items by revenue", &record.top_revenue_items);

    truncate_chars(out.trim_end(), MAX_CONTEXT_CHARS)
}

/// Context followed by the user's question; same inputs give the same prompt.
pub fn build_prompt(record: &MetricRecord, question: &str) -> String {
    format!(
        "{}\n\nQuestion: {}\nAnswer:",
        render_context(record),
        question.trim()
    )
}

fn write_list(out: &mut String, title: &str, items: &[RankedItem]) {
    if items.is_empty() {
        return;
    }
    let listed: Vec<String> = items
        .iter()
        .take(LISTED_ENTRIES)
        .map(|i| {
            format!(
                "{} ({})",
                truncate_chars(&i.label, MAX_LABEL_CHARS),
                format_sar(i.value)
            )
        })
        .collect();
    let _ = writeln!(out, "{}: {}", title, listed.join(", "));
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
