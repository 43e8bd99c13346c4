// Console dashboard and file exports.
//
// Panels are drawn only when `meta` says the backing data exists.
use crate::types::{BreakdownRow, KpiRow, MetricRecord, Outcome, RankedItem};
use crate::util::{format_int, format_number, format_pct, format_sar};
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), Box<dyn Error>> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Box<dyn Error>> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s)?;
    Ok(())
}

pub fn render_table<T>(rows: &[T]) -> String
where
    T: Tabled + Clone,
{
    if rows.is_empty() {
        return "(no rows)".to_string();
    }
    Table::new(rows.to_vec()).with(Style::markdown()).to_string()
}

pub fn kpi_rows(record: &MetricRecord) -> Vec<KpiRow> {
    let row = |kpi: &str, value: String| KpiRow {
        kpi: kpi.to_string(),
        value,
    };
    let profit_label = if record.meta.has_real_profit {
        "Total Profit"
    } else {
        "Total Profit (estimated)"
    };
    let mut rows = vec![
        row("Total Revenue", format_sar(record.total_revenue)),
        row(profit_label, format_sar(record.total_profit)),
        row("Margin", format_pct(record.margin_pct)),
        row("VAT Due", format_sar(record.vat_due)),
        row("Avg Order Value", format_sar(record.avg_order_value)),
        row("Orders", format_int(record.units)),
    ];
    if let Some(units) = record.total_units {
        rows.push(row("Units Sold", format_number(units, 0)));
    }
    rows
}

fn breakdown_rows(items: &[RankedItem], fmt: fn(f64) -> String) -> Vec<BreakdownRow> {
    items
        .iter()
        .enumerate()
        .map(|(idx, i)| BreakdownRow {
            rank: idx + 1,
            label: i.label.clone(),
            value: fmt(i.value),
        })
        .collect()
}

/// Render the whole dashboard (or the error banner) as text.
pub fn render_dashboard(outcome: &Outcome) -> String {
    let record = match outcome {
        Outcome::Ready(r) => r,
        Outcome::Failed { error } => return format!("Error: {}\n", error),
    };
    let mut out = String::new();
    let mut panel = |title: &str, body: String| {
        out.push_str(title);
        out.push_str("\n\n");
        out.push_str(&body);
        out.push_str("\n\n");
    };

    panel("Key Figures", render_table(&kpi_rows(record)));
    if !record.meta.has_real_profit {
        panel(
            "Note",
            "No profit or cost column was found; profit is an estimate.".to_string(),
        );
    }
    panel("Column Mapping", render_table(&record.mapping_preview));

    if record.meta.has_date {
        if let Some(trend) = &record.trend_data {
            let rows: Vec<KpiRow> = trend
                .iter()
                .map(|(day, rev)| KpiRow {
                    kpi: day.to_string(),
                    value: format_sar(*rev),
                })
                .collect();
            panel("Daily Revenue", render_table(&rows));
        }
    }
    if record.meta.has_city {
        if let Some(cities) = &record.city_dist {
            panel(
                "Revenue by City (top 5)",
                render_table(&breakdown_rows(cities, format_sar)),
            );
        }
    }
    if record.meta.has_category_or_product {
        panel(
            "Top Items by Revenue",
            render_table(&breakdown_rows(&record.top_revenue_items, format_sar)),
        );
        if record.meta.has_real_profit {
            panel(
                "Best Margins",
                render_table(&breakdown_rows(&record.top_margins, format_pct)),
            );
            panel(
                "Worst Margins",
                render_table(&breakdown_rows(&record.bot_margins, format_pct)),
            );
        }
    }
    out
}
