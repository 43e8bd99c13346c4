use crate::config::{
    PROFIT_ESTIMATE_RATE, TOP_CITIES, TOP_MARGIN_ITEMS, TOP_REVENUE_ITEMS, VAT_RATE,
};
use crate::error::PipelineError;
use crate::resolver::{resolve, Resolution};
use crate::types::{
    Cell, MappingPreviewRow, MetricRecord, Outcome, ProfitSource, RankedItem, RawFrame, Role,
};
use crate::util::{coerce_column, format_int, parse_date, round1};
use chrono::NaiveDate;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{info, warn};

/// The raw frame plus coerced numeric columns, row-aligned with it.
#[derive(Debug, Clone)]
pub struct TypedFrame<'a> {
    pub raw: &'a RawFrame,
    pub revenue: Vec<f64>,
    pub profit: Vec<f64>,
    pub cost: Option<Vec<f64>>,
    pub quantity: Option<Vec<f64>>,
}

impl<'a> TypedFrame<'a> {
    pub fn build(raw: &'a RawFrame, resolution: &Resolution) -> Self {
        let len = raw.len();
        let column = |role: Role| resolution.mapping.get(role).map(|idx| raw.column(idx));
        let optional = |role: Role| {
            resolution
                .mapping
                .get(role)
                .map(|idx| coerce_column(Some(raw.column(idx)), len))
        };

        let revenue = coerce_column(column(Role::Revenue), len);
        let cost = optional(Role::Cost);
        let quantity = optional(Role::Quantity);
        let profit = match resolution.profit_source {
            ProfitSource::Column => coerce_column(column(Role::Profit), len),
            ProfitSource::RevenueMinusCost => {
                let cost = coerce_column(column(Role::Cost), len);
                revenue.iter().zip(cost).map(|(r, c)| r - c).collect()
            }
            ProfitSource::Estimated => revenue.iter().map(|r| r * PROFIT_ESTIMATE_RATE).collect(),
        };

        Self {
            raw,
            revenue,
            profit,
            cost,
            quantity,
        }
    }
}

/// Run the whole pipeline and report failures as an error outcome.
pub fn analyze(frame: &RawFrame) -> Outcome {
    match run_pipeline(frame) {
        Ok(record) => {
            info!(
                "analyzed {} rows: revenue {:.2}, margin {:.1}%",
                format_int(record.units),
                record.total_revenue,
                record.margin_pct
            );
            Outcome::Ready(Box::new(record))
        }
        Err(e) => {
            warn!("analysis failed: {}", e);
            Outcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Resolve roles, coerce, and compute. Each stage short-circuits the rest.
pub fn run_pipeline(frame: &RawFrame) -> Result<MetricRecord, PipelineError> {
    let resolution = resolve(frame)?;
    if frame.is_empty() {
        return Err(PipelineError::EmptyFrame);
    }
    let typed = TypedFrame::build(frame, &resolution);
    if typed.revenue.iter().all(|v| *v == 0.0) {
        return Err(PipelineError::CoercionTotalZero);
    }
    catch_unwind(AssertUnwindSafe(|| compute_metrics(&typed, &resolution)))
        .unwrap_or_else(|payload| Err(PipelineError::UnexpectedFailure(panic_detail(payload))))
}

fn panic_detail(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic during metric computation".to_string())
}

pub fn compute_metrics(
    typed: &TypedFrame<'_>,
    resolution: &Resolution,
) -> Result<MetricRecord, PipelineError> {
    let raw = typed.raw;
    let rows = raw.len();
    let meta = resolution.meta;

    let total_revenue: f64 = typed.revenue.iter().sum();
    let total_profit = match resolution.profit_source {
        ProfitSource::Estimated => PROFIT_ESTIMATE_RATE * total_revenue,
        _ => typed.profit.iter().sum(),
    };
    if !total_revenue.is_finite() || !total_profit.is_finite() {
        return Err(PipelineError::UnexpectedFailure(
            "revenue or profit total is not a finite number".to_string(),
        ));
    }

    let margin_pct = if total_revenue == 0.0 {
        0.0
    } else {
        round1(100.0 * total_profit / total_revenue)
    };
    let avg_order_value = if rows == 0 {
        0.0
    } else {
        total_revenue / rows as f64
    };

    let trend_data = resolution
        .mapping
        .get(Role::Date)
        .map(|idx| daily_revenue(raw.column(idx), &typed.revenue));

    let city_dist = resolution.mapping.get(Role::City).map(|idx| {
        let sums = sum_by_label(raw.column(idx), &typed.revenue, &typed.profit);
        rank(
            sums.into_iter().map(|(label, (rev, _))| (label, rev)),
            Direction::Descending,
            TOP_CITIES,
        )
    });

    let (top_revenue_items, top_margins, bot_margins) = match resolution.item_column() {
        Some(idx) => {
            let groups = sum_by_label(raw.column(idx), &typed.revenue, &typed.profit);
            let top_revenue = rank(
                groups.iter().map(|(label, (rev, _))| (label.clone(), *rev)),
                Direction::Descending,
                TOP_REVENUE_ITEMS,
            );
            if meta.has_real_profit {
                let ratios: Vec<(String, f64)> = groups
                    .iter()
                    .filter(|(_, (rev, _))| *rev > 0.0)
                    .map(|(label, (rev, profit))| (label.clone(), profit / rev))
                    .collect();
                let top = rank(ratios.iter().cloned(), Direction::Descending, TOP_MARGIN_ITEMS);
                let bot = rank(ratios, Direction::Ascending, TOP_MARGIN_ITEMS);
                (top_revenue, as_percent(top), as_percent(bot))
            } else {
                (top_revenue, Vec::new(), Vec::new())
            }
        }
        None => (Vec::new(), Vec::new(), Vec::new()),
    };

    Ok(MetricRecord {
        total_revenue,
        total_profit,
        margin_pct,
        vat_due: VAT_RATE * total_revenue,
        avg_order_value,
        units: rows,
        total_units: typed.quantity.as_ref().map(|q| q.iter().sum()),
        total_cost: typed.cost.as_ref().map(|c| c.iter().sum()),
        trend_data,
        city_dist,
        top_margins,
        bot_margins,
        top_revenue_items,
        mapping_preview: mapping_preview(raw, resolution),
        profit_source: resolution.profit_source,
        meta,
    })
}

/// Revenue per calendar day; rows with unreadable dates are left out.
fn daily_revenue<'c>(
    dates: impl Iterator<Item = &'c Cell>,
    revenue: &[f64],
) -> BTreeMap<NaiveDate, f64> {
    let mut out = BTreeMap::new();
    for (cell, rev) in dates.zip(revenue) {
        if let Some(day) = parse_date(cell) {
            *out.entry(day).or_insert(0.0) += rev;
        }
    }
    out
}

/// (revenue, profit) sums per trimmed label; blank labels are skipped.
fn sum_by_label<'c>(
    labels: impl Iterator<Item = &'c Cell>,
    revenue: &[f64],
    profit: &[f64],
) -> HashMap<String, (f64, f64)> {
    let mut map: HashMap<String, (f64, f64)> = HashMap::new();
    for ((cell, rev), profit) in labels.zip(revenue).zip(profit) {
        if let Some(label) = cell.label() {
            let e = map.entry(label).or_insert((0.0, 0.0));
            e.0 += rev;
            e.1 += profit;
        }
    }
    map
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Ascending,
    Descending,
}

/// Sort by value in `dir`, ties broken by label ascending, keep `k`.
fn rank<I>(entries: I, dir: Direction, k: usize) -> Vec<RankedItem>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut v: Vec<(String, f64)> = entries.into_iter().collect();
    v.sort_by(|a, b| {
        let by_value = match dir {
            Direction::Ascending => a.1.partial_cmp(&b.1),
            Direction::Descending => b.1.partial_cmp(&a.1),
        };
        by_value
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    v.into_iter()
        .take(k)
        .map(|(label, value)| RankedItem::new(label, value))
        .collect()
}

fn as_percent(items: Vec<RankedItem>) -> Vec<RankedItem> {
    items
        .into_iter()
        .map(|i| RankedItem::new(i.label, round1(i.value * 100.0)))
        .collect()
}

/// One row per role in matching order, with the first non-blank value as a sample.
/// Synthesized profit is listed with how it was derived.
fn mapping_preview(raw: &RawFrame, resolution: &Resolution) -> Vec<MappingPreviewRow> {
    let label_of = |role: Role| {
        resolution
            .mapping
            .get(role)
            .map(|idx| raw.columns[idx].clone())
            .unwrap_or_default()
    };
    let mut rows = Vec::new();
    for role in Role::ALL {
        if let Some(idx) = resolution.mapping.get(role) {
            rows.push(MappingPreviewRow {
                role: role.to_string(),
                column: raw.columns[idx].clone(),
                sample: raw.sample(idx).map(|c| c.to_string()).unwrap_or_default(),
            });
        } else if role == Role::Profit {
            let column = match resolution.profit_source {
                ProfitSource::RevenueMinusCost => {
                    format!("({} - {})", label_of(Role::Revenue), label_of(Role::Cost))
                }
                ProfitSource::Estimated => format!(
                    "(estimated: {:.0}% of {})",
                    PROFIT_ESTIMATE_RATE * 100.0,
                    label_of(Role::Revenue)
                ),
                ProfitSource::Column => continue,
            };
            rows.push(MappingPreviewRow {
                role: role.to_string(),
                column,
                sample: String::new(),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn labels(items: &[RankedItem]) -> Vec<&str> {
        items.iter().map(|i| i.label.as_str()).collect()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn s1_dated_city_sales_with_profit() {
        let frame = RawFrame::from_strings(
            &["Order Date", "City", "Sales", "Profit"],
            &[
                &["2024-01-01", "Riyadh", "1,200 SAR", "200"],
                &["2024-01-01", "Jeddah", "800", "100"],
                &["2024-01-02", "Riyadh", "1,000", "150"],
            ],
        );
        let r = run_pipeline(&frame).unwrap();
        assert!(close(r.total_revenue, 3000.0));
        assert!(close(r.total_profit, 450.0));
        assert_eq!(r.margin_pct, 15.0);
        assert!(close(r.vat_due, 450.0));
        assert_eq!(r.units, 3);
        assert!(close(r.avg_order_value, 1000.0));

        let trend = r.trend_data.unwrap();
        assert_eq!(trend.len(), 2);
        assert!(close(trend[&day("2024-01-01")], 2000.0));
        assert!(close(trend[&day("2024-01-02")], 1000.0));

        let cities = r.city_dist.unwrap();
        assert_eq!(labels(&cities), vec!["Riyadh", "Jeddah"]);
        assert!(close(cities[0].value, 2200.0));
        assert!(close(cities[1].value, 800.0));

        assert!(r.meta.has_real_profit);
        assert!(r.meta.has_date);
        assert!(r.meta.has_city);
        assert!(r.total_units.is_none());
    }

    #[test]
    fn s2_revenue_only_estimates_profit() {
        let frame = RawFrame::from_strings(&["Revenue"], &[&["500"], &["500"]]);
        let r = run_pipeline(&frame).unwrap();
        assert!(close(r.total_revenue, 1000.0));
        assert!(close(r.total_profit, 200.0));
        assert_eq!(r.margin_pct, 20.0);
        assert_eq!(r.profit_source, ProfitSource::Estimated);
        assert!(!r.meta.has_real_profit);
        assert!(!r.meta.has_date);
        assert!(r.trend_data.is_none());
        assert!(r.city_dist.is_none());
        assert!(r.top_margins.is_empty());
    }

    #[test]
    fn s3_profit_from_cost() {
        let frame = RawFrame::from_strings(&["Sales", "Cost"], &[&["100", "80"], &["200", "150"]]);
        let r = run_pipeline(&frame).unwrap();
        assert!(close(r.total_revenue, 300.0));
        assert!(close(r.total_profit, 70.0));
        assert!(r.meta.has_real_profit);
        assert_eq!(r.profit_source, ProfitSource::RevenueMinusCost);
        assert_eq!(r.total_cost, Some(230.0));
    }

    #[test]
    fn s4_no_revenue_column() {
        let frame = RawFrame::from_strings(&["Name", "Price"], &[&["Tea", "5"]]);
        assert_eq!(
            run_pipeline(&frame).unwrap_err(),
            PipelineError::MissingRequiredRole(Role::Revenue)
        );
        let out = analyze(&frame);
        assert!(out.record().is_none());
        assert!(out.error().unwrap().contains("MissingRequiredRole(\"revenue\")"));
    }

    #[test]
    fn s5_unparseable_revenue() {
        let frame = RawFrame::from_strings(&["Sales"], &[&["abc"], &["—"], &[""]]);
        assert_eq!(
            run_pipeline(&frame).unwrap_err(),
            PipelineError::CoercionTotalZero
        );
        assert!(analyze(&frame).error().unwrap().starts_with("CoercionTotalZero"));
    }

    #[test]
    fn s6_product_rankings() {
        let frame = RawFrame::from_strings(
            &["Product", "Sales", "Profit"],
            &[
                &["A", "600", "60"],
                &["B", "500", "150"],
                &["C", "800", "80"],
                &["D", "200", "60"],
                &["E", "800", "240"],
                &["A", "400", "40"],
            ],
        );
        let r = run_pipeline(&frame).unwrap();
        assert_eq!(labels(&r.top_revenue_items), vec!["A", "C", "E", "B", "D"]);
        assert!(close(r.top_revenue_items[0].value, 1000.0));
        // B, D and E all sit at 30%; label order breaks the tie.
        assert_eq!(labels(&r.top_margins), vec!["B", "D", "E"]);
        assert_eq!(r.top_margins[0].value, 30.0);
        assert_eq!(labels(&r.bot_margins), vec!["A", "C", "B"]);
        assert_eq!(r.bot_margins[0].value, 10.0);
        assert!(r.meta.has_category_or_product);
    }

    #[test]
    fn header_only_frame_is_empty() {
        let frame = RawFrame::from_strings(&["Sales"], &[]);
        assert_eq!(run_pipeline(&frame).unwrap_err(), PipelineError::EmptyFrame);
    }

    #[test]
    fn invalid_dates_leave_trend_but_count_in_totals() {
        let frame = RawFrame::from_strings(
            &["Date", "Sales"],
            &[&["2024-03-01", "10"], &["someday", "90"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert!(close(r.total_revenue, 100.0));
        let trend = r.trend_data.unwrap();
        assert_eq!(trend.len(), 1);
        assert!(close(trend[&day("2024-03-01")], 10.0));
    }

    #[test]
    fn estimated_profit_hides_margin_rankings_but_keeps_revenue_items() {
        let frame = RawFrame::from_strings(
            &["Category", "Amount"],
            &[&["Tea", "10"], &["Coffee", "30"], &[" Tea ", "5"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert_eq!(labels(&r.top_revenue_items), vec!["Coffee", "Tea"]);
        assert!(close(r.top_revenue_items[1].value, 15.0));
        assert!(r.top_margins.is_empty());
        assert!(r.bot_margins.is_empty());
    }

    #[test]
    fn groups_without_positive_revenue_are_not_ranked_by_margin() {
        let frame = RawFrame::from_strings(
            &["Product", "Sales", "Profit"],
            &[&["Refund", "-50", "-5"], &["Tea", "100", "20"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert_eq!(labels(&r.top_margins), vec!["Tea"]);
        assert_eq!(labels(&r.bot_margins), vec!["Tea"]);
        assert_eq!(labels(&r.top_revenue_items), vec!["Tea", "Refund"]);
    }

    #[test]
    fn quantity_is_summed_separately_from_row_count() {
        let frame = RawFrame::from_strings(
            &["Sales", "Qty"],
            &[&["10", "3"], &["20", "x"], &["30", "2"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert_eq!(r.units, 3);
        assert_eq!(r.total_units, Some(5.0));
        assert!(r.meta.has_quantity);
    }

    #[test]
    fn city_ties_break_alphabetically_and_cap_at_five() {
        let frame = RawFrame::from_strings(
            &["City", "Sales"],
            &[
                &["Taif", "10"],
                &["Abha", "10"],
                &["Riyadh", "50"],
                &["Jeddah", "40"],
                &["Dammam", "10"],
                &["Mecca", "10"],
                &["Khobar", "5"],
            ],
        );
        let cities = run_pipeline(&frame).unwrap().city_dist.unwrap();
        assert_eq!(
            labels(&cities),
            vec!["Riyadh", "Jeddah", "Abha", "Dammam", "Mecca"]
        );
    }

    #[test]
    fn mapping_preview_lists_bindings_and_derived_profit() {
        let frame = RawFrame::from_strings(
            &["Sales", "Cost", "City"],
            &[&["", "", ""], &["100", "60", "Riyadh"]],
        );
        let r = run_pipeline(&frame).unwrap();
        let rows: Vec<(&str, &str, &str)> = r
            .mapping_preview
            .iter()
            .map(|m| (m.role.as_str(), m.column.as_str(), m.sample.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("revenue", "Sales", "100"),
                ("profit", "(Sales - Cost)", ""),
                ("cost", "Cost", "60"),
                ("city", "City", "Riyadh"),
            ]
        );
    }

    #[test]
    fn zero_revenue_margin_is_zero() {
        // Revenue nets to zero but is not all-zero cells.
        let frame = RawFrame::from_strings(
            &["Sales", "Profit"],
            &[&["100", "10"], &["-100", "5"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert_eq!(r.total_revenue, 0.0);
        assert_eq!(r.margin_pct, 0.0);
    }

    #[test]
    fn record_serializes_with_dashboard_field_names() {
        let frame = RawFrame::from_strings(&["Revenue"], &[&["500"]]);
        let json = serde_json::to_value(analyze(&frame)).unwrap();
        assert_eq!(json["meta"]["has_real_profit"], false);
        assert!(json["trend_data"].is_null());
        assert_eq!(json["profit_source"], "estimated");
        assert!(json.get("margin_pct").is_some());
        assert!(json.get("gross_margin_pct").is_none());
    }

    #[test]
    fn overflowing_totals_are_unexpected_failures() {
        let big = format!("1{}", "0".repeat(308));
        let frame = RawFrame::from_strings(&["Sales"], &[&[big.as_str()], &[big.as_str()]]);
        assert!(matches!(
            run_pipeline(&frame),
            Err(PipelineError::UnexpectedFailure(_))
        ));
        let out = analyze(&frame);
        assert!(out.record().is_none());
        assert!(out.error().unwrap().starts_with("UnexpectedFailure"));
    }

    #[test]
    fn two_digit_year_dates_stay_out_of_the_trend() {
        let frame = RawFrame::from_strings(
            &["Order Date", "Sales"],
            &[&["1/15/24", "10"], &["1/16/24", "20"], &["2024-01-17", "5"]],
        );
        let r = run_pipeline(&frame).unwrap();
        assert!(close(r.total_revenue, 35.0));
        let trend = r.trend_data.unwrap();
        assert_eq!(trend.keys().copied().collect::<Vec<_>>(), vec![day("2024-01-17")]);
    }

    fn sales_frame(rows: &[(u32, usize, u32)]) -> RawFrame {
        const CITIES: [&str; 8] = [
            "Riyadh", "Jeddah", "Dammam", "Mecca", "Medina", "Abha", "Taif", "Khobar",
        ];
        let start = day("2024-01-01");
        RawFrame::new(
            vec!["Order Date".into(), "City".into(), "Sales".into()],
            rows.iter()
                .map(|(rev, city, offset)| {
                    let d = start + chrono::Duration::days(i64::from(*offset));
                    vec![
                        Cell::Text(d.format("%Y-%m-%d").to_string()),
                        Cell::Text(CITIES[*city].to_string()),
                        Cell::Text(format!("{} SAR", format_int(*rev))),
                    ]
                })
                .collect(),
        )
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<(u32, usize, u32)>> {
        proptest::collection::vec((1u32..100_000, 0usize..8, 0u32..60), 1..60)
    }

    proptest! {
        #[test]
        fn row_count_is_preserved(rows in rows_strategy()) {
            let frame = sales_frame(&rows);
            let resolution = resolve(&frame).unwrap();
            let typed = TypedFrame::build(&frame, &resolution);
            prop_assert_eq!(typed.revenue.len(), rows.len());
            prop_assert_eq!(typed.profit.len(), rows.len());
            prop_assert_eq!(run_pipeline(&frame).unwrap().units, rows.len());
        }

        #[test]
        fn totals_add_up_across_partitions(rows in rows_strategy(), split in 0usize..60) {
            let split = split.min(rows.len());
            let whole = run_pipeline(&sales_frame(&rows)).unwrap().total_revenue;
            let part = |r: &[(u32, usize, u32)]| {
                if r.is_empty() { 0.0 } else { run_pipeline(&sales_frame(r)).unwrap().total_revenue }
            };
            let expected: f64 = rows.iter().map(|(rev, _, _)| f64::from(*rev)).sum();
            prop_assert_eq!(whole, expected);
            prop_assert_eq!(part(&rows[..split]) + part(&rows[split..]), whole);
        }

        #[test]
        fn vat_and_margin_laws_hold(rows in rows_strategy(), profit_pct in 0u32..100) {
            let mut frame = sales_frame(&rows);
            frame.columns.push("Profit".into());
            for (row, (rev, _, _)) in frame.rows.iter_mut().zip(&rows) {
                row.push(Cell::Number(f64::from(*rev) * f64::from(profit_pct) / 100.0));
            }
            let r = run_pipeline(&frame).unwrap();
            prop_assert_eq!(r.vat_due, VAT_RATE * r.total_revenue);
            prop_assert_eq!(r.margin_pct, round1(100.0 * r.total_profit / r.total_revenue));
        }

        #[test]
        fn estimated_profit_is_a_fixed_share(revs in proptest::collection::vec(1u32..1_000_000, 1..40)) {
            let frame = RawFrame::new(
                vec!["Revenue".into()],
                revs.iter().map(|r| vec![Cell::Text(r.to_string())]).collect(),
            );
            let r = run_pipeline(&frame).unwrap();
            prop_assert_eq!(r.total_profit, PROFIT_ESTIMATE_RATE * r.total_revenue);
            prop_assert!(!r.meta.has_real_profit);
        }

        #[test]
        fn trend_keys_ascend(rows in rows_strategy()) {
            let trend = run_pipeline(&sales_frame(&rows)).unwrap().trend_data.unwrap();
            let keys: Vec<NaiveDate> = trend.keys().copied().collect();
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn city_dist_is_the_top_five(rows in rows_strategy()) {
            let cities = run_pipeline(&sales_frame(&rows)).unwrap().city_dist.unwrap();
            prop_assert!(cities.len() <= TOP_CITIES);
            let frame = sales_frame(&rows);
            let mut all: HashMap<String, f64> = HashMap::new();
            for (row, (rev, _, _)) in frame.rows.iter().zip(&rows) {
                *all.entry(row[1].to_string()).or_insert(0.0) += f64::from(*rev);
            }
            let floor = cities.iter().map(|c| c.value).fold(f64::INFINITY, f64::min);
            for (city, total) in &all {
                if !cities.iter().any(|c| &c.label == city) {
                    prop_assert!(*total <= floor);
                }
            }
        }
    }
}
