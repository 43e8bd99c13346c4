use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tabled::Tabled;

/// A single cell as it arrives from the upload, before any coercion.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed label for grouping; `None` for blank cells.
    pub fn label(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(self.to_string().trim().to_string())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(s.to_string())
        }
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            // Whole numbers print without a trailing ".0" so "1200" stays "1200".
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Date(d) if d.num_seconds_from_midnight() == 0 => {
                write!(f, "{}", d.format("%Y-%m-%d"))
            }
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// The uploaded table: unique, trimmed column labels and rows aligned to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawFrame {
    /// Build a frame, padding or truncating every row to the header width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, Cell::Empty);
                r
            })
            .collect();
        Self { columns, rows }
    }

    /// Convenience constructor for text-only tables.
    #[cfg(test)]
    pub fn from_strings(columns: &[&str], rows: &[&[&str]]) -> Self {
        Self::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| Cell::from(*c)).collect())
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().map(move |r| &r[idx])
    }

    /// First non-blank cell of a column, used for the mapping preview.
    pub fn sample(&self, idx: usize) -> Option<&Cell> {
        self.column(idx).find(|c| !c.is_empty())
    }
}

/// Semantic column identities, in matching order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Revenue,
    Profit,
    Cost,
    Quantity,
    Date,
    City,
    Category,
    Product,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Revenue,
        Role::Profit,
        Role::Cost,
        Role::Quantity,
        Role::Date,
        Role::City,
        Role::Category,
        Role::Product,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Revenue => "revenue",
            Role::Profit => "profit",
            Role::Cost => "cost",
            Role::Quantity => "quantity",
            Role::Date => "date",
            Role::City => "city",
            Role::Category => "category",
            Role::Product => "product",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role -> column index. A column is bound to at most one role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMapping {
    bindings: BTreeMap<Role, usize>,
}

impl ResolvedMapping {
    /// Bind `role` to `column`. Returns `false` (and changes nothing) when
    /// either side is already taken.
    pub fn bind(&mut self, role: Role, column: usize) -> bool {
        if self.bindings.contains_key(&role) || self.bindings.values().any(|c| *c == column) {
            return false;
        }
        self.bindings.insert(role, column);
        true
    }

    pub fn get(&self, role: Role) -> Option<usize> {
        self.bindings.get(&role).copied()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.bindings.contains_key(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Role, usize)> + '_ {
        self.bindings.iter().map(|(r, c)| (*r, *c))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// Where the profit column came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitSource {
    Column,
    RevenueMinusCost,
    Estimated,
}

/// Presence flags read by the dashboard to decide which panels to draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Meta {
    pub has_real_profit: bool,
    pub has_date: bool,
    pub has_city: bool,
    pub has_category_or_product: bool,
    pub has_quantity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedItem {
    pub label: String,
    pub value: f64,
}

impl RankedItem {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Tabled)]
pub struct MappingPreviewRow {
    #[serde(rename = "Role")]
    #[tabled(rename = "Role")]
    pub role: String,
    #[serde(rename = "Column")]
    #[tabled(rename = "Column")]
    pub column: String,
    #[serde(rename = "Sample")]
    #[tabled(rename = "Sample")]
    pub sample: String,
}

/// Everything the dashboard and the advisor need to know about one upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub total_revenue: f64,
    pub total_profit: f64,
    pub margin_pct: f64,
    pub vat_due: f64,
    pub avg_order_value: f64,
    pub units: usize,
    pub total_units: Option<f64>,
    pub total_cost: Option<f64>,
    pub trend_data: Option<BTreeMap<NaiveDate, f64>>,
    pub city_dist: Option<Vec<RankedItem>>,
    pub top_margins: Vec<RankedItem>,
    pub bot_margins: Vec<RankedItem>,
    pub top_revenue_items: Vec<RankedItem>,
    pub mapping_preview: Vec<MappingPreviewRow>,
    pub profit_source: ProfitSource,
    pub meta: Meta,
}

/// Result of one pipeline run. A failure serializes as `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Ready(Box<MetricRecord>),
    Failed { error: String },
}

impl Outcome {
    pub fn record(&self) -> Option<&MetricRecord> {
        match self {
            Outcome::Ready(r) => Some(r),
            Outcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Ready(_) => None,
            Outcome::Failed { error } => Some(error),
        }
    }
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct KpiRow {
    #[tabled(rename = "KPI")]
    pub kpi: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct BreakdownRow {
    #[tabled(rename = "Rank")]
    pub rank: usize,
    #[tabled(rename = "Label")]
    pub label: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_header_width() {
        let frame = RawFrame::new(
            vec!["A".into(), "B".into(), "C".into()],
            vec![vec![Cell::from("1")], vec![Cell::from("1"), Cell::from("2"), Cell::from("3"), Cell::from("4")]],
        );
        assert!(frame.rows.iter().all(|r| r.len() == 3));
        assert_eq!(frame.rows[0][2], Cell::Empty);
    }

    #[test]
    fn mapping_rejects_rebinding_a_column() {
        let mut m = ResolvedMapping::default();
        assert!(m.bind(Role::Revenue, 0));
        assert!(!m.bind(Role::Profit, 0));
        assert!(!m.bind(Role::Revenue, 1));
        assert!(m.bind(Role::Profit, 1));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn cell_display_keeps_whole_numbers_plain() {
        assert_eq!(Cell::Number(1200.0).to_string(), "1200");
        assert_eq!(Cell::Number(12.5).to_string(), "12.5");
        let d = NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        assert_eq!(Cell::Date(d).to_string(), "2024-01-02");
    }

    #[test]
    fn failed_outcome_serializes_as_single_error_field() {
        let out = Outcome::Failed {
            error: "boom".into(),
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "boom" }));
    }
}
