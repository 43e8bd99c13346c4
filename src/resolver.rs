use crate::error::PipelineError;
use crate::matcher::match_headers;
use crate::types::{Meta, ProfitSource, RawFrame, ResolvedMapping, Role};
use tracing::{debug, warn};

/// Committed bindings plus what they allow downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub mapping: ResolvedMapping,
    pub profit_source: ProfitSource,
    pub meta: Meta,
}

impl Resolution {
    /// Product when bound, else category.
    pub fn item_column(&self) -> Option<usize> {
        self.mapping
            .get(Role::Product)
            .or_else(|| self.mapping.get(Role::Category))
    }
}

pub fn resolve(frame: &RawFrame) -> Result<Resolution, PipelineError> {
    let mut mapping = ResolvedMapping::default();
    for (role, column) in match_headers(&frame.columns) {
        if !mapping.bind(role, column) {
            // The matcher never proposes a taken column; keep the first binding if it does.
            warn!("ignoring duplicate binding {} -> {}", role, column);
        }
    }

    if !mapping.contains(Role::Revenue) {
        return Err(PipelineError::MissingRequiredRole(Role::Revenue));
    }

    let profit_source = if mapping.contains(Role::Profit) {
        ProfitSource::Column
    } else if mapping.contains(Role::Cost) {
        ProfitSource::RevenueMinusCost
    } else {
        warn!("no profit or cost column; profit will be estimated from revenue");
        ProfitSource::Estimated
    };

    let meta = Meta {
        has_real_profit: profit_source != ProfitSource::Estimated,
        has_date: mapping.contains(Role::Date),
        has_city: mapping.contains(Role::City),
        has_category_or_product: mapping.contains(Role::Category)
            || mapping.contains(Role::Product),
        has_quantity: mapping.contains(Role::Quantity),
    };
    debug!(
        "resolved {} roles {:?}, profit from {:?}",
        mapping.len(),
        mapping.iter().collect::<Vec<_>>(),
        profit_source
    );

    Ok(Resolution {
        mapping,
        profit_source,
        meta,
    })
}
