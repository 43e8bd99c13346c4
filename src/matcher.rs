// Header matching: map raw column labels onto the fixed role vocabulary.
//
// Roles are tried in `Role::ALL` order, keywords in table order, labels in
// file order. The first hit binds and removes that label from the pool, so
// the outcome is deterministic even when several labels could fit a role.
use crate::types::Role;
use tracing::debug;

/// Keywords per role; order within a list is match precedence.
pub fn keywords(role: Role) -> &'static [&'static str] {
    match role {
        Role::Revenue => &["Sales", "Revenue", "Amount", "Total"],
        Role::Profit => &["Profit"],
        Role::Cost => &["Cost", "COGS"],
        Role::Quantity => &["Quantity", "Qty", "Units"],
        Role::Date => &["Date", "Order Date"],
        Role::City => &["City", "Region"],
        Role::Category => &["Category", "Sub Category"],
        Role::Product => &["Product", "Item", "Name"],
    }
}

/// Case-insensitive: exact after trimming, or the keyword occurs inside the label.
pub fn label_matches(label: &str, keyword: &str) -> bool {
    let label = label.trim().to_lowercase();
    let keyword = keyword.trim().to_lowercase();
    label == keyword || label.contains(&keyword)
}

/// Return the `(role, column index)` candidates for a header row.
pub fn match_headers(labels: &[String]) -> Vec<(Role, usize)> {
    let mut taken = vec![false; labels.len()];
    let mut out = Vec::new();
    for role in Role::ALL {
        let hit = keywords(role).iter().find_map(|kw| {
            labels
                .iter()
                .enumerate()
                .find(|(idx, label)| !taken[*idx] && label_matches(label, kw))
                .map(|(idx, _)| idx)
        });
        if let Some(idx) = hit {
            debug!("bound {} -> {:?}", role, labels[idx]);
            taken[idx] = true;
            out.push((role, idx));
        }
    }
    out
}
