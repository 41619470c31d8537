use std::cmp::Ordering;
use std::collections::HashSet;

use crate::domain::advisor::{Advisor, AdvisorId};

/// Orders eligible advisors by rating (unrated last), then seniority, then id.
///
/// Inactive advisors and anyone in `exclude` are skipped. At most `limit` advisors are returned.
pub fn rank_advisors<'a>(
    advisors: &'a [Advisor],
    exclude: &HashSet<AdvisorId>,
    limit: usize,
) -> Vec<&'a Advisor> {
    let mut eligible: Vec<&Advisor> = advisors
        .iter()
        .filter(|advisor| advisor.is_active() && !exclude.contains(&advisor.id))
        .collect();

    eligible.sort_by(|left, right| compare(left, right));
    eligible.truncate(limit);
    eligible
}

fn compare(left: &Advisor, right: &Advisor) -> Ordering {
    let by_rating = match (left.rating, right.rating) {
        (Some(l), Some(r)) => r.cmp(&l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_rating
        .then_with(|| left.created_at.cmp(&right.created_at))
        .then_with(|| left.id.cmp(&right.id))
}
