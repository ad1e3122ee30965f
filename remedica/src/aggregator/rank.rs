//! Merge/rank policy for aggregated results.
//!
//! Applied once after concatenating all providers' records, never
//! per-provider, so strong matches from a sparse provider are not crowded
//! out by a verbose one. Order: match score descending, then price
//! ascending, then in-stock before out-of-stock, then rating descending.

use std::cmp::Ordering;

use crate::aggregator::provider::ProductRecord;

/// Match quality of a record against a search term.
///
/// Exact name match beats prefix match beats generic-name substring match;
/// unmatched records rank last.
pub fn match_score(record: &ProductRecord, term: &str) -> u8 {
    let term = term.to_lowercase();
    let name = record.name.to_lowercase();

    if name == term {
        3
    } else if name.starts_with(&term) {
        2
    } else if record
        .generic_name
        .as_deref()
        .is_some_and(|g| g.to_lowercase().contains(&term))
    {
        1
    } else {
        0
    }
}

/// Sort records in place by the global ranking policy.
pub fn rank(records: &mut [ProductRecord], search_term: Option<&str>) {
    records.sort_by(|a, b| {
        if let Some(term) = search_term {
            let by_score = match_score(b, term).cmp(&match_score(a, term));
            if by_score != Ordering::Equal {
                return by_score;
            }
        }

        let by_price = a.price.total_cmp(&b.price);
        if by_price != Ordering::Equal {
            return by_price;
        }

        let by_stock = b.in_stock.cmp(&a.in_stock);
        if by_stock != Ordering::Equal {
            return by_stock;
        }

        b.rating
            .unwrap_or(0.0)
            .total_cmp(&a.rating.unwrap_or(0.0))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, price: f64) -> ProductRecord {
        ProductRecord {
            id: name.to_lowercase().replace(' ', "-"),
            name: name.to_string(),
            generic_name: None,
            price,
            currency: "ZAR".to_string(),
            in_stock: true,
            provider_id: "dischem".to_string(),
            rating: None,
        }
    }

    #[test]
    fn test_exact_match_beats_prefix_match() {
        let mut records = vec![
            record("Panado", 30.0),
            record("Panado Extra", 25.0),
            record("Allergex", 45.0),
        ];
        rank(&mut records, Some("panado"));

        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Panado", "Panado Extra", "Allergex"]);
    }

    #[test]
    fn test_generic_substring_outranks_no_match() {
        let mut with_generic = record("Pynstop", 19.95);
        with_generic.generic_name = Some("Paracetamol 500mg".to_string());
        let mut records = vec![record("Allergex", 45.0), with_generic];

        rank(&mut records, Some("paracetamol"));
        assert_eq!(records[0].name, "Pynstop");
    }

    #[test]
    fn test_price_breaks_score_ties() {
        let mut records = vec![record("Panado", 34.95), record("Panado", 29.95)];
        rank(&mut records, Some("panado"));
        assert_eq!(records[0].price, 29.95);
    }

    #[test]
    fn test_in_stock_breaks_price_ties() {
        let mut out = record("Panado", 29.95);
        out.in_stock = false;
        let mut records = vec![out, record("Panado", 29.95)];

        rank(&mut records, Some("panado"));
        assert!(records[0].in_stock);
        assert!(!records[1].in_stock);
    }

    #[test]
    fn test_rating_is_the_final_tie_break() {
        let mut low = record("Panado", 29.95);
        low.rating = Some(3.1);
        let mut high = record("Panado", 29.95);
        high.rating = Some(4.8);
        let mut records = vec![low, high];

        rank(&mut records, Some("panado"));
        assert_eq!(records[0].rating, Some(4.8));
    }

    #[test]
    fn test_no_search_term_sorts_by_price() {
        let mut records = vec![record("Allergex", 45.0), record("Panado", 29.95)];
        rank(&mut records, None);
        assert_eq!(records[0].name, "Panado");
    }

    #[test]
    fn test_match_score_is_case_insensitive() {
        let r = record("Panado", 29.95);
        assert_eq!(match_score(&r, "PANADO"), 3);
        assert_eq!(match_score(&r, "pan"), 2);
        assert_eq!(match_score(&r, "zyrtec"), 0);
    }
}
