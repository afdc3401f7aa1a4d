use serde::Serialize;
use std::fmt;

/// Percentage of `part` in `whole`, rounded to two decimals; 0 for an empty whole.
pub fn rate(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct JoinRates {
    /// Primary rows matched on identical addresses
    pub exact: f64,
    /// Primary rows matched exactly or at or above the similarity threshold
    pub inclusive: f64,
    /// Secondary rows reached by an exact match
    pub secondary: f64,
}

impl JoinRates {
    pub fn compute(
        primary_rows: usize,
        secondary_rows: usize,
        exact: usize,
        fuzzy: usize,
        secondary_exact: usize,
    ) -> Self {
        Self {
            exact: rate(exact, primary_rows),
            inclusive: rate(exact + fuzzy, primary_rows),
            secondary: rate(secondary_exact, secondary_rows),
        }
    }
}

impl fmt::Display for JoinRates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "exact match rate: {:.2}%", self.exact)?;
        writeln!(f, "match rate at or above threshold: {:.2}%", self.inclusive)?;
        write!(f, "secondary exact match rate: {:.2}%", self.secondary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_rounding_and_empty() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(5, 5), 100.0);
    }

    #[test]
    fn test_summary_text() {
        let rates = JoinRates::compute(2, 2, 0, 1, 0);
        let text = rates.to_string();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("50.00%"));
    }
}
