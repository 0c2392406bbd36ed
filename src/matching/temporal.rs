//! Coarse temporal intent of a query ("this year" vs "by June") and the score term it
//! contributes for a market's resolution date.

use crate::config::config::HeuristicWeights;
use crate::config::lexicon::CompiledLexicon;
use crate::matching::tokenization::TokenizedText;
use chrono::{DateTime, Datelike, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalQualifier {
    /// The question is about the whole of `year` ("this year", "by December", "2025").
    YearEnd { year: i32 },
    /// The question is about the next few months of `year` ("by June", "soon").
    NearTerm { year: i32 },
}

impl TemporalQualifier {
    /// Classify the query text plus any extra qualifier text (e.g. from a query context).
    /// Near-term references win over year-end ones when both appear.
    pub fn classify(
        texts: &[&TokenizedText],
        lexicon: &CompiledLexicon,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let explicit_year = texts.iter().find_map(|t| t.first_year());
        let year = explicit_year.unwrap_or_else(|| now.year());

        let near_term = texts.iter().any(|t| lexicon.near_term_refs.any_in(t));
        if near_term {
            return Some(TemporalQualifier::NearTerm { year });
        }

        let year_end =
            explicit_year.is_some() || texts.iter().any(|t| lexicon.year_end_refs.any_in(t));
        if year_end {
            return Some(TemporalQualifier::YearEnd { year });
        }

        None
    }

    pub fn year(&self) -> i32 {
        match self {
            TemporalQualifier::YearEnd { year } | TemporalQualifier::NearTerm { year } => *year,
        }
    }

    /// Score term for a market resolving at `end_date`. Markets resolving outside the
    /// qualifier's year get no term.
    pub fn term(&self, end_date: DateTime<Utc>, w: &HeuristicWeights) -> f64 {
        if end_date.year() != self.year() {
            return 0.0;
        }
        let month = end_date.month();
        match self {
            TemporalQualifier::YearEnd { .. } => match month {
                11..=12 => w.year_end_nov_dec,
                9..=10 => w.year_end_sep_oct,
                7..=8 => w.year_end_jul_aug,
                _ => w.year_end_early,
            },
            TemporalQualifier::NearTerm { .. } => match month {
                1..=7 => w.near_term_early,
                8..=9 => w.near_term_aug_sep,
                _ => w.near_term_late,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
    }

    fn classify(q: &str) -> Option<TemporalQualifier> {
        let lexicon = CompiledLexicon::default();
        let t = TokenizedText::new(q);
        TemporalQualifier::classify(&[&t], &lexicon, now())
    }

    fn month(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, m, 15, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("Bitcoin $200k this year"),
            Some(TemporalQualifier::YearEnd { year: 2025 })
        );
        assert_eq!(
            classify("ETH flips BTC by June"),
            Some(TemporalQualifier::NearTerm { year: 2025 })
        );
        assert_eq!(
            classify("recession in 2026"),
            Some(TemporalQualifier::YearEnd { year: 2026 })
        );
        // near-term wins when both appear
        assert_eq!(
            classify("this year, maybe by june"),
            Some(TemporalQualifier::NearTerm { year: 2025 })
        );
        assert_eq!(classify("Fed cut rates in March"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn test_context_text_is_classified_too() {
        let lexicon = CompiledLexicon::default();
        let q = TokenizedText::new("Fed cuts");
        let ctx = TokenizedText::new("end of the year");
        assert_eq!(
            TemporalQualifier::classify(&[&q, &ctx], &lexicon, now()),
            Some(TemporalQualifier::YearEnd { year: 2025 })
        );
    }

    #[test]
    fn test_year_end_ladder_is_monotonic() {
        let w = HeuristicWeights::default();
        let q = TemporalQualifier::YearEnd { year: 2025 };
        let terms: Vec<f64> = (1..=12).map(|m| q.term(month(m), &w)).collect();
        assert!(terms.windows(2).all(|p| p[0] <= p[1]), "{:?}", terms);
        assert_eq!(terms[11], 0.4);
        assert_eq!(terms[0], -0.2);
    }

    #[test]
    fn test_near_term_ladder_is_monotonic() {
        let w = HeuristicWeights::default();
        let q = TemporalQualifier::NearTerm { year: 2025 };
        let terms: Vec<f64> = (1..=12).map(|m| q.term(month(m), &w)).collect();
        assert!(terms.windows(2).all(|p| p[0] >= p[1]), "{:?}", terms);
    }

    #[test]
    fn test_other_year_has_no_term() {
        let w = HeuristicWeights::default();
        let q = TemporalQualifier::YearEnd { year: 2025 };
        let d = Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap();
        assert_eq!(q.term(d, &w), 0.0);
    }
}
