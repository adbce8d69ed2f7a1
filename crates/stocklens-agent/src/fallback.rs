//! Degraded placeholder records for when live analysis cannot be obtained.

use std::collections::HashSet;

use stocklens_core::{
    Decision, OverallJudgement, PriceInfo, RecordKind, ScoredSummary, StreamRecord, Symbol,
};

/// Builds one deterministic, `degraded` record per expected top-level kind.
///
/// Consumers always receive a structurally complete analysis and only have to
/// check `degraded` to tell placeholders from live output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRecordGenerator;

impl FallbackRecordGenerator {
    pub const fn new() -> Self {
        Self
    }

    /// Placeholders for every expected kind, in canonical order.
    pub fn generate(&self, symbol: &Symbol, reason: &str) -> Vec<StreamRecord> {
        self.generate_missing(symbol, reason, &HashSet::new())
    }

    /// Placeholders for the expected kinds not in `delivered`.
    pub fn generate_missing(
        &self,
        symbol: &Symbol,
        reason: &str,
        delivered: &HashSet<RecordKind>,
    ) -> Vec<StreamRecord> {
        RecordKind::EXPECTED
            .into_iter()
            .filter(|kind| !delivered.contains(kind))
            .filter_map(|kind| self.placeholder(kind, symbol, reason))
            .collect()
    }

    /// Placeholder for one kind; `None` for kinds that have no placeholder.
    pub fn placeholder(
        &self,
        kind: RecordKind,
        symbol: &Symbol,
        reason: &str,
    ) -> Option<StreamRecord> {
        let record = match kind {
            RecordKind::PriceInfo => StreamRecord::PriceInfo(PriceInfo {
                symbol: symbol.to_string(),
                current_price: None,
                currency: None,
                change_percent: None,
                summary: unavailable("Price data", reason),
                degraded: true,
            }),
            RecordKind::TechnicalAnalysis => StreamRecord::TechnicalAnalysis(ScoredSummary {
                score: 0.0,
                summary: unavailable("Technical analysis", reason),
                degraded: true,
            }),
            RecordKind::FundamentalAnalysis => StreamRecord::FundamentalAnalysis(ScoredSummary {
                score: 0.0,
                summary: unavailable("Fundamental analysis", reason),
                degraded: true,
            }),
            RecordKind::OverallJudgement => StreamRecord::OverallJudgement(OverallJudgement {
                decision: Decision::Undetermined,
                rationale: unavailable("Overall judgement", reason),
                degraded: true,
            }),
            RecordKind::FreeformAnswer | RecordKind::Sources => return None,
        };
        Some(record)
    }
}

fn unavailable(subject: &str, reason: &str) -> String {
    let reason = reason.trim();
    if reason.is_empty() {
        format!("{subject} unavailable.")
    } else {
        format!("{subject} unavailable: {reason}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol() -> Symbol {
        Symbol::parse("NVDA").unwrap()
    }

    #[test]
    fn generates_every_expected_kind_marked_degraded() {
        let records = FallbackRecordGenerator::new().generate(&symbol(), "API key not valid");

        let kinds: Vec<_> = records.iter().map(StreamRecord::kind).collect();
        assert_eq!(kinds, RecordKind::EXPECTED.to_vec());
        assert!(records.iter().all(StreamRecord::is_degraded));

        let StreamRecord::PriceInfo(price) = &records[0] else {
            panic!("price info first");
        };
        assert_eq!(price.symbol, "NVDA");
        assert_eq!(price.summary, "Price data unavailable: API key not valid");

        let StreamRecord::OverallJudgement(judgement) = &records[3] else {
            panic!("judgement last");
        };
        assert_eq!(judgement.decision, Decision::Undetermined);
    }

    #[test]
    fn output_is_deterministic() {
        let generator = FallbackRecordGenerator::new();
        assert_eq!(
            generator.generate(&symbol(), "timeout"),
            generator.generate(&symbol(), "timeout")
        );
    }

    #[test]
    fn skips_delivered_kinds() {
        let delivered = HashSet::from([RecordKind::PriceInfo, RecordKind::TechnicalAnalysis]);
        let records = FallbackRecordGenerator::new().generate_missing(
            &symbol(),
            "connection reset",
            &delivered,
        );

        let kinds: Vec<_> = records.iter().map(StreamRecord::kind).collect();
        assert_eq!(
            kinds,
            vec![RecordKind::FundamentalAnalysis, RecordKind::OverallJudgement]
        );
    }

    #[test]
    fn degraded_flag_survives_serialization() {
        let records = FallbackRecordGenerator::new().generate(&symbol(), "");
        let line = serde_json::to_string(&records[1]).unwrap();
        assert!(line.contains(r#""degraded":true"#), "{line}");
        assert!(line.contains("Technical analysis unavailable."), "{line}");
    }
}
