//! Typed analysis records and the source-citation ledger.
//!
//! On the wire each record is one JSON object
//! `{"type": <kind>, "data": <payload>}`; in memory it is a closed enum so every
//! consumer handles every kind.

use std::collections::HashSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// One fully decoded unit of analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StreamRecord {
    PriceInfo(PriceInfo),
    TechnicalAnalysis(ScoredSummary),
    FundamentalAnalysis(ScoredSummary),
    OverallJudgement(OverallJudgement),
    FreeformAnswer(String),
    #[serde(alias = "sourceList")]
    Sources(Vec<SourceCitation>),
}

impl StreamRecord {
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::PriceInfo(_) => RecordKind::PriceInfo,
            Self::TechnicalAnalysis(_) => RecordKind::TechnicalAnalysis,
            Self::FundamentalAnalysis(_) => RecordKind::FundamentalAnalysis,
            Self::OverallJudgement(_) => RecordKind::OverallJudgement,
            Self::FreeformAnswer(_) => RecordKind::FreeformAnswer,
            Self::Sources(_) => RecordKind::Sources,
        }
    }

    /// Whether this record is a placeholder produced in place of live output.
    pub fn is_degraded(&self) -> bool {
        match self {
            Self::PriceInfo(price) => price.degraded,
            Self::TechnicalAnalysis(summary) | Self::FundamentalAnalysis(summary) => {
                summary.degraded
            }
            Self::OverallJudgement(judgement) => judgement.degraded,
            Self::FreeformAnswer(_) | Self::Sources(_) => false,
        }
    }
}

/// Discriminant of [`StreamRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    PriceInfo,
    TechnicalAnalysis,
    FundamentalAnalysis,
    OverallJudgement,
    FreeformAnswer,
    Sources,
}

impl RecordKind {
    /// Top-level kinds a structurally complete analysis always contains.
    pub const EXPECTED: [Self; 4] = [
        Self::PriceInfo,
        Self::TechnicalAnalysis,
        Self::FundamentalAnalysis,
        Self::OverallJudgement,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceInfo => "priceInfo",
            Self::TechnicalAnalysis => "technicalAnalysis",
            Self::FundamentalAnalysis => "fundamentalAnalysis",
            Self::OverallJudgement => "overallJudgement",
            Self::FreeformAnswer => "freeformAnswer",
            Self::Sources => "sources",
        }
    }

    /// Parse a wire tag; `None` for kinds this client does not know.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "priceInfo" => Some(Self::PriceInfo),
            "technicalAnalysis" => Some(Self::TechnicalAnalysis),
            "fundamentalAnalysis" => Some(Self::FundamentalAnalysis),
            "overallJudgement" => Some(Self::OverallJudgement),
            "freeformAnswer" => Some(Self::FreeformAnswer),
            "sources" | "sourceList" => Some(Self::Sources),
            _ => None,
        }
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price snapshot for the analysed instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceInfo {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

/// Technical or fundamental summary: a 0-10 score plus narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredSummary {
    pub score: f64,
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallJudgement {
    pub decision: Decision,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

/// Closed set of overall decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    /// No judgement could be produced.
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub uri: String,
    #[serde(default)]
    pub title: String,
}

impl SourceCitation {
    pub fn new(uri: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            title: title.into(),
        }
    }
}

/// Accumulates citations across a run, keyed by `uri`.
///
/// The first title seen for a uri wins and first-seen order is kept.
#[derive(Debug, Default, Clone)]
pub struct SourceLedger {
    seen: HashSet<String>,
    citations: Vec<SourceCitation>,
}

impl SourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge citations, returning how many were new.
    pub fn merge(&mut self, citations: impl IntoIterator<Item = SourceCitation>) -> usize {
        let before = self.citations.len();
        for citation in citations {
            if self.seen.insert(citation.uri.clone()) {
                self.citations.push(citation);
            }
        }
        self.citations.len() - before
    }

    pub fn len(&self) -> usize {
        self.citations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citations.is_empty()
    }

    /// Single `sources` record for everything merged, if anything was.
    pub fn into_record(self) -> Option<StreamRecord> {
        (!self.citations.is_empty()).then_some(StreamRecord::Sources(self.citations))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}
