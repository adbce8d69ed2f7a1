use serde::{Deserialize, Serialize};

use crate::{Symbol, ValidationError};

/// What the caller wants analysed.
///
/// A request always names a symbol; `question` turns it into a free-form
/// question about that symbol, which the backend answers with a
/// `freeformAnswer` record in addition to the structured analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: Symbol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// BCP-47 language tag for the narrative parts of the answer.
    #[serde(default = "default_locale")]
    pub locale: String,
}

fn default_locale() -> String {
    String::from("en")
}

impl AnalysisRequest {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            question: None,
            locale: default_locale(),
        }
    }

    pub fn parse(symbol: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(Symbol::parse(symbol)?))
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Result<Self, ValidationError> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(ValidationError::EmptyQuestion);
        }
        self.question = Some(question.trim().to_owned());
        Ok(self)
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }
}
