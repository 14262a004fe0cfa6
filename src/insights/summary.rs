//! Narrative summaries for insight groups.
//!
//! Feature-request groups get a deduplicated list of requested features;
//! improvement and complaint groups get a short plain-text narrative.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use feedback_insights_core::models::InsightType;

use crate::completion::RetryingCompletion;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InsightSummary {
    pub requested_features: Vec<String>,
    pub improvement_summary: String,
    pub complaint_summary: String,
}

impl InsightSummary {
    pub fn is_empty(&self) -> bool {
        self.requested_features.is_empty()
            && self.improvement_summary.is_empty()
            && self.complaint_summary.is_empty()
    }

    /// The narrative for this insight type, if it is a narrative type.
    pub fn narrative(&self, insight_type: InsightType) -> &str {
        match insight_type {
            InsightType::Improvement => &self.improvement_summary,
            InsightType::Complaint => &self.complaint_summary,
            _ => "",
        }
    }
}

/// A summary plus the error that cut it short, if any.
#[derive(Debug, Clone, Default)]
pub struct SummaryOutcome {
    pub summary: InsightSummary,
    pub error: Option<String>,
}

pub fn summary_prompt(insight_type: InsightType, feedbacks: &[String]) -> Option<String> {
    let feedback_text = feedbacks.join("\n");
    let prompt = match insight_type {
        InsightType::FeatureRequest => format!(
            "Analyze these user feedback items and extract feature requests:\n\n{feedback_text}\n\n\
             RESPONSE FORMAT:\n\
             - List only the specific features requested\n\
             - Start each line with a hyphen\n\
             - No headers, no explanations\n\
             - Maximum 5 features\n\
             - Be concise and specific"
        ),
        InsightType::Improvement => format!(
            "Analyze these improvement suggestions:\n\n{feedback_text}\n\n\
             RESPONSE FORMAT:\n\
             Write 2-3 plain sentences that:\n\
             1. State what users want improved\n\
             2. Explain the impact on user experience\n\
             3. No formatting, no bullet points, no headers"
        ),
        InsightType::Complaint => format!(
            "Analyze these user complaints:\n\n{feedback_text}\n\n\
             RESPONSE FORMAT:\n\
             Write 3-4 plain sentences that:\n\
             1. State the main problems\n\
             2. Include specific numbers or percentages\n\
             3. Mention business impact\n\
             4. No formatting, no bullet points, no headers"
        ),
        InsightType::Other => return None,
    };
    Some(prompt)
}

fn strip_markdown(line: &str) -> String {
    line.replace("---", "")
        .replace("**", "")
        .chars()
        .filter(|c| !matches!(c, '#' | '*' | '`' | '|'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Flatten a narrative response to one line of plain text.
///
/// Header lines are dropped, markdown markers removed, and the remaining
/// non-empty lines joined with single spaces.
pub fn clean_llm_response(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .map(strip_markdown)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a feature-list response into distinct feature strings, in order.
pub fn clean_feature_list(raw: &str) -> Vec<String> {
    let mut features: Vec<String> = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let unbulleted = ["- ", "• ", "* "]
            .iter()
            .fold(line, |l, prefix| l.strip_prefix(prefix).unwrap_or(l));
        let feature = strip_markdown(unbulleted);
        if !feature.is_empty() && !features.contains(&feature) {
            features.push(feature);
        }
    }
    features
}

#[derive(Clone)]
pub struct InsightSummarizer {
    completion: RetryingCompletion,
}

impl InsightSummarizer {
    pub fn new(completion: RetryingCompletion) -> Self {
        Self { completion }
    }

    /// Summarize `feedbacks` for `insight_type`. Never fails; a completion
    /// error leaves the summary empty and is returned alongside it.
    pub async fn summarize(
        &self,
        cancel: &CancellationToken,
        insight_type: InsightType,
        feedbacks: &[String],
    ) -> SummaryOutcome {
        let mut outcome = SummaryOutcome::default();
        if feedbacks.is_empty() {
            return outcome;
        }
        let Some(prompt) = summary_prompt(insight_type, feedbacks) else {
            return outcome;
        };

        match self.completion.complete(cancel, &prompt).await {
            Ok(raw) => match insight_type {
                InsightType::FeatureRequest => {
                    outcome.summary.requested_features = clean_feature_list(&raw)
                }
                InsightType::Improvement => {
                    outcome.summary.improvement_summary = clean_llm_response(&raw)
                }
                InsightType::Complaint => {
                    outcome.summary.complaint_summary = clean_llm_response(&raw)
                }
                InsightType::Other => {}
            },
            Err(e) => outcome.error = Some(e.to_string()),
        }
        outcome
    }
}
