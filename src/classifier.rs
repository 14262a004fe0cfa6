//! Assigns an insight type to a feedback item.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use feedback_insights_core::models::{InsightType, TaxonomyNode};

use crate::completion::RetryingCompletion;
use crate::error::CompletionError;

/// Build the classification prompt for `text` in the context of `node`.
pub fn classification_prompt(text: &str, node: &TaxonomyNode) -> String {
    format!(
        r#"Classify this feedback into one of these types:
- complaint: User reporting a problem or expressing frustration
- improvement: User suggesting enhancement to existing feature
- feature-request: User asking for new functionality
- other: Feedback doesn't fit above categories

Context:
Feedback: "{text}"
Related Article:
- LOB: {lob}
- Category: {category}
- Topic: {folder}
- Title: {title}

Respond with exactly one category name only."#,
        lob = node.lob,
        category = node.category,
        folder = node.folder,
        title = node.title,
    )
}

/// Wraps the completion model with closed-set output validation.
///
/// Model failures are returned to the caller. Any response outside the
/// label set is coerced to [`InsightType::Other`].
#[derive(Clone)]
pub struct Classifier {
    completion: RetryingCompletion,
}

impl Classifier {
    pub fn new(completion: RetryingCompletion) -> Self {
        Self { completion }
    }

    pub async fn classify(
        &self,
        cancel: &CancellationToken,
        text: &str,
        node: &TaxonomyNode,
    ) -> Result<InsightType, CompletionError> {
        let prompt = classification_prompt(text, node);
        let raw = self.completion.complete(cancel, &prompt).await?;
        let label = InsightType::from_model_output(&raw);
        if label == InsightType::Other && raw.trim().to_lowercase() != "other" {
            debug!(response = %raw.trim(), "unrecognized classification label, using other");
        }
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionClient, RetryPolicy};
    use crate::rate_limit::RateLimiter;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};

    struct Echo {
        reply: String,
        last_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl CompletionClient for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn classifier(reply: &str) -> (Classifier, Arc<Echo>) {
        let echo = Arc::new(Echo {
            reply: reply.to_string(),
            last_prompt: Mutex::new(None),
        });
        let completion = RetryingCompletion::new(
            Arc::clone(&echo) as Arc<dyn CompletionClient>,
            RetryPolicy::default(),
            RateLimiter::new(1),
        );
        (Classifier::new(completion), echo)
    }

    fn node() -> TaxonomyNode {
        TaxonomyNode::new("Payments", "Bills", "Electricity", "Payment Failures", vec![])
    }

    #[tokio::test]
    async fn test_prompt_carries_context() {
        let (c, echo) = classifier("complaint");
        let label = c
            .classify(&CancellationToken::new(), "App crashes when I pay", &node())
            .await
            .unwrap();
        assert_eq!(label, InsightType::Complaint);

        let prompt = echo.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Feedback: \"App crashes when I pay\""));
        assert!(prompt.contains("- LOB: Payments"));
        assert!(prompt.contains("- Topic: Electricity"));
        assert!(prompt.contains("- Title: Payment Failures"));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_other() {
        let (c, _) = classifier("I think this is a complaint.");
        let label = c.classify(&CancellationToken::new(), "x", &node()).await.unwrap();
        assert_eq!(label, InsightType::Other);
    }

    proptest! {
        #[test]
        fn prop_classify_closed_set(reply in ".*") {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let (c, _) = classifier(&reply);
            let label = rt
                .block_on(c.classify(&CancellationToken::new(), "x", &node()))
                .unwrap();
            prop_assert!(["complaint", "improvement", "feature-request", "other"].contains(&label.as_str()));
        }
    }
}
