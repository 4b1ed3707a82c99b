//! Testing infrastructure.
//!
//! Mock collaborators for every provider trait, plus fixtures with
//! reproducible businesses, leads and clock values.
//!
//! # Example
//!
//! ```rust,ignore
//! use prospector::testing::{MockDelivery, MockDiscovery};
//!
//! let discovery = MockDiscovery::new()
//!     .with_results("Austin, TX", "dentist", businesses);
//! let delivery = MockDelivery::new().failing_for("office@brightteeth.example.com");
//! ```

pub mod fixtures;
pub mod mocks;

pub use mocks::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{
        BusinessDiscoveryProvider, Channel, ContentGenerationProvider, EmailDeliveryProvider,
        Issue, NotificationProvider, ResearchContext,
    };
    use chrono::Utc;

    #[tokio::test]
    async fn test_mock_discovery_returns_scripted_results() {
        let discovery =
            MockDiscovery::new().with_results("Austin, TX", "dentist", fixtures::austin_dentists());

        assert_eq!(discovery.search("austin, tx", "Dentist").await.unwrap().len(), 3);
        assert!(discovery.search("Dallas, TX", "dentist").await.unwrap().is_empty());
        assert_eq!(discovery.call_count(), 2);
        assert_eq!(discovery.searches()[1].0, "Dallas, TX");
    }

    #[tokio::test]
    async fn test_mock_discovery_error() {
        let discovery = MockDiscovery::new().with_error("quota exceeded");
        let err = discovery.search("Austin, TX", "dentist").await.unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[tokio::test]
    async fn test_mock_content_scripted_failure() {
        let content = MockContent::new().failing_for("Bright Teeth");
        let ok = fixtures::lead("Smile Dental", "dentist");
        let bad = fixtures::lead("Bright Teeth", "dentist");
        let research = ResearchContext::default();

        assert!(content.compose_outreach(&ok, &research).await.is_ok());
        assert!(content.compose_outreach(&bad, &research).await.is_err());
        assert_eq!(content.compose_calls(), 2);

        let issue = Issue::new("hi", "hello", Utc::now());
        assert_eq!(content.classify_issue(&issue).await.unwrap().severity, 2);
    }

    #[tokio::test]
    async fn test_mock_delivery_records_sends() {
        let delivery = MockDelivery::new().failing_for("bad@example.com");
        delivery.send("ok@example.com", "s", "b").await.unwrap();
        assert!(delivery.send("bad@example.com", "s", "b").await.is_err());

        assert_eq!(delivery.call_count(), 2);
        assert_eq!(delivery.sent().len(), 1);
        assert_eq!(delivery.sent()[0].to, "ok@example.com");
    }

    #[tokio::test]
    async fn test_mock_notifier_counts_per_channel() {
        let notifier = MockNotifier::new();
        notifier.notify(Channel::Health, "no leads").await.unwrap();
        notifier.notify(Channel::Escalation, "legal").await.unwrap();
        notifier.notify(Channel::Health, "backlog").await.unwrap();

        assert_eq!(notifier.count_for(Channel::Health), 2);
        assert_eq!(notifier.messages().len(), 3);
    }
}
