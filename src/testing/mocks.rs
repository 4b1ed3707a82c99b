//! Mock collaborators.
//!
//! Controllable test doubles for every provider trait. Each records its
//! calls so tests can assert on what the engine did, and each can be
//! scripted to fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::lead::{Business, Lead};
use crate::providers::{
    BusinessDiscoveryProvider, Channel, ContentGenerationProvider, DeliveryReceipt,
    DemoRenderingProvider, EmailDeliveryProvider, Issue, IssueCategory, IssueClassification,
    NotificationProvider, OutreachMessage, ResearchContext,
};

fn key(location: &str, industry: &str) -> (String, String) {
    (location.trim().to_lowercase(), industry.trim().to_lowercase())
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =========================================================================
// Discovery
// =========================================================================

/// Mock business discovery.
///
/// # Example
///
/// ```rust,ignore
/// let discovery = MockDiscovery::new()
///     .with_results("Austin, TX", "dentist", vec![business]);
///
/// assert_eq!(discovery.search("Austin, TX", "dentist").await?.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockDiscovery {
    results: HashMap<(String, String), Vec<Business>>,
    error: Option<String>,
    preflight_error: Option<String>,
    delay: Option<Duration>,
    searches: Mutex<Vec<(String, String)>>,
    call_count: AtomicU32,
}

impl MockDiscovery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned for one (location, industry) pair.
    #[must_use]
    pub fn with_results(mut self, location: &str, industry: &str, businesses: Vec<Business>) -> Self {
        self.results.insert(key(location, industry), businesses);
        self
    }

    /// Make every search fail.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    #[must_use]
    pub fn with_preflight_error(mut self, error: &str) -> Self {
        self.preflight_error = Some(error.to_string());
        self
    }

    /// Sleep inside each search.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every (location, industry) pair searched, in order.
    pub fn searches(&self) -> Vec<(String, String)> {
        locked(&self.searches).clone()
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BusinessDiscoveryProvider for MockDiscovery {
    async fn search(&self, location: &str, industry: &str) -> Result<Vec<Business>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.searches).push((location.to_string(), industry.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ref error) = self.error {
            bail!("{}", error)
        }
        Ok(self
            .results
            .get(&key(location, industry))
            .cloned()
            .unwrap_or_default())
    }

    async fn preflight(&self) -> Result<()> {
        match self.preflight_error {
            Some(ref error) => bail!("{}", error),
            None => Ok(()),
        }
    }
}

// =========================================================================
// Content
// =========================================================================

/// Mock composer and classifier.
#[derive(Debug)]
pub struct MockContent {
    fail_for: HashSet<String>,
    research_error: Option<String>,
    classification: IssueClassification,
    classify_error: Option<String>,
    research_calls: AtomicU32,
    compose_calls: AtomicU32,
    classify_calls: AtomicU32,
}

impl Default for MockContent {
    fn default() -> Self {
        Self {
            fail_for: HashSet::new(),
            research_error: None,
            classification: IssueClassification {
                severity: 2,
                hard_triggers: Vec::new(),
                confidence: 0.9,
                category: IssueCategory::General,
                suggested_reply: Some("Thanks, handled.".to_string()),
            },
            classify_error: None,
            research_calls: AtomicU32::new(0),
            compose_calls: AtomicU32::new(0),
            classify_calls: AtomicU32::new(0),
        }
    }
}

impl MockContent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail composition for the lead with this business name.
    #[must_use]
    pub fn failing_for(mut self, lead_name: &str) -> Self {
        self.fail_for.insert(lead_name.to_string());
        self
    }

    #[must_use]
    pub fn with_research_error(mut self, error: &str) -> Self {
        self.research_error = Some(error.to_string());
        self
    }

    /// Classification returned for every issue.
    #[must_use]
    pub fn with_classification(mut self, classification: IssueClassification) -> Self {
        self.classification = classification;
        self
    }

    #[must_use]
    pub fn with_classify_error(mut self, error: &str) -> Self {
        self.classify_error = Some(error.to_string());
        self
    }

    pub fn research_calls(&self) -> u32 {
        self.research_calls.load(Ordering::SeqCst)
    }

    pub fn compose_calls(&self) -> u32 {
        self.compose_calls.load(Ordering::SeqCst)
    }

    pub fn classify_calls(&self) -> u32 {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerationProvider for MockContent {
    async fn research(&self, _lead: &Lead) -> Result<ResearchContext> {
        self.research_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.research_error {
            bail!("{}", error)
        }
        Ok(ResearchContext::default())
    }

    async fn compose_outreach(&self, lead: &Lead, _research: &ResearchContext) -> Result<OutreachMessage> {
        self.compose_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.contains(&lead.name) {
            bail!("content generation failed for {}", lead.name)
        }
        Ok(OutreachMessage {
            subject: format!("Hello {}", lead.name),
            body: format!("Hi {}, see {{demo_url}}", lead.name),
            to: lead.email.clone(),
        })
    }

    async fn classify_issue(&self, _issue: &Issue) -> Result<IssueClassification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.classify_error {
            bail!("{}", error)
        }
        Ok(self.classification.clone())
    }
}

// =========================================================================
// Rendering
// =========================================================================

/// Mock demo renderer.
#[derive(Debug, Default)]
pub struct MockRenderer {
    fail_for: HashSet<String>,
    call_count: AtomicU32,
}

impl MockRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failing_for(mut self, lead_name: &str) -> Self {
        self.fail_for.insert(lead_name.to_string());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DemoRenderingProvider for MockRenderer {
    async fn render(&self, lead: &Lead) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_for.contains(&lead.name) {
            bail!("render failed for {}", lead.name)
        }
        Ok(format!("https://demo.test/{}", lead.id))
    }
}

// =========================================================================
// Delivery
// =========================================================================

/// One message accepted by [`MockDelivery`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mock email delivery.
///
/// # Example
///
/// ```rust,ignore
/// let delivery = MockDelivery::new().with_error("503 service unavailable");
/// assert!(delivery.send("a@b.com", "s", "b").await.is_err());
/// ```
#[derive(Debug, Default)]
pub struct MockDelivery {
    error: Option<String>,
    fail_for: HashSet<String>,
    preflight_error: Option<String>,
    delay: Option<Duration>,
    sent: Mutex<Vec<SentEmail>>,
    call_count: AtomicU32,
}

impl MockDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Fail sends to one recipient.
    #[must_use]
    pub fn failing_for(mut self, recipient: &str) -> Self {
        self.fail_for.insert(recipient.to_string());
        self
    }

    #[must_use]
    pub fn with_preflight_error(mut self, error: &str) -> Self {
        self.preflight_error = Some(error.to_string());
        self
    }

    /// Sleep before answering, to exercise timeouts.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        locked(&self.sent).clone()
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailDeliveryProvider for MockDelivery {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<DeliveryReceipt> {
        let n = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref error) = self.error {
            bail!("{}", error)
        }
        if self.fail_for.contains(to) {
            bail!("recipient {} rejected", to)
        }
        locked(&self.sent).push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(DeliveryReceipt {
            message_id: format!("mock-{}", n),
            accepted_at: Utc::now(),
        })
    }

    async fn preflight(&self) -> Result<()> {
        match self.preflight_error {
            Some(ref error) => bail!("{}", error),
            None => Ok(()),
        }
    }
}

// =========================================================================
// Notification
// =========================================================================

/// Mock notifier recording every delivered message.
#[derive(Debug, Default)]
pub struct MockNotifier {
    failures: AtomicU32,
    error: Option<String>,
    messages: Mutex<Vec<(Channel, String)>>,
    call_count: AtomicU32,
}

impl MockNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` notifications, then deliver normally.
    #[must_use]
    pub fn failing_first(mut self, n: u32, error: &str) -> Self {
        self.failures = AtomicU32::new(n);
        self.error = Some(error.to_string());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<(Channel, String)> {
        locked(&self.messages).clone()
    }

    pub fn count_for(&self, channel: Channel) -> usize {
        locked(&self.messages)
            .iter()
            .filter(|(c, _)| *c == channel)
            .count()
    }
}

#[async_trait]
impl NotificationProvider for MockNotifier {
    async fn notify(&self, channel: Channel, message: &str) -> Result<()> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            bail!("{}", self.error.as_deref().unwrap_or("notification failed"))
        }
        locked(&self.messages).push((channel, message.to_string()));
        Ok(())
    }
}
