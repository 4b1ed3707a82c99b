//! Offline collaborators.
//!
//! These run the engine end to end without any third-party service:
//! businesses come from a JSON file, emails from templates, demo URLs from
//! a base URL, deliveries land in a JSONL outbox and notifications go to the
//! log. They are also what `prospector init` configures by default.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    BusinessDiscoveryProvider, Channel, ContentGenerationProvider, DeliveryReceipt,
    DemoRenderingProvider, EmailDeliveryProvider, HardTrigger, Issue, IssueCategory,
    IssueClassification, NotificationProvider, OutreachMessage, ResearchContext,
    DEMO_URL_PLACEHOLDER,
};
use crate::config::validation::is_plausible_email;
use crate::config::EngineConfig;
use crate::lead::{Business, Lead};
use crate::window::profile_for;

// =========================================================================
// Discovery
// =========================================================================

/// Serves businesses from a JSON array on disk.
///
/// The file is re-read on every search so operators can append to it while
/// the engine runs.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    path: PathBuf,
}

impl FileDiscovery {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> Result<Vec<Business>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }
}

/// Split "City, ST" into its parts.
fn split_location(location: &str) -> (String, String) {
    match location.rsplit_once(',') {
        Some((city, state)) => (city.trim().to_lowercase(), state.trim().to_lowercase()),
        None => (location.trim().to_lowercase(), String::new()),
    }
}

#[async_trait]
impl BusinessDiscoveryProvider for FileDiscovery {
    async fn search(&self, location: &str, industry: &str) -> Result<Vec<Business>> {
        if !self.path.exists() {
            debug!("No businesses file at {}", self.path.display());
            return Ok(Vec::new());
        }
        let (city, state) = split_location(location);
        let wanted = profile_for(industry).industry;

        let found = self
            .load()
            .await?
            .into_iter()
            .filter(|b| b.city.trim().to_lowercase() == city)
            .filter(|b| state.is_empty() || b.state.trim().to_lowercase() == state)
            .filter(|b| {
                b.industry.trim().eq_ignore_ascii_case(industry.trim())
                    || (wanted != "default" && profile_for(&b.industry).industry == wanted)
            })
            .map(|mut b| {
                if b.industry.trim().is_empty() {
                    b.industry = industry.to_string();
                }
                b
            })
            .collect();
        Ok(found)
    }

    async fn preflight(&self) -> Result<()> {
        if !self.path.exists() {
            bail!("businesses file {} not found", self.path.display());
        }
        self.load().await.map(|_| ())
    }
}

// =========================================================================
// Content
// =========================================================================

struct Rule {
    pattern: Regex,
    category: IssueCategory,
    severity: u8,
    trigger: Option<HardTrigger>,
}

/// Template-based composer and keyword classifier.
pub struct TemplateComposer {
    sender_name: String,
    rules: Vec<Rule>,
}

impl std::fmt::Debug for TemplateComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateComposer")
            .field("sender_name", &self.sender_name)
            .field("rules", &self.rules.len())
            .finish()
    }
}

const RULES: &[(&str, IssueCategory, u8, Option<HardTrigger>)] = &[
    (
        r"(?i)\b(lawyer|attorney|lawsuit|sue|legal action|cease and desist)\b",
        IssueCategory::Legal,
        9,
        Some(HardTrigger::LegalThreat),
    ),
    (
        r"(?i)\b(hacked|breach|phishing|malware|compromised)\b",
        IssueCategory::Security,
        9,
        Some(HardTrigger::SecurityIncident),
    ),
    (
        r"(?i)\b(gdpr|ccpa|hipaa|ftc|regulator|ada complian\w*)\b",
        IssueCategory::Legal,
        8,
        Some(HardTrigger::RegulatoryIssue),
    ),
    (
        r"(?i)\b(chargeback|disputed?|fraudulent charge)\b",
        IssueCategory::Billing,
        8,
        Some(HardTrigger::PaymentDispute),
    ),
    (
        r"(?i)\b(all (of )?(our|the) sites|every (customer|site)|multiple customers)\b",
        IssueCategory::Technical,
        9,
        Some(HardTrigger::MultiCustomerOutage),
    ),
    (
        r"(?i)\b(refund|invoice|charged|billing|payment)\b",
        IssueCategory::Billing,
        5,
        None,
    ),
    (
        r"(?i)\b(down|broken|error|not loading|outage|bug)\b",
        IssueCategory::Technical,
        5,
        None,
    ),
    (
        r"(?i)\b(photo|logo|text|wording|change|update)\b",
        IssueCategory::Content,
        3,
        None,
    ),
    (
        r"(?i)\b(cancel|unsubscribe|stop emailing)\b",
        IssueCategory::Cancellation,
        4,
        None,
    ),
];

impl TemplateComposer {
    pub fn new(sender_name: impl Into<String>) -> Self {
        let rules = RULES
            .iter()
            .filter_map(|(pattern, category, severity, trigger)| {
                Regex::new(pattern).ok().map(|pattern| Rule {
                    pattern,
                    category: *category,
                    severity: *severity,
                    trigger: *trigger,
                })
            })
            .collect();
        Self {
            sender_name: sender_name.into(),
            rules,
        }
    }

    fn reply_for(category: IssueCategory) -> Option<String> {
        let reply = match category {
            IssueCategory::Content => {
                "Thanks! We'll apply that change to your site within one business day."
            }
            IssueCategory::Cancellation => {
                "Understood. We've stopped all further emails and noted your request."
            }
            IssueCategory::Technical => {
                "Thanks for the report. We're looking into it and will follow up shortly."
            }
            IssueCategory::Billing => {
                "Thanks for reaching out about billing. We'll review your account and reply today."
            }
            IssueCategory::General => "Thanks for your message. We'll get back to you soon.",
            IssueCategory::Legal | IssueCategory::Security => return None,
        };
        Some(reply.to_string())
    }
}

#[async_trait]
impl ContentGenerationProvider for TemplateComposer {
    async fn research(&self, lead: &Lead) -> Result<ResearchContext> {
        let mut points = Vec::new();
        if let Some(rating) = lead.rating {
            points.push(format!(
                "{:.1} stars from {} reviews",
                rating, lead.review_count
            ));
        }
        if !lead.has_website {
            points.push("no website found".to_string());
        }
        Ok(ResearchContext {
            summary: Some(format!("{} ({}) in {}", lead.name, lead.industry, lead.location())),
            email: None,
            talking_points: points,
        })
    }

    async fn compose_outreach(&self, lead: &Lead, research: &ResearchContext) -> Result<OutreachMessage> {
        let to = research
            .email
            .as_deref()
            .or(lead.email.as_deref())
            .filter(|e| is_plausible_email(e))
            .map(String::from);
        let Some(to) = to else {
            bail!("no deliverable email address for '{}'", lead.name);
        };

        let subject = if lead.has_website {
            format!("A faster, modern site for {}", lead.name)
        } else {
            format!("We built {} a website", lead.name)
        };

        let mut body = format!("Hi {} team,\n\n", lead.name);
        if let Some(point) = research.talking_points.first() {
            body.push_str(&format!("We noticed {} - customers clearly like you.\n", point));
        }
        body.push_str(&format!(
            "We put together a free preview of what a new site could look like: {}\n\n\
             If you like it, it can be live this week.\n\n{}",
            DEMO_URL_PLACEHOLDER, self.sender_name
        ));

        Ok(OutreachMessage {
            subject,
            body,
            to: Some(to),
        })
    }

    async fn classify_issue(&self, issue: &Issue) -> Result<IssueClassification> {
        let text = format!("{}\n{}", issue.subject, issue.body);
        let matched: Vec<&Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.pattern.is_match(&text))
            .collect();

        let Some(top) = matched.iter().max_by_key(|rule| rule.severity) else {
            return Ok(IssueClassification {
                severity: 2,
                hard_triggers: Vec::new(),
                confidence: 0.3,
                category: IssueCategory::General,
                suggested_reply: Self::reply_for(IssueCategory::General),
            });
        };

        let mut hard_triggers: Vec<HardTrigger> = Vec::new();
        for trigger in matched.iter().filter_map(|rule| rule.trigger) {
            if !hard_triggers.contains(&trigger) {
                hard_triggers.push(trigger);
            }
        }

        Ok(IssueClassification {
            severity: top.severity,
            hard_triggers,
            confidence: if matched.len() > 1 { 0.8 } else { 0.6 },
            category: top.category,
            suggested_reply: Self::reply_for(top.category),
        })
    }
}

// =========================================================================
// Rendering
// =========================================================================

/// Builds demo URLs under a base URL without rendering anything.
#[derive(Debug, Clone)]
pub struct UrlTemplateRenderer {
    base_url: String,
}

impl UrlTemplateRenderer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Lowercase, hyphen-separated slug.
fn slug(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl DemoRenderingProvider for UrlTemplateRenderer {
    async fn render(&self, lead: &Lead) -> Result<String> {
        let short = lead.dedup_key.get(..8).unwrap_or(&lead.dedup_key);
        Ok(format!("{}/{}-{}", self.base_url, slug(&lead.name), short))
    }

    async fn preflight(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            bail!("demo base URL '{}' is not http(s)", self.base_url);
        }
        Ok(())
    }
}

// =========================================================================
// Delivery
// =========================================================================

#[derive(Serialize)]
struct OutboxEntry<'a> {
    message_id: &'a str,
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
    accepted_at: chrono::DateTime<Utc>,
}

/// Appends every message to a JSONL outbox instead of sending it.
#[derive(Debug, Clone)]
pub struct OutboxDelivery {
    path: PathBuf,
    from: String,
}

impl OutboxDelivery {
    pub fn new(path: impl AsRef<Path>, from: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            from: from.into(),
        }
    }
}

#[async_trait]
impl EmailDeliveryProvider for OutboxDelivery {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<DeliveryReceipt> {
        if !is_plausible_email(to) {
            bail!("rejected recipient '{}'", to);
        }
        let receipt = DeliveryReceipt {
            message_id: uuid::Uuid::new_v4().to_string(),
            accepted_at: Utc::now(),
        };
        let entry = OutboxEntry {
            message_id: &receipt.message_id,
            from: &self.from,
            to,
            subject,
            body,
            accepted_at: receipt.accepted_at,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open outbox {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!("Queued message {} to {}", receipt.message_id, to);
        Ok(receipt)
    }

    async fn preflight(&self) -> Result<()> {
        if !is_plausible_email(&self.from) {
            bail!("sender address '{}' is not an email address", self.from);
        }
        Ok(())
    }
}

// =========================================================================
// Notification
// =========================================================================

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationProvider for LogNotifier {
    async fn notify(&self, channel: Channel, message: &str) -> Result<()> {
        match channel {
            Channel::Escalation | Channel::Health => warn!(channel = %channel, "{}", message),
            Channel::Operator => info!(channel = %channel, "{}", message),
        }
        Ok(())
    }
}

// =========================================================================
// Wiring
// =========================================================================

impl super::Providers {
    /// The offline collaborator set for a project.
    pub fn offline(config: &EngineConfig, project_dir: &Path) -> Self {
        let sender = config.outreach.sender_address.clone().unwrap_or_default();
        let sender_name = sender
            .split('@')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("Prospector")
            .to_string();
        Self {
            discovery: Arc::new(FileDiscovery::new(config.businesses_path(project_dir))),
            content: Arc::new(TemplateComposer::new(sender_name)),
            render: Arc::new(UrlTemplateRenderer::new(config.providers.demo_base_url.clone())),
            delivery: Arc::new(OutboxDelivery::new(
                EngineConfig::outbox_path(project_dir),
                sender,
            )),
            notifier: Arc::new(LogNotifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use tempfile::TempDir;

    fn write_businesses(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("businesses.json");
        std::fs::write(
            &path,
            r#"[
                {"name": "Smile Dental", "industry": "Dentist", "city": "Austin", "state": "TX"},
                {"name": "Bright Orthodontics", "industry": "orthodontist", "city": "austin", "state": "tx"},
                {"name": "Pipe Pros", "industry": "plumber", "city": "Austin", "state": "TX"},
                {"name": "Dallas Dental", "industry": "dentist", "city": "Dallas", "state": "TX"}
            ]"#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_file_discovery_filters_location_and_industry() {
        let temp = TempDir::new().unwrap();
        let discovery = FileDiscovery::new(write_businesses(&temp));

        let found = discovery.search("Austin, TX", "dentist").await.unwrap();
        let names: Vec<_> = found.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Smile Dental", "Bright Orthodontics"]);
    }

    #[tokio::test]
    async fn test_file_discovery_missing_file() {
        let temp = TempDir::new().unwrap();
        let discovery = FileDiscovery::new(temp.path().join("none.json"));
        assert!(discovery.search("Austin, TX", "dentist").await.unwrap().is_empty());
        assert!(discovery.preflight().await.is_err());
    }

    #[tokio::test]
    async fn test_composer_requires_address() {
        let composer = TemplateComposer::new("The Site Team");
        let mut lead = fixtures::lead("Smile Dental", "dentist");
        lead.email = None;
        assert!(composer
            .compose_outreach(&lead, &ResearchContext::default())
            .await
            .is_err());

        lead.email = Some("office@smile.example.com".into());
        let msg = composer
            .compose_outreach(&lead, &ResearchContext::default())
            .await
            .unwrap();
        assert_eq!(msg.to.as_deref(), Some("office@smile.example.com"));
        assert!(msg.body.contains(DEMO_URL_PLACEHOLDER));
    }

    #[tokio::test]
    async fn test_classifier_hard_triggers() {
        let composer = TemplateComposer::new("ops");
        let issue = Issue::new(
            "Site down",
            "Our site was hacked and I will talk to my attorney",
            Utc::now(),
        );
        let class = composer.classify_issue(&issue).await.unwrap();
        assert_eq!(class.severity, 9);
        assert!(class.hard_triggers.contains(&HardTrigger::SecurityIncident));
        assert!(class.hard_triggers.contains(&HardTrigger::LegalThreat));
        assert!(class.suggested_reply.is_none());
    }

    #[tokio::test]
    async fn test_classifier_routine_request() {
        let composer = TemplateComposer::new("ops");
        let issue = Issue::new("Logo", "Can you update the photo on the homepage?", Utc::now());
        let class = composer.classify_issue(&issue).await.unwrap();
        assert_eq!(class.category, IssueCategory::Content);
        assert!(class.hard_triggers.is_empty());
        assert!(class.severity < 7);
        assert!(class.suggested_reply.is_some());
    }

    #[tokio::test]
    async fn test_renderer_url() {
        let renderer = UrlTemplateRenderer::new("https://demo.example.com/");
        let lead = fixtures::lead("Smile Dental & Co.", "dentist");
        let url = renderer.render(&lead).await.unwrap();
        assert!(url.starts_with("https://demo.example.com/smile-dental-co-"));
        assert!(renderer.preflight().await.is_ok());
        assert!(UrlTemplateRenderer::new("ftp://x").preflight().await.is_err());
    }

    #[tokio::test]
    async fn test_outbox_appends_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("outbox.jsonl");
        let outbox = OutboxDelivery::new(&path, "hello@example.com");

        outbox.send("a@example.com", "one", "body").await.unwrap();
        outbox.send("b@example.com", "two", "body").await.unwrap();
        assert!(outbox.send("nobody", "three", "body").await.is_err());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["to"], "a@example.com");
        assert_eq!(first["from"], "hello@example.com");
    }
}
