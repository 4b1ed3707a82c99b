//! End-to-end pipeline tests against mock collaborators

use std::sync::Arc;

use chrono::Duration;
use prospector::providers::{HardTrigger, IssueCategory};
use prospector::testing::fixtures::{austin_dentists, business, saturday, wednesday};
use prospector::testing::{MockContent, MockDelivery, MockDiscovery, MockNotifier, MockRenderer};
use prospector::{
    Channel, Engine, EngineConfig, GrowthStrategy, Issue, IssueClassification, LeadStatus,
    PhaseController, Providers, TickOutcome,
};
use tempfile::TempDir;

struct Pipeline {
    engine: Arc<Engine>,
    delivery: Arc<MockDelivery>,
    notifier: Arc<MockNotifier>,
    _dir: TempDir,
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.outreach.sender_address = Some("hello@prospector.example.com".to_string());
    config.outreach.inter_send_delay_secs = 0;
    config.testing.skip_testing = true;
    config
}

fn pipeline(discovery: MockDiscovery, content: MockContent) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let config = config();
    PhaseController::load(EngineConfig::strategy_path(dir.path()), config.phases.regression)
        .replace(GrowthStrategy::standard())
        .unwrap();

    let delivery = Arc::new(MockDelivery::new());
    let notifier = Arc::new(MockNotifier::new());
    let providers = Providers {
        discovery: Arc::new(discovery),
        content: Arc::new(content),
        render: Arc::new(MockRenderer::new()),
        delivery: delivery.clone(),
        notifier: notifier.clone(),
    };
    let engine = Engine::open(dir.path(), config, providers).unwrap();
    Pipeline {
        engine,
        delivery,
        notifier,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_austin_dentists_pipeline() {
    let p = pipeline(
        MockDiscovery::new().with_results("Austin, TX", "dentist", austin_dentists()),
        MockContent::new(),
    );

    // Smile Dental was found and emailed the day before
    {
        let store = p.engine.store().lock_sync().unwrap();
        let existing = store
            .insert(&business("Smile Dental", "dentist"), wednesday(6) - Duration::days(1))
            .unwrap();
        store
            .mark_contacted(&existing.lead.dedup_key, wednesday(10) - Duration::days(1))
            .unwrap();
    }

    let discovered = p.engine.discover(wednesday(8)).await.unwrap();
    assert_eq!(discovered.found, 3);
    assert_eq!(discovered.new_leads, 2);
    assert_eq!(discovered.duplicates, 1);
    assert_eq!(p.engine.store().lock_sync().unwrap().counts().unwrap().total(), 3);

    let tick = p.engine.outreach_tick(wednesday(10)).await.unwrap();
    assert_eq!(tick.outcome, TickOutcome::Drained);
    assert_eq!(tick.sent, 2);
    assert_eq!(p.engine.stats().emails_sent(), 2);

    let mut recipients: Vec<_> = p.delivery.sent().into_iter().map(|e| e.to).collect();
    recipients.sort();
    assert_eq!(
        recipients,
        [
            "office@brightteeth.example.com",
            "office@congressfamilydentistry.example.com"
        ]
    );
    {
        let store = p.engine.store().lock_sync().unwrap();
        let contacted = store.list(Some(LeadStatus::Contacted), 10).unwrap();
        assert_eq!(contacted.len(), 3);
        assert!(store.get_uncontacted_batch(10).unwrap().is_empty());
    }

    let health = p.engine.health_check(wednesday(13)).await.unwrap().unwrap();
    assert!(health.is_healthy(), "unexpected alerts: {:?}", health.alerts);
    assert_eq!(p.notifier.count_for(Channel::Health), 0);

    let weekend = p.engine.outreach_tick(saturday(10)).await.unwrap();
    let again = p.engine.outreach_tick(saturday(11)).await.unwrap();
    assert!(matches!(weekend.outcome, TickOutcome::OutsideWindow { .. }));
    assert!(weekend.window_notice);
    assert!(!again.window_notice);
    assert!(weekend.failures.is_empty());
    assert_eq!(p.delivery.call_count(), 2);
}

#[tokio::test]
async fn test_second_tick_does_not_resend() {
    let p = pipeline(
        MockDiscovery::new().with_results("Austin, TX", "dentist", austin_dentists()),
        MockContent::new(),
    );
    p.engine.discover(wednesday(8)).await.unwrap();

    assert_eq!(p.engine.outreach_tick(wednesday(10)).await.unwrap().sent, 3);
    let second = p.engine.outreach_tick(wednesday(11)).await.unwrap();
    assert_eq!(second.outcome, TickOutcome::NoLeads);
    assert_eq!(p.delivery.call_count(), 3);
}

#[tokio::test]
async fn test_idle_pipeline_raises_backlog_alert_once() {
    let p = pipeline(
        MockDiscovery::new().with_results("Austin, TX", "dentist", austin_dentists()),
        MockContent::new(),
    );
    p.engine.discover(wednesday(8)).await.unwrap();

    // Nothing was sent; four hours later the backlog is stale
    let first = p.engine.health_check(wednesday(12)).await.unwrap().unwrap();
    assert!(!first.is_healthy());
    p.engine.health_check(wednesday(13)).await.unwrap();
    assert_eq!(p.notifier.count_for(Channel::Health), 1);
}

#[tokio::test]
async fn test_legal_threat_escalates_once_per_cooldown() {
    let classification = IssueClassification {
        severity: 4,
        hard_triggers: vec![HardTrigger::LegalThreat],
        confidence: 0.9,
        category: IssueCategory::Legal,
        suggested_reply: None,
    };
    let p = pipeline(MockDiscovery::new(), MockContent::new().with_classification(classification));

    let issue = Issue::new("Cease and desist", "Stop emailing us or we call our lawyer", wednesday(9));
    let first = p.engine.handle_issue(&issue, wednesday(9)).await.unwrap();
    let repeat = p.engine.handle_issue(&issue, wednesday(10)).await.unwrap();

    assert!(first.decision.is_escalation());
    assert!(first.notified);
    assert!(!repeat.notified);
    assert_eq!(p.notifier.count_for(Channel::Escalation), 1);
}

#[tokio::test]
async fn test_status_report_after_conversion() {
    let p = pipeline(
        MockDiscovery::new().with_results("Austin, TX", "dentist", austin_dentists()),
        MockContent::new(),
    );
    p.engine.discover(wednesday(8)).await.unwrap();
    p.engine.outreach_tick(wednesday(10)).await.unwrap();
    {
        let store = p.engine.store().lock_sync().unwrap();
        let lead = store.list(Some(LeadStatus::Contacted), 1).unwrap().remove(0);
        store.mark_converted(&lead.dedup_key, wednesday(12)).unwrap();
    }

    let report = p.engine.report(wednesday(12)).await.unwrap();
    assert_eq!(report.customers, 1);
    assert_eq!(report.emails.sent_today, 3);
    assert_eq!(report.emails.total_contacted, 3);
    assert!(report.to_string().contains("Local Launch"));
}
