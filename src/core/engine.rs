use crate::core::catalog::{RuleCatalog, RuleSelection};
use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::domain::model::{JobSummary, Outcome, RuleResult};
use crate::domain::ports::ResultProvider;
use crate::rules::{Rule, Verdict};
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// 依序執行適用規則，並把結果逐筆交給 result provider
#[derive(Debug, Clone)]
pub struct RuleEngine {
    catalog: Arc<RuleCatalog>,
    selection: RuleSelection,
    rule_timeout: Duration,
}

impl RuleEngine {
    pub fn new(catalog: Arc<RuleCatalog>, selection: RuleSelection, rule_timeout: Duration) -> Self {
        Self {
            catalog,
            selection,
            rule_timeout,
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn selection(&self) -> &RuleSelection {
        &self.selection
    }

    /// Same catalog and timeout, different selection.
    pub fn with_selection(&self, selection: RuleSelection) -> Self {
        Self {
            catalog: Arc::clone(&self.catalog),
            selection,
            rule_timeout: self.rule_timeout,
        }
    }

    pub async fn validate(
        &self,
        job_id: Uuid,
        ctx: &ServiceContext,
        http: &HttpClient,
        results: &dyn ResultProvider,
    ) -> Result<JobSummary> {
        let rules = self.catalog.applicable(ctx, &self.selection);
        tracing::info!(
            job_id = %job_id,
            rules = rules.len(),
            payload_type = ?ctx.payload_type,
            "🔍 Running {} applicable rules",
            rules.len()
        );

        let mut summary = JobSummary::default();
        for rule in &rules {
            let result = self.run_rule(rule.as_ref(), ctx, http).await;
            summary.record(result.outcome);
            results.record(job_id, result).await?;
        }

        tracing::info!(
            job_id = %job_id,
            success = summary.success,
            error = summary.error,
            warning = summary.warning,
            aborted = summary.aborted,
            "✅ Validation finished"
        );
        Ok(summary)
    }

    /// Runs the applicable rules without persisting anything.
    pub async fn evaluate(&self, ctx: &ServiceContext, http: &HttpClient) -> Vec<RuleResult> {
        let mut results = Vec::new();
        for rule in self.catalog.applicable(ctx, &self.selection) {
            results.push(self.run_rule(rule.as_ref(), ctx, http).await);
        }
        results
    }

    pub async fn run_rule(&self, rule: &dyn Rule, ctx: &ServiceContext, http: &HttpClient) -> RuleResult {
        let info = rule.info();
        let started = Instant::now();

        let (outcome, details) = match tokio::time::timeout(self.rule_timeout, rule.verify(ctx, http)).await {
            Ok(Ok(verdict)) => classify(rule, verdict),
            Ok(Err(e)) => {
                tracing::warn!(rule = info.name, "⚠️ Rule aborted: {}", e);
                (Outcome::Aborted, vec![e.to_string()])
            }
            Err(_) => {
                tracing::warn!(rule = info.name, "⚠️ Rule timed out");
                (
                    Outcome::Aborted,
                    vec![format!("rule timed out after {}s", self.rule_timeout.as_secs_f64())],
                )
            }
        };

        tracing::debug!(rule = info.name, outcome = outcome.as_str(), "rule evaluated");

        RuleResult {
            rule_name: info.name.to_string(),
            spec_section: info.spec_section.to_string(),
            requirement_level: info.requirement_level,
            category: info.category,
            outcome,
            description: info.description.to_string(),
            details,
            target_uri: ctx.destination.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn classify(rule: &dyn Rule, verdict: Verdict) -> (Outcome, Vec<String>) {
    let outcome = match verdict.passed {
        Some(true) => Outcome::Success,
        Some(false) => Outcome::for_failure(rule.info().requirement_level),
        None => Outcome::NotApplicable,
    };
    (outcome, verdict.details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
    use crate::results::memory::InMemoryResultProvider;
    use crate::rules::test_support::{json_context, offline_client};
    use crate::rules::RuleInfo;
    use async_trait::async_trait;
    use serde_json::json;

    const FEED: &[PayloadType] = &[PayloadType::Feed];
    const ANY_VERSION: &[ODataVersion] = &[];
    const JSON: &[PayloadFormat] = &[PayloadFormat::Json];

    struct Slow;

    #[async_trait]
    impl Rule for Slow {
        fn info(&self) -> &'static RuleInfo {
            static INFO: RuleInfo = RuleInfo {
                name: "Test.Slow.0001",
                description: "Never finishes in time.",
                spec_section: "n/a",
                category: RuleCategory::Core,
                requirement_level: RequirementLevel::Must,
                versions: ANY_VERSION,
                payload_types: FEED,
                formats: JSON,
                requires_metadata: false,
                mutating: false,
            };
            &INFO
        }

        async fn verify(&self, _ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Verdict::pass())
        }
    }

    struct ShouldFail;

    #[async_trait]
    impl Rule for ShouldFail {
        fn info(&self) -> &'static RuleInfo {
            static INFO: RuleInfo = RuleInfo {
                name: "Test.Should.0002",
                description: "Always fails a SHOULD clause.",
                spec_section: "n/a",
                category: RuleCategory::Core,
                requirement_level: RequirementLevel::Should,
                versions: ANY_VERSION,
                payload_types: FEED,
                formats: JSON,
                requires_metadata: false,
                mutating: false,
            };
            &INFO
        }

        async fn verify(&self, _ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
            Ok(Verdict::fail("nope"))
        }
    }

    fn engine(rules: Vec<Arc<dyn Rule>>) -> RuleEngine {
        let mut catalog = RuleCatalog::new();
        for rule in rules {
            catalog.register(rule).unwrap();
        }
        RuleEngine::new(Arc::new(catalog), RuleSelection::default(), Duration::from_millis(50))
    }

    fn feed() -> ServiceContext {
        json_context(
            "http://host/svc/Products",
            json!({"@odata.context": "http://host/svc/$metadata#Products", "value": [{"ID": 1}]}),
        )
    }

    #[tokio::test]
    async fn test_timeout_aborts_rule_and_failures_follow_requirement_level() {
        let engine = engine(vec![Arc::new(Slow), Arc::new(ShouldFail)]);
        let results = engine.evaluate(&feed(), &offline_client()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::Aborted);
        assert!(results[0].details[0].contains("timed out"));
        assert_eq!(results[1].outcome, Outcome::Warning);
        assert_eq!(results[1].details, vec!["nope".to_string()]);
        assert_eq!(results[1].target_uri, "http://host/svc/Products");
    }

    #[tokio::test]
    async fn test_validate_streams_results_into_provider() {
        let catalog = Arc::new(RuleCatalog::builtin().unwrap());
        let engine = RuleEngine::new(catalog, RuleSelection::default(), Duration::from_secs(5));
        let provider = InMemoryResultProvider::new();
        let job_id = Uuid::new_v4();

        let summary = engine
            .validate(job_id, &feed(), &offline_client(), &provider)
            .await
            .unwrap();

        let stored = provider.results(job_id).await.unwrap();
        assert_eq!(stored.len(), summary.total);
        assert!(summary.total > 0);
        assert_eq!(summary, JobSummary::from_results(&stored));
        assert!(!summary.has_errors(), "{:?}", stored);
    }
}
