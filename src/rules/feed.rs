use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::core::payload::annotation;
use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{is_well_formed_uri, Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(ValueIsArrayOfObjects),
        Arc::new(NextLinkIsUrl),
        Arc::new(CountIsNonNegativeInteger),
        Arc::new(AtomFeedRequiredElements),
    ]
}

const FEED: &[PayloadType] = &[PayloadType::Feed];

pub struct ValueIsArrayOfObjects;

#[async_trait]
impl Rule for ValueIsArrayOfObjects {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Feed.Core.2001",
            description: "A JSON collection of entities is an object whose value member is an array of entity objects.",
            spec_section: "OData JSON Format 12",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: FEED,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(value) = ctx.json.as_ref().and_then(|j| j.get("value")) else {
            return Ok(Verdict::fail("collection has no value member"));
        };
        let Some(items) = value.as_array() else {
            return Ok(Verdict::fail("value member is not an array"));
        };

        let failures = items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.is_object())
            .map(|(idx, item)| format!("value[{}] is not an object: {}", idx, item))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct NextLinkIsUrl;

#[async_trait]
impl Rule for NextLinkIsUrl {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Feed.Core.2002",
            description: "The next link annotation of a partial collection is a URL.",
            spec_section: "OData JSON Format 4.5.5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: FEED,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let key = annotation(ctx.version, "nextLink");
        let Some(next) = ctx.json.as_ref().and_then(|j| j.get(&key)) else {
            return Ok(Verdict::not_applicable(format!("no {} annotation", key)));
        };

        match next.as_str() {
            Some(link) if is_well_formed_uri(link, &ctx.destination) => Ok(Verdict::pass()),
            Some(link) => Ok(Verdict::fail(format!("{} '{}' is not a valid URL", key, link))),
            None => Ok(Verdict::fail(format!("{} is not a string", key))),
        }
    }
}

pub struct CountIsNonNegativeInteger;

#[async_trait]
impl Rule for CountIsNonNegativeInteger {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Feed.Core.2003",
            description: "The count annotation of a collection is a non-negative integer.",
            spec_section: "OData JSON Format 4.5.6",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: FEED,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let key = annotation(ctx.version, "count");
        let Some(count) = ctx.json.as_ref().and_then(|j| j.get(&key)) else {
            return Ok(Verdict::not_applicable(format!("no {} annotation", key)));
        };

        let valid = match count {
            Value::Number(n) => n.as_u64().is_some(),
            // V3 JSON light 以字串表示 count
            Value::String(s) if ctx.version == ODataVersion::V3 => s.parse::<u64>().is_ok(),
            _ => false,
        };

        if valid {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("{} value {} is not a non-negative integer", key, count)))
        }
    }
}

pub struct AtomFeedRequiredElements;

#[async_trait]
impl Rule for AtomFeedRequiredElements {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Feed.Core.2004",
            description: "An Atom feed contains atom:id, atom:title and atom:updated elements.",
            spec_section: "OData Atom Format 7.1",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: FEED,
            formats: &[PayloadFormat::Atom, PayloadFormat::Xml],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(feed) = &ctx.xml else {
            return Ok(Verdict::not_applicable("payload is not XML"));
        };

        let failures = ["id", "title", "updated"]
            .into_iter()
            .filter(|name| feed.child(name).is_none())
            .map(|name| format!("feed has no atom:{} element", name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{context, json_context, offline_client};
    use serde_json::json;

    #[tokio::test]
    async fn test_well_formed_json_feed() {
        let http = offline_client();
        let ctx = json_context(
            "http://host/svc/Products",
            json!({
                "@odata.context": "http://host/svc/$metadata#Products",
                "@odata.count": 12,
                "@odata.nextLink": "http://host/svc/Products?$skiptoken=5",
                "value": [{"ID": 1}, {"ID": 2}]
            }),
        );
        for rule in rules() {
            let verdict = rule.verify(&ctx, &http).await.unwrap();
            assert_ne!(verdict.passed, Some(false), "{} failed: {:?}", rule.name(), verdict.details);
        }
    }

    #[tokio::test]
    async fn test_bad_count_and_items() {
        let http = offline_client();
        let ctx = json_context(
            "http://host/svc/Products",
            json!({
                "@odata.context": "http://host/svc/$metadata#Products",
                "@odata.count": -3,
                "value": [{"ID": 1}, 7]
            }),
        );

        let count = CountIsNonNegativeInteger.verify(&ctx, &http).await.unwrap();
        assert_eq!(count.passed, Some(false));

        let items = ValueIsArrayOfObjects.verify(&ctx, &http).await.unwrap();
        assert_eq!(items.details, vec!["value[1] is not an object: 7".to_string()]);

        let next = NextLinkIsUrl.verify(&ctx, &http).await.unwrap();
        assert_eq!(next.passed, None);
    }

    #[tokio::test]
    async fn test_atom_feed_missing_updated() {
        let http = offline_client();
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom"><id>http://host/svc/Products</id><title type="text">Products</title></feed>"#;
        let ctx = context("http://host/svc/Products", 200, "application/atom+xml;type=feed", body);

        let verdict = AtomFeedRequiredElements.verify(&ctx, &http).await.unwrap();
        assert_eq!(verdict.details, vec!["feed has no atom:updated element".to_string()]);
    }
}
