use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::domain::model::{PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(JsonErrorCodeAndMessage),
        Arc::new(ErrorStatusCode),
        Arc::new(XmlErrorCodeAndMessage),
    ]
}

const ERROR: &[PayloadType] = &[PayloadType::Error];

pub struct JsonErrorCodeAndMessage;

#[async_trait]
impl Rule for JsonErrorCodeAndMessage {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Error.Core.4001",
            description: "A JSON error response contains an error object with string code and message members.",
            spec_section: "OData JSON Format 21",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ERROR,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(json) = &ctx.json else {
            return Ok(Verdict::fail("error response body is not valid JSON"));
        };
        let Some(error) = json.get("error").or_else(|| json.get("odata.error")) else {
            return Ok(Verdict::fail("error response has no error object"));
        };

        let mut failures = Vec::new();
        if !error.get("code").is_some_and(Value::is_string) {
            failures.push("error object has no string code member".to_string());
        }
        // V3 的 message 是 {"lang": ..., "value": ...}
        let message_ok = match error.get("message") {
            Some(Value::String(_)) => true,
            Some(Value::Object(m)) => m.get("value").is_some_and(Value::is_string),
            _ => false,
        };
        if !message_ok {
            failures.push("error object has no string message member".to_string());
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct ErrorStatusCode;

#[async_trait]
impl Rule for ErrorStatusCode {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Error.Core.4002",
            description: "Error payloads are returned with a 4xx or 5xx status code.",
            spec_section: "OData Protocol 9.4",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ERROR,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let status = ctx.response.status;
        if (400..600).contains(&status) {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("error payload returned with status {}", status)))
        }
    }
}

pub struct XmlErrorCodeAndMessage;

#[async_trait]
impl Rule for XmlErrorCodeAndMessage {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Error.Core.4003",
            description: "An XML error response is an m:error element with m:code and m:message children.",
            spec_section: "OData Atom Format 17",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ERROR,
            formats: &[PayloadFormat::Atom, PayloadFormat::Xml],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(root) = &ctx.xml else {
            return Ok(Verdict::fail("error response body is not well-formed XML"));
        };
        if root.local_name != "error" {
            return Ok(Verdict::fail(format!("root element is <{}>, expected m:error", root.name)));
        }

        let failures = ["code", "message"]
            .into_iter()
            .filter(|name| root.child(name).is_none())
            .map(|name| format!("m:error has no m:{} child", name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{context, offline_client};

    #[tokio::test]
    async fn test_json_error_payload() {
        let http = offline_client();
        let body = r#"{"error": {"code": "NotFound", "message": "No product with key 99"}}"#;
        let ctx = context("http://host/svc/Products(99)", 404, "application/json", body);
        assert_eq!(ctx.payload_type, PayloadType::Error);

        assert_eq!(JsonErrorCodeAndMessage.verify(&ctx, &http).await.unwrap().passed, Some(true));
        assert_eq!(ErrorStatusCode.verify(&ctx, &http).await.unwrap().passed, Some(true));
    }

    #[tokio::test]
    async fn test_v3_error_with_message_object() {
        let http = offline_client();
        let body = r#"{"odata.error": {"code": "", "message": {"lang": "en-US", "value": "Resource not found."}}}"#;
        let ctx = context("http://host/svc/Products(99)", 404, "application/json", body);
        assert_eq!(JsonErrorCodeAndMessage.verify(&ctx, &http).await.unwrap().passed, Some(true));
    }

    #[tokio::test]
    async fn test_error_served_with_success_status() {
        let http = offline_client();
        let body = r#"{"error": {"code": 500}}"#;
        let ctx = context("http://host/svc/Products", 200, "application/json", body);
        assert_eq!(ctx.payload_type, PayloadType::Error);

        let status = ErrorStatusCode.verify(&ctx, &http).await.unwrap();
        assert_eq!(status.details, vec!["error payload returned with status 200".to_string()]);

        let members = JsonErrorCodeAndMessage.verify(&ctx, &http).await.unwrap();
        assert_eq!(members.details.len(), 2);
    }

    #[tokio::test]
    async fn test_xml_error_missing_message() {
        let http = offline_client();
        let body = r#"<m:error xmlns:m="http://docs.oasis-open.org/odata/ns/metadata"><m:code>400</m:code></m:error>"#;
        let ctx = context("http://host/svc/Products", 400, "application/xml", body);

        let verdict = XmlErrorCodeAndMessage.verify(&ctx, &http).await.unwrap();
        assert_eq!(verdict.details, vec!["m:error has no m:message child".to_string()]);
    }
}
