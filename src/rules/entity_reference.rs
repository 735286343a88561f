use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::core::xml::XmlElement;
use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{is_well_formed_uri, Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(ReferenceIdIsUri),
        Arc::new(ReferenceContextUrl),
        Arc::new(XmlReferenceId),
    ]
}

const ENTITY_REFERENCE: &[PayloadType] = &[PayloadType::EntityReference];

/// V4 用 `@odata.id`，V3 `$links` 回應用 `url`
fn reference_member(version: ODataVersion) -> &'static str {
    match version {
        ODataVersion::V4 => "@odata.id",
        ODataVersion::V3 => "url",
    }
}

pub struct ReferenceIdIsUri;

#[async_trait]
impl Rule for ReferenceIdIsUri {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "EntityReference.Core.4601",
            description: "The id of an entity reference is a well-formed URI.",
            spec_section: "OData JSON Format 14",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ENTITY_REFERENCE,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(json) = &ctx.json else {
            return Ok(Verdict::not_applicable("payload is not JSON"));
        };
        let member = reference_member(ctx.version);

        let references: Vec<&Value> = match json.get("value").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => vec![json],
        };

        let mut failures = Vec::new();
        for (idx, reference) in references.iter().enumerate() {
            match reference.get(member).and_then(Value::as_str) {
                Some(id) if is_well_formed_uri(id, &ctx.service_root) => {}
                Some(id) => failures.push(format!("reference #{} id '{}' is not a well-formed URI", idx + 1, id)),
                None => failures.push(format!("reference #{} has no string {} member", idx + 1, member)),
            }
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct ReferenceContextUrl;

#[async_trait]
impl Rule for ReferenceContextUrl {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "EntityReference.Core.4602",
            description: "The context URL of an entity reference payload is #$ref or #Collection($ref).",
            spec_section: "OData JSON Format 10.19",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[ODataVersion::V4],
            payload_types: ENTITY_REFERENCE,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(context) = ctx.context_url() else {
            return Ok(Verdict::fail("entity reference payload has no context URL"));
        };

        match context.split_once('#') {
            Some((_, "$ref" | "Collection($ref)")) => Ok(Verdict::pass()),
            _ => Ok(Verdict::fail(format!(
                "context URL '{}' does not end with #$ref or #Collection($ref)",
                context
            ))),
        }
    }
}

pub struct XmlReferenceId;

#[async_trait]
impl Rule for XmlReferenceId {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "EntityReference.Core.4603",
            description: "An XML entity reference carries a well-formed URI identifying the entity.",
            spec_section: "OData Atom Format 13",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ENTITY_REFERENCE,
            formats: &[PayloadFormat::Atom, PayloadFormat::Xml],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(root) = &ctx.xml else {
            return Ok(Verdict::not_applicable("payload is not XML"));
        };

        let check = |element: &XmlElement| -> Option<String> {
            let id = match element.local_name.as_str() {
                "ref" => element.attr("id").unwrap_or_default(),
                _ => element.text.trim(),
            };
            if is_well_formed_uri(id, &ctx.service_root) {
                None
            } else {
                Some(format!("<{}> id '{}' is not a well-formed URI", element.name, id))
            }
        };

        let failures = match root.local_name.as_str() {
            "ref" | "uri" => check(root).into_iter().collect(),
            // V3 $links 集合或 V4 的 feed of refs
            _ => {
                let references: Vec<&XmlElement> = root
                    .descendants_named("ref")
                    .into_iter()
                    .chain(root.descendants_named("uri"))
                    .collect();
                if references.is_empty() {
                    return Ok(Verdict::fail(format!("<{}> contains no references", root.name)));
                }
                references.into_iter().filter_map(check).collect()
            }
        };
        Ok(Verdict::from_failures(failures))
    }
}
