use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(ContextUrlPointsToMetadata),
        Arc::new(EntriesHaveNameAndUrl),
        Arc::new(KindIsKnown),
        Arc::new(ListsAllEntitySets),
        Arc::new(XmlWorkspaceCollections),
    ]
}

const SERVICE_DOCUMENT: &[PayloadType] = &[PayloadType::ServiceDocument];

fn service_items(ctx: &ServiceContext) -> Option<&Vec<Value>> {
    ctx.json.as_ref()?.get("value")?.as_array()
}

pub struct ContextUrlPointsToMetadata;

#[async_trait]
impl Rule for ContextUrlPointsToMetadata {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceDocument.Core.4001",
            description: "The context URL of a JSON service document is the metadata document URL without a fragment.",
            spec_section: "OData JSON Format 5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        match ctx.context_url() {
            Some(url) if url.ends_with("$metadata") => Ok(Verdict::pass()),
            Some(url) => Ok(Verdict::fail(format!(
                "context URL '{}' does not end with $metadata",
                url
            ))),
            None => Ok(Verdict::fail("service document has no context URL")),
        }
    }
}

pub struct EntriesHaveNameAndUrl;

#[async_trait]
impl Rule for EntriesHaveNameAndUrl {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceDocument.Core.4002",
            description: "Each item in the service document value array has string name and url members.",
            spec_section: "OData JSON Format 5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(items) = service_items(ctx) else {
            return Ok(Verdict::fail("service document has no value array"));
        };

        let mut failures = Vec::new();
        for (idx, item) in items.iter().enumerate() {
            for member in ["name", "url"] {
                if !item.get(member).is_some_and(Value::is_string) {
                    failures.push(format!("value[{}] has no string '{}' member", idx, member));
                }
            }
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct KindIsKnown;

#[async_trait]
impl Rule for KindIsKnown {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceDocument.Core.4003",
            description: "The kind member of a service document item is EntitySet, Singleton, FunctionImport or ServiceDocument.",
            spec_section: "OData JSON Format 5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[ODataVersion::V4],
            payload_types: SERVICE_DOCUMENT,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(items) = service_items(ctx) else {
            return Ok(Verdict::not_applicable("service document has no value array"));
        };

        let failures = items
            .iter()
            .filter_map(|item| {
                let kind = item.get("kind")?;
                match kind.as_str() {
                    Some("EntitySet" | "Singleton" | "FunctionImport" | "ServiceDocument") => None,
                    _ => Some(format!(
                        "item '{}' has unknown kind {}",
                        item.get("name").and_then(Value::as_str).unwrap_or("?"),
                        kind
                    )),
                }
            })
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct ListsAllEntitySets;

#[async_trait]
impl Rule for ListsAllEntitySets {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceDocument.Core.4004",
            description: "Every entity set declared in the metadata document is listed in the service document.",
            spec_section: "OData Protocol 11.1.1",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Should,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(metadata) = &ctx.metadata else {
            return Ok(Verdict::not_applicable("metadata document unavailable"));
        };

        let listed: HashSet<String> = ctx
            .service_document_sets()
            .into_iter()
            .flat_map(|(name, url)| [name, url])
            .collect();

        let failures = metadata
            .all_entity_sets()
            .filter(|set| !listed.contains(&set.name))
            .map(|set| format!("entity set '{}' is not listed in the service document", set.name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct XmlWorkspaceCollections;

#[async_trait]
impl Rule for XmlWorkspaceCollections {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceDocument.Core.4005",
            description: "An XML service document contains a workspace whose collections carry an href attribute.",
            spec_section: "OData Atom Format 5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
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

        let Some(workspace) = root.child("workspace") else {
            return Ok(Verdict::fail("service element has no workspace child"));
        };

        let failures = workspace
            .children_named("collection")
            .enumerate()
            .filter(|(_, c)| c.attr("href").map_or(true, str::is_empty))
            .map(|(idx, _)| format!("collection #{} has no href attribute", idx + 1))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}
