use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::core::metadata::EntityType;
use crate::core::payload::{annotation, is_annotation};
use crate::domain::model::{PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{is_well_formed_uri, Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(EntityIdIsUri),
        Arc::new(EtagIsString),
        Arc::new(EntryHasKeyProperties),
        Arc::new(EntryPropertiesDeclared),
        Arc::new(AtomEntryRequiredElements),
    ]
}

const ENTRY: &[PayloadType] = &[PayloadType::Entry];

/// Entity type of the entry: `@odata.type` cast first, then the context URL's entity set.
fn entry_type<'a>(ctx: &'a ServiceContext, entry: &Value) -> Option<&'a EntityType> {
    let metadata = ctx.metadata.as_ref()?;
    let type_key = annotation(ctx.version, "type");

    if let Some(cast) = entry.get(&type_key).and_then(Value::as_str) {
        if let Some(t) = metadata.entity_type(cast.trim_start_matches('#')) {
            return Some(t);
        }
    }

    let set = ctx.entity_set_from_context()?;
    metadata.entity_type_of_set(&set)
}

pub struct EntityIdIsUri;

#[async_trait]
impl Rule for EntityIdIsUri {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Entry.Core.2101",
            description: "The id annotation of an entity is a URI.",
            spec_section: "OData JSON Format 4.5.7",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ENTRY,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let key = annotation(ctx.version, "id");
        let Some(id) = ctx.json.as_ref().and_then(|j| j.get(&key)) else {
            return Ok(Verdict::not_applicable(format!("no {} annotation", key)));
        };

        match id.as_str() {
            Some(id) if is_well_formed_uri(id, &ctx.service_root) => Ok(Verdict::pass()),
            _ => Ok(Verdict::fail(format!("{} {} is not a URI", key, id))),
        }
    }
}

pub struct EtagIsString;

#[async_trait]
impl Rule for EtagIsString {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Entry.Core.2102",
            description: "The etag annotation of an entity is a string.",
            spec_section: "OData JSON Format 4.5.10",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ENTRY,
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let key = annotation(ctx.version, "etag");
        match ctx.json.as_ref().and_then(|j| j.get(&key)) {
            None => Ok(Verdict::not_applicable(format!("no {} annotation", key))),
            Some(Value::String(_)) => Ok(Verdict::pass()),
            Some(other) => Ok(Verdict::fail(format!("{} {} is not a string", key, other))),
        }
    }
}

pub struct EntryHasKeyProperties;

#[async_trait]
impl Rule for EntryHasKeyProperties {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Entry.Core.2103",
            description: "An entity contains the key properties of its entity type.",
            spec_section: "OData JSON Format 6",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Should,
            versions: &[],
            payload_types: ENTRY,
            formats: &[PayloadFormat::Json],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let (Some(entry), Some(metadata)) = (ctx.json.as_ref(), ctx.metadata.as_ref()) else {
            return Ok(Verdict::not_applicable("entry or metadata unavailable"));
        };
        let Some(entity_type) = entry_type(ctx, entry) else {
            return Ok(Verdict::not_applicable("entity type of the entry could not be determined"));
        };

        let failures = metadata
            .key_names(entity_type)
            .into_iter()
            .filter(|key| entry.get(*key).is_none())
            .map(|key| format!("key property '{}' of {} is missing", key, entity_type.name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct EntryPropertiesDeclared;

#[async_trait]
impl Rule for EntryPropertiesDeclared {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Entry.Core.2104",
            description: "Members of an entity of a closed type are declared structural or navigation properties.",
            spec_section: "OData CSDL 6.3",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Should,
            versions: &[],
            payload_types: ENTRY,
            formats: &[PayloadFormat::Json],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let (Some(entry), Some(metadata)) = (ctx.json.as_ref(), ctx.metadata.as_ref()) else {
            return Ok(Verdict::not_applicable("entry or metadata unavailable"));
        };
        let Some(entity_type) = entry_type(ctx, entry) else {
            return Ok(Verdict::not_applicable("entity type of the entry could not be determined"));
        };
        if metadata.is_open(entity_type) {
            return Ok(Verdict::not_applicable(format!("{} is an open type", entity_type.name)));
        }
        let Some(object) = entry.as_object() else {
            return Ok(Verdict::fail("entry is not a JSON object"));
        };

        let properties = metadata.all_properties(entity_type);
        let navigation = metadata.all_navigation_properties(entity_type);

        let failures = object
            .keys()
            .filter(|k| !is_annotation(k))
            .filter(|k| {
                !properties.iter().any(|p| &p.name == *k) && !navigation.iter().any(|n| &n.name == *k)
            })
            .map(|k| format!("'{}' is not declared on {}", k, entity_type.name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct AtomEntryRequiredElements;

#[async_trait]
impl Rule for AtomEntryRequiredElements {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Entry.Core.2105",
            description: "An Atom entry contains atom:id, atom:updated and either atom:content or m:properties.",
            spec_section: "OData Atom Format 8.1",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ENTRY,
            formats: &[PayloadFormat::Atom, PayloadFormat::Xml],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(entry) = &ctx.xml else {
            return Ok(Verdict::not_applicable("payload is not XML"));
        };

        let mut failures: Vec<String> = ["id", "updated"]
            .into_iter()
            .filter(|name| entry.child(name).is_none())
            .map(|name| format!("entry has no atom:{} element", name))
            .collect();

        if entry.child("content").is_none() && entry.child("properties").is_none() {
            failures.push("entry has neither atom:content nor m:properties".to_string());
        }
        Ok(Verdict::from_failures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{context, json_context, offline_client, CSDL};
    use serde_json::json;

    fn product_entry(body: Value) -> ServiceContext {
        let mut ctx = json_context("http://host/svc/Products(1)", body);
        ctx.attach_metadata(CSDL.to_string());
        ctx
    }

    #[tokio::test]
    async fn test_valid_entry() {
        let http = offline_client();
        let ctx = product_entry(json!({
            "@odata.context": "http://host/svc/$metadata#Products/$entity",
            "@odata.id": "Products(1)",
            "@odata.etag": "W/\"1\"",
            "ID": 1,
            "Name": "Bread",
            "Price@odata.type": "#Decimal",
            "Price": 2.5
        }));
        assert_eq!(ctx.payload_type, PayloadType::Entry);

        for rule in rules() {
            let verdict = rule.verify(&ctx, &http).await.unwrap();
            assert_ne!(verdict.passed, Some(false), "{} failed: {:?}", rule.name(), verdict.details);
        }
    }

    #[tokio::test]
    async fn test_missing_key_and_undeclared_property() {
        let http = offline_client();
        let ctx = product_entry(json!({
            "@odata.context": "http://host/svc/$metadata#Products/$entity",
            "@odata.etag": 7,
            "Name": "Bread",
            "Colour": "brown"
        }));

        let keys = EntryHasKeyProperties.verify(&ctx, &http).await.unwrap();
        assert_eq!(keys.details, vec!["key property 'ID' of Product is missing".to_string()]);

        let declared = EntryPropertiesDeclared.verify(&ctx, &http).await.unwrap();
        assert_eq!(declared.details, vec!["'Colour' is not declared on Product".to_string()]);

        let etag = EtagIsString.verify(&ctx, &http).await.unwrap();
        assert_eq!(etag.passed, Some(false));
    }

    #[tokio::test]
    async fn test_type_cast_annotation_selects_entity_type() {
        let http = offline_client();
        let ctx = product_entry(json!({
            "@odata.context": "http://host/svc/$metadata#Products/$entity",
            "@odata.type": "#Demo.Category",
            "ID": 3
        }));
        let declared = EntryPropertiesDeclared.verify(&ctx, &http).await.unwrap();
        assert_eq!(declared.passed, Some(true));
    }

    #[tokio::test]
    async fn test_atom_entry_without_content() {
        let http = offline_client();
        let body = r#"<entry xmlns="http://www.w3.org/2005/Atom"><id>http://host/svc/Products(1)</id><updated>2024-01-01T00:00:00Z</updated></entry>"#;
        let ctx = context("http://host/svc/Products(1)", 200, "application/atom+xml;type=entry", body);

        let verdict = AtomEntryRequiredElements.verify(&ctx, &http).await.unwrap();
        assert_eq!(
            verdict.details,
            vec!["entry has neither atom:content nor m:properties".to_string()]
        );
    }
}
