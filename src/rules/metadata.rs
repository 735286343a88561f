use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::core::metadata::MetadataDocument;
use crate::domain::model::{ODataVersion, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(EdmxRootAndVersion),
        Arc::new(EntityTypesDeclareKeys),
        Arc::new(KeyPropertiesAreDeclared),
        Arc::new(EntitySetTypesResolve),
        Arc::new(EntityTypeNamesUnique),
    ]
}

const METADATA: &[PayloadType] = &[PayloadType::Metadata];

const EDMX_V4_NS: &str = "http://docs.oasis-open.org/odata/ns/edmx";
const EDMX_V3_NS: &str = "http://schemas.microsoft.com/ado/2007/06/edmx";

/// 驗證目標本身就是 metadata 文件時，直接從 XML 樹解析
fn document(ctx: &ServiceContext) -> Option<MetadataDocument> {
    match &ctx.xml {
        Some(root) => MetadataDocument::from_root(root).ok(),
        None => ctx.metadata.clone(),
    }
}

pub struct EdmxRootAndVersion;

#[async_trait]
impl Rule for EdmxRootAndVersion {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Metadata.Core.4101",
            description: "The metadata document root is edmx:Edmx in the namespace and version of the OData protocol version.",
            spec_section: "OData CSDL 3.1",
            category: RuleCategory::Metadata,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: METADATA,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(root) = &ctx.xml else {
            return Ok(Verdict::fail("metadata document is not XML"));
        };
        if root.local_name != "Edmx" {
            return Ok(Verdict::fail(format!("root element is {}, expected edmx:Edmx", root.name)));
        }

        let (expected_ns, version_ok) = match ctx.version {
            ODataVersion::V4 => (
                EDMX_V4_NS,
                matches!(root.attr("Version"), Some("4.0") | Some("4.01")),
            ),
            ODataVersion::V3 => (EDMX_V3_NS, root.attr("Version") == Some("1.0")),
        };

        let mut failures = Vec::new();
        if root.namespace.as_deref() != Some(expected_ns) {
            failures.push(format!(
                "Edmx namespace is {:?}, expected {}",
                root.namespace, expected_ns
            ));
        }
        if !version_ok {
            failures.push(format!(
                "Edmx Version attribute {:?} does not match OData {}",
                root.attr("Version"),
                ctx.version
            ));
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct EntityTypesDeclareKeys;

#[async_trait]
impl Rule for EntityTypesDeclareKeys {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Metadata.Core.4102",
            description: "Every entity type that is neither derived nor abstract declares a key.",
            spec_section: "OData CSDL 8.2",
            category: RuleCategory::Metadata,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: METADATA,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(doc) = document(ctx) else {
            return Ok(Verdict::not_applicable("metadata document could not be parsed"));
        };

        let failures = doc
            .entity_types()
            .filter(|(_, t)| t.base_type.is_none() && !t.is_abstract && t.keys.is_empty())
            .map(|(schema, t)| format!("entity type {}.{} declares no key", schema.namespace, t.name))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct KeyPropertiesAreDeclared;

#[async_trait]
impl Rule for KeyPropertiesAreDeclared {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Metadata.Core.4103",
            description: "Key property references name declared, non-nullable properties of the entity type.",
            spec_section: "OData CSDL 8.3",
            category: RuleCategory::Metadata,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: METADATA,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(doc) = document(ctx) else {
            return Ok(Verdict::not_applicable("metadata document could not be parsed"));
        };

        let mut failures = Vec::new();
        for (_, entity_type) in doc.entity_types() {
            let properties = doc.all_properties(entity_type);
            for key in &entity_type.keys {
                match properties.iter().find(|p| &p.name == key) {
                    None => failures.push(format!(
                        "key '{}' of {} is not a declared property",
                        key, entity_type.name
                    )),
                    Some(p) if p.nullable => failures.push(format!(
                        "key property {}.{} is nullable",
                        entity_type.name, key
                    )),
                    Some(_) => {}
                }
            }
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct EntitySetTypesResolve;

#[async_trait]
impl Rule for EntitySetTypesResolve {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Metadata.Core.4104",
            description: "The EntityType of every entity set resolves to an entity type declared in the metadata.",
            spec_section: "OData CSDL 13.2",
            category: RuleCategory::Metadata,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: METADATA,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(doc) = document(ctx) else {
            return Ok(Verdict::not_applicable("metadata document could not be parsed"));
        };

        let failures = doc
            .all_entity_sets()
            .filter(|set| doc.entity_type(&set.entity_type).is_none())
            .map(|set| format!("entity set '{}' refers to unknown type '{}'", set.name, set.entity_type))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

pub struct EntityTypeNamesUnique;

#[async_trait]
impl Rule for EntityTypeNamesUnique {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Metadata.Core.4105",
            description: "Entity type names are unique within their schema.",
            spec_section: "OData CSDL 5.1",
            category: RuleCategory::Metadata,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: METADATA,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(doc) = document(ctx) else {
            return Ok(Verdict::not_applicable("metadata document could not be parsed"));
        };

        let mut failures = Vec::new();
        for schema in &doc.schemas {
            let mut seen = HashSet::new();
            for entity_type in &schema.entity_types {
                if !seen.insert(entity_type.name.as_str()) {
                    failures.push(format!(
                        "entity type '{}' is declared more than once in {}",
                        entity_type.name, schema.namespace
                    ));
                }
            }
        }
        Ok(Verdict::from_failures(failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::{context, offline_client, CSDL};

    fn metadata_context(body: &str) -> ServiceContext {
        context("http://host/svc/$metadata", 200, "application/xml", body)
    }

    #[tokio::test]
    async fn test_valid_metadata_passes_all_rules() {
        let http = offline_client();
        let ctx = metadata_context(CSDL);
        assert_eq!(ctx.payload_type, PayloadType::Metadata);
        assert_eq!(ctx.version, ODataVersion::V4);

        for rule in rules() {
            let verdict = rule.verify(&ctx, &http).await.unwrap();
            assert_eq!(verdict.passed, Some(true), "{} failed: {:?}", rule.name(), verdict.details);
        }
    }

    #[tokio::test]
    async fn test_broken_metadata_is_reported() {
        let http = offline_client();
        let body = r#"<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Broken" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="NoKey"><Property Name="Name" Type="Edm.String"/></EntityType>
      <EntityType Name="BadKey">
        <Key><PropertyRef Name="Code"/><PropertyRef Name="Missing"/></Key>
        <Property Name="Code" Type="Edm.String"/>
      </EntityType>
      <EntityType Name="BadKey"><Key><PropertyRef Name="ID"/></Key><Property Name="ID" Type="Edm.Int32" Nullable="false"/></EntityType>
      <EntityContainer Name="C"><EntitySet Name="Ghosts" EntityType="Broken.Ghost"/></EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;
        let ctx = metadata_context(body);

        let keys = EntityTypesDeclareKeys.verify(&ctx, &http).await.unwrap();
        assert_eq!(keys.details, vec!["entity type Broken.NoKey declares no key".to_string()]);

        let key_props = KeyPropertiesAreDeclared.verify(&ctx, &http).await.unwrap();
        assert_eq!(key_props.passed, Some(false));
        assert_eq!(key_props.details.len(), 2);

        let sets = EntitySetTypesResolve.verify(&ctx, &http).await.unwrap();
        assert!(sets.details[0].contains("Ghosts"));

        let unique = EntityTypeNamesUnique.verify(&ctx, &http).await.unwrap();
        assert!(unique.details[0].contains("BadKey"));
    }

    #[tokio::test]
    async fn test_wrong_edmx_version() {
        let http = offline_client();
        let body = r#"<edmx:Edmx Version="1.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx"><edmx:DataServices/></edmx:Edmx>"#;
        let mut ctx = metadata_context(body);
        ctx.version = ODataVersion::V4;

        let verdict = EdmxRootAndVersion.verify(&ctx, &http).await.unwrap();
        assert_eq!(verdict.passed, Some(false));
        assert!(verdict.details[0].contains("Version"));
    }
}
