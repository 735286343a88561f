use crate::core::xml::XmlElement;
use crate::utils::error::{Result, ValidatorError};

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDocument {
    pub version: Option<String>,
    pub schemas: Vec<Schema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub namespace: String,
    pub alias: Option<String>,
    pub entity_types: Vec<EntityType>,
    pub containers: Vec<EntityContainer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub name: String,
    pub base_type: Option<String>,
    pub is_abstract: bool,
    pub is_open: bool,
    pub keys: Vec<String>,
    pub properties: Vec<Property>,
    pub navigation_properties: Vec<NavigationProperty>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub edm_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationProperty {
    pub name: String,
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityContainer {
    pub name: String,
    pub entity_sets: Vec<EntitySet>,
    pub singletons: Vec<EntitySet>,
    pub function_imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
}

impl MetadataDocument {
    pub fn parse(xml: &str) -> Result<Self> {
        let root = XmlElement::parse(xml)?;
        Self::from_root(&root)
    }

    pub fn from_root(root: &XmlElement) -> Result<Self> {
        if root.local_name != "Edmx" {
            return Err(ValidatorError::MetadataError {
                message: format!("expected edmx:Edmx root element, found {}", root.name),
            });
        }

        let schemas = root
            .descendants_named("Schema")
            .into_iter()
            .map(parse_schema)
            .collect();

        Ok(Self {
            version: root.attr("Version").map(str::to_string),
            schemas,
        })
    }

    pub fn entity_types(&self) -> impl Iterator<Item = (&Schema, &EntityType)> {
        self.schemas
            .iter()
            .flat_map(|schema| schema.entity_types.iter().map(move |t| (schema, t)))
    }

    pub fn all_entity_sets(&self) -> impl Iterator<Item = &EntitySet> {
        self.schemas
            .iter()
            .flat_map(|schema| schema.containers.iter())
            .flat_map(|container| container.entity_sets.iter())
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.all_entity_sets().find(|set| set.name == name)
    }

    /// 以完整名稱 (Namespace.Type / Alias.Type) 或簡單名稱查找 entity type
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        let name = strip_collection(name);
        match name.rsplit_once('.') {
            Some((qualifier, simple)) => self
                .schemas
                .iter()
                .filter(|schema| {
                    schema.namespace == qualifier || schema.alias.as_deref() == Some(qualifier)
                })
                .flat_map(|schema| schema.entity_types.iter())
                .find(|t| t.name == simple),
            None => self.entity_types().map(|(_, t)| t).find(|t| t.name == name),
        }
    }

    pub fn entity_type_of_set(&self, set_name: &str) -> Option<&EntityType> {
        self.entity_set(set_name)
            .and_then(|set| self.entity_type(&set.entity_type))
    }

    fn base_chain<'a>(&'a self, entity_type: &'a EntityType) -> Vec<&'a EntityType> {
        let mut chain = vec![entity_type];
        let mut current = entity_type;
        while let Some(base) = current.base_type.as_deref().and_then(|b| self.entity_type(b)) {
            // 防止循環繼承
            if chain.iter().any(|t| std::ptr::eq(*t, base)) {
                break;
            }
            chain.push(base);
            current = base;
        }
        chain
    }

    pub fn key_names<'a>(&'a self, entity_type: &'a EntityType) -> Vec<&'a str> {
        self.base_chain(entity_type)
            .into_iter()
            .find(|t| !t.keys.is_empty())
            .map(|t| t.keys.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn all_properties<'a>(&'a self, entity_type: &'a EntityType) -> Vec<&'a Property> {
        self.base_chain(entity_type)
            .into_iter()
            .flat_map(|t| t.properties.iter())
            .collect()
    }

    pub fn all_navigation_properties<'a>(
        &'a self,
        entity_type: &'a EntityType,
    ) -> Vec<&'a NavigationProperty> {
        self.base_chain(entity_type)
            .into_iter()
            .flat_map(|t| t.navigation_properties.iter())
            .collect()
    }

    pub fn key_properties<'a>(&'a self, entity_type: &'a EntityType) -> Vec<&'a Property> {
        let properties = self.all_properties(entity_type);
        self.key_names(entity_type)
            .into_iter()
            .filter_map(|key| properties.iter().find(|p| p.name == key).copied())
            .collect()
    }

    pub fn is_open(&self, entity_type: &EntityType) -> bool {
        self.base_chain(entity_type).iter().any(|t| t.is_open)
    }
}

fn strip_collection(name: &str) -> &str {
    name.strip_prefix("Collection(")
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(name)
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

fn parse_schema(schema: &XmlElement) -> Schema {
    let entity_types = schema
        .children_named("EntityType")
        .map(parse_entity_type)
        .collect();

    let containers = schema
        .children_named("EntityContainer")
        .map(|container| EntityContainer {
            name: container.attr("Name").unwrap_or_default().to_string(),
            entity_sets: container
                .children_named("EntitySet")
                .map(parse_entity_set)
                .collect(),
            singletons: container
                .children_named("Singleton")
                .map(|s| EntitySet {
                    name: s.attr("Name").unwrap_or_default().to_string(),
                    entity_type: s.attr("Type").unwrap_or_default().to_string(),
                })
                .collect(),
            function_imports: container
                .children_named("FunctionImport")
                .filter_map(|f| f.attr("Name").map(str::to_string))
                .collect(),
        })
        .collect();

    Schema {
        namespace: schema.attr("Namespace").unwrap_or_default().to_string(),
        alias: schema.attr("Alias").map(str::to_string),
        entity_types,
        containers,
    }
}

fn parse_entity_type(element: &XmlElement) -> EntityType {
    let keys = element
        .child("Key")
        .map(|key| {
            key.children_named("PropertyRef")
                .filter_map(|p| p.attr("Name").map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let properties = element
        .children_named("Property")
        .map(|p| Property {
            name: p.attr("Name").unwrap_or_default().to_string(),
            edm_type: p.attr("Type").unwrap_or_default().to_string(),
            nullable: parse_bool(p.attr("Nullable"), true),
        })
        .collect();

    let navigation_properties = element
        .children_named("NavigationProperty")
        .map(|n| NavigationProperty {
            name: n.attr("Name").unwrap_or_default().to_string(),
            // V4 用 Type，V3 用 ToRole
            target: n.attr("Type").or_else(|| n.attr("ToRole")).map(str::to_string),
        })
        .collect();

    EntityType {
        name: element.attr("Name").unwrap_or_default().to_string(),
        base_type: element.attr("BaseType").map(str::to_string),
        is_abstract: parse_bool(element.attr("Abstract"), false),
        is_open: parse_bool(element.attr("OpenType"), false),
        keys,
        properties,
        navigation_properties,
    }
}

fn parse_entity_set(element: &XmlElement) -> EntitySet {
    EntitySet {
        name: element.attr("Name").unwrap_or_default().to_string(),
        entity_type: element.attr("EntityType").unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSDL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="ODataDemo" Alias="Demo" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Product">
        <Key><PropertyRef Name="ID"/></Key>
        <Property Name="ID" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String"/>
        <NavigationProperty Name="Category" Type="ODataDemo.Category"/>
      </EntityType>
      <EntityType Name="FeaturedProduct" BaseType="Demo.Product" OpenType="true">
        <Property Name="Rank" Type="Edm.Int32"/>
      </EntityType>
      <EntityType Name="Category">
        <Key><PropertyRef Name="Code"/></Key>
        <Property Name="Code" Type="Edm.String" Nullable="false"/>
      </EntityType>
      <EntityContainer Name="DemoService">
        <EntitySet Name="Products" EntityType="ODataDemo.Product"/>
        <EntitySet Name="Featured" EntityType="Demo.FeaturedProduct"/>
        <EntitySet Name="Categories" EntityType="ODataDemo.Category"/>
        <Singleton Name="Shop" Type="ODataDemo.Category"/>
        <FunctionImport Name="GetTop" Function="ODataDemo.GetTop"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    #[test]
    fn test_parse_entity_model() {
        let doc = MetadataDocument::parse(CSDL).unwrap();

        assert_eq!(doc.version.as_deref(), Some("4.0"));
        assert_eq!(doc.schemas.len(), 1);
        assert_eq!(doc.all_entity_sets().count(), 3);

        let product = doc.entity_type_of_set("Products").unwrap();
        assert_eq!(product.keys, vec!["ID".to_string()]);
        assert!(!product.properties[0].nullable);
        assert!(product.properties[1].nullable);
        assert_eq!(
            product.navigation_properties[0].target.as_deref(),
            Some("ODataDemo.Category")
        );

        let container = &doc.schemas[0].containers[0];
        assert_eq!(container.singletons[0].name, "Shop");
        assert_eq!(container.function_imports, vec!["GetTop".to_string()]);
    }

    #[test]
    fn test_derived_type_inherits_keys_and_properties() {
        let doc = MetadataDocument::parse(CSDL).unwrap();
        let featured = doc.entity_type_of_set("Featured").unwrap();

        assert!(featured.keys.is_empty());
        assert_eq!(doc.key_names(featured), vec!["ID"]);
        assert_eq!(doc.all_properties(featured).len(), 3);
        assert_eq!(doc.key_properties(featured)[0].edm_type, "Edm.Int32");
        assert!(doc.is_open(featured));
        assert_eq!(doc.all_navigation_properties(featured).len(), 1);
    }

    #[test]
    fn test_entity_type_lookup_by_alias_and_collection() {
        let doc = MetadataDocument::parse(CSDL).unwrap();
        assert!(doc.entity_type("Demo.Category").is_some());
        assert!(doc.entity_type("Collection(ODataDemo.Product)").is_some());
        assert!(doc.entity_type("Other.Product").is_none());
    }

    #[test]
    fn test_non_edmx_root_is_rejected() {
        let err = MetadataDocument::parse("<service/>").unwrap_err();
        assert!(matches!(err, ValidatorError::MetadataError { .. }));
    }
}
