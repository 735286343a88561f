//! Service implementation rules.
//!
//! These run against the service document and probe the live service with
//! extra requests (`$top`, `$skip`, `$filter`, ...) on the first entity set
//! whose entity type has a single integer, string or GUID key.

use crate::core::context::ServiceContext;
use crate::core::http::{HttpClient, HttpResponse};
use crate::core::payload::{annotation, is_annotation};
use crate::core::xml::XmlElement;
use crate::domain::model::{ODataVersion, PayloadType, RequirementLevel, RuleCategory};
use crate::rules::{Rule, RuleInfo, Verdict};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(TopLimitsResults),
        Arc::new(SkipOffsetsResults),
        Arc::new(CountMatchesCollection),
        Arc::new(FilterOnKey),
        Arc::new(OrderByDescending),
        Arc::new(SelectRestrictsProperties),
        Arc::new(EntityByKey),
        Arc::new(MetadataAvailable),
        Arc::new(MissingEntityIsNotFound),
        Arc::new(InsertAndDelete),
    ]
}

const SERVICE_DOCUMENT: &[PayloadType] = &[PayloadType::ServiceDocument];

/// 探測失敗時的說明，規則轉成 fail verdict
type Probe<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyKind {
    Int,
    Int64,
    String,
    Guid,
}

impl KeyKind {
    fn from_edm(edm_type: &str) -> Option<Self> {
        match edm_type {
            "Edm.Byte" | "Edm.SByte" | "Edm.Int16" | "Edm.Int32" => Some(Self::Int),
            "Edm.Int64" => Some(Self::Int64),
            "Edm.String" => Some(Self::String),
            "Edm.Guid" => Some(Self::Guid),
            _ => None,
        }
    }
}

/// 被探測的 entity set
#[derive(Debug, Clone)]
struct Target {
    set: String,
    url: Url,
    key: String,
    kind: KeyKind,
    version: ODataVersion,
}

impl Target {
    fn select(ctx: &ServiceContext) -> Option<Self> {
        let metadata = ctx.metadata.as_ref()?;

        let mut candidates = ctx.service_document_sets();
        if candidates.is_empty() {
            candidates = metadata
                .all_entity_sets()
                .map(|set| (set.name.clone(), set.name.clone()))
                .collect();
        }

        candidates.into_iter().find_map(|(name, href)| {
            let entity_type = metadata.entity_type_of_set(&name)?;
            let keys = metadata.key_properties(entity_type);
            let [key] = keys.as_slice() else {
                return None;
            };
            let kind = KeyKind::from_edm(&key.edm_type)?;
            let url = ctx.resolve(&href).ok()?;
            tracing::debug!(entity_set = %name, key = %key.name, "selected entity set for service probes");
            Some(Self {
                set: name,
                url,
                key: key.name.clone(),
                kind,
                version: ctx.version,
            })
        })
    }

    /// 查詢字串以 RFC 3986 編碼 (空白為 `%20`)，`+` 在 OData ABNF 中不是空白
    fn query(&self, pairs: &[(&str, &str)]) -> Url {
        let mut url = self.url.clone();
        let mut query: Vec<String> = url
            .query()
            .filter(|existing| !existing.is_empty())
            .map(|existing| vec![existing.to_string()])
            .unwrap_or_default();
        query.extend(
            pairs
                .iter()
                .map(|(name, value)| format!("{}={}", name, urlencoding::encode(value))),
        );
        url.set_query(Some(&query.join("&")));
        url
    }

    fn literal(&self, value: &Value) -> Option<String> {
        match (self.kind, value) {
            (KeyKind::Int, Value::Number(n)) => Some(n.to_string()),
            (KeyKind::Int64, Value::Number(n)) => Some(self.int64_literal(&n.to_string())),
            // V3 JSON 以字串表示 Int64
            (KeyKind::Int64, Value::String(s)) => Some(self.int64_literal(s)),
            (KeyKind::String, Value::String(s)) => Some(format!("'{}'", s.replace('\'', "''"))),
            (KeyKind::Guid, Value::String(s)) => Some(match self.version {
                ODataVersion::V4 => s.clone(),
                ODataVersion::V3 => format!("guid'{}'", s),
            }),
            _ => None,
        }
    }

    fn int64_literal(&self, digits: &str) -> String {
        match self.version {
            ODataVersion::V4 => digits.to_string(),
            ODataVersion::V3 => format!("{}L", digits),
        }
    }

    fn entity_url(&self, literal: &str) -> Result<Url> {
        let base = self.url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}({})", base, literal))?)
    }

    fn key_of<'a>(&self, entity: &'a Value) -> Option<&'a Value> {
        entity.get(&self.key)
    }

    async fn fetch_entities(&self, http: &HttpClient, url: &Url) -> Result<Probe<Vec<Value>>> {
        let response = http.get_json(url.as_str()).await?;
        if !response.is_success() {
            return Ok(Err(format!("GET {} returned status {}", url, response.status)));
        }
        let Ok(json) = response.json() else {
            return Ok(Err(format!("GET {} did not return JSON", url)));
        };
        match json.get("value").and_then(Value::as_array) {
            Some(items) => Ok(Ok(items.clone())),
            None => Ok(Err(format!("GET {} did not return a collection", url))),
        }
    }

    async fn first_entity(&self, http: &HttpClient) -> Result<Probe<Option<Value>>> {
        let url = self.query(&[("$top", "1")]);
        Ok(self
            .fetch_entities(http, &url)
            .await?
            .map(|items| items.into_iter().next()))
    }

    /// 產生不存在於 entity set 的 key 值
    async fn unused_key(&self, http: &HttpClient) -> Result<Probe<Value>> {
        match self.kind {
            KeyKind::String => Ok(Ok(Value::String(format!(
                "odata-validator-{}",
                Uuid::new_v4().simple()
            )))),
            KeyKind::Guid => Ok(Ok(Value::String(Uuid::new_v4().to_string()))),
            KeyKind::Int | KeyKind::Int64 => {
                let order = format!("{} desc", self.key);
                let url = self.query(&[("$orderby", order.as_str()), ("$top", "1")]);
                let items = match self.fetch_entities(http, &url).await? {
                    Ok(items) => items,
                    Err(reason) => return Ok(Err(reason)),
                };
                let max = items
                    .first()
                    .and_then(|e| self.key_of(e))
                    .and_then(|k| k.as_i64().or_else(|| k.as_str()?.parse().ok()))
                    .unwrap_or(0);
                Ok(Ok(Value::from(max.saturating_add(1))))
            }
        }
    }
}

macro_rules! probe {
    ($probe:expr) => {
        match $probe {
            Ok(value) => value,
            Err(reason) => return Ok(Verdict::fail(reason)),
        }
    };
}

macro_rules! target {
    ($ctx:expr) => {
        match Target::select($ctx) {
            Some(target) => target,
            None => {
                return Ok(Verdict::not_applicable(
                    "no entity set with a single integer, string or GUID key",
                ))
            }
        }
    };
}

pub struct TopLimitsResults;

#[async_trait]
impl Rule for TopLimitsResults {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Top.1001",
            description: "$top=n returns at most n entities.",
            spec_section: "OData URL Conventions 5.1.6",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let url = target.query(&[("$top", "2")]);
        let items = probe!(target.fetch_entities(http, &url).await?);

        if items.len() <= 2 {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("GET {} returned {} entities", url, items.len())))
        }
    }
}

pub struct SkipOffsetsResults;

#[async_trait]
impl Rule for SkipOffsetsResults {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Skip.1002",
            description: "$skip=n omits the first n entities of the collection.",
            spec_section: "OData URL Conventions 5.1.7",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let first_two = probe!(target.fetch_entities(http, &target.query(&[("$top", "2")])).await?);
        if first_two.len() < 2 {
            return Ok(Verdict::not_applicable(format!("{} has fewer than two entities", target.set)));
        }

        let url = target.query(&[("$skip", "1"), ("$top", "1")]);
        let skipped = probe!(target.fetch_entities(http, &url).await?);

        let expected = target.key_of(&first_two[1]);
        let actual = skipped.first().and_then(|e| target.key_of(e));
        if actual.is_some() && actual == expected {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!(
                "GET {} returned key {:?}, expected {:?}",
                url, actual, expected
            )))
        }
    }
}

pub struct CountMatchesCollection;

#[async_trait]
impl Rule for CountMatchesCollection {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Count.1003",
            description: "The inline count of a collection equals the value of its /$count segment.",
            spec_section: "OData URL Conventions 5.1.8",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);

        let url = match target.version {
            ODataVersion::V4 => target.query(&[("$count", "true"), ("$top", "0")]),
            ODataVersion::V3 => target.query(&[("$inlinecount", "allpages"), ("$top", "0")]),
        };
        let response = http.get_json(url.as_str()).await?;
        if !response.is_success() {
            return Ok(Verdict::fail(format!("GET {} returned status {}", url, response.status)));
        }
        let key = annotation(target.version, "count");
        let inline = response
            .json()
            .ok()
            .and_then(|json| json.get(&key).cloned())
            .and_then(|count| count.as_u64().or_else(|| count.as_str()?.parse().ok()));
        let Some(inline) = inline else {
            return Ok(Verdict::fail(format!("GET {} has no integer {} annotation", url, key)));
        };

        let count_url = Url::parse(&format!("{}/$count", target.url.as_str().trim_end_matches('/')))?;
        let raw = http.get_with_accept(count_url.as_str(), "text/plain").await?;
        if !raw.is_success() {
            return Ok(Verdict::fail(format!("GET {} returned status {}", count_url, raw.status)));
        }
        match raw.body.trim().parse::<u64>() {
            Ok(count) if count == inline => Ok(Verdict::pass()),
            Ok(count) => Ok(Verdict::fail(format!(
                "{} is {} but {} returned {}",
                key, inline, count_url, count
            ))),
            Err(_) => Ok(Verdict::fail(format!(
                "{} returned a non-integer body '{}'",
                count_url,
                raw.body.trim()
            ))),
        }
    }
}

pub struct FilterOnKey;

#[async_trait]
impl Rule for FilterOnKey {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Filter.1004",
            description: "$filter with an eq comparison on the key returns exactly the matching entity.",
            spec_section: "OData URL Conventions 5.1.2",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let Some(entity) = probe!(target.first_entity(http).await?) else {
            return Ok(Verdict::not_applicable(format!("{} is empty", target.set)));
        };
        let Some((key, literal)) = target
            .key_of(&entity)
            .and_then(|k| Some((k.clone(), target.literal(k)?)))
        else {
            return Ok(Verdict::not_applicable("entity carries no usable key value"));
        };

        let filter = format!("{} eq {}", target.key, literal);
        let url = target.query(&[("$filter", filter.as_str())]);
        let items = probe!(target.fetch_entities(http, &url).await?);

        let failures = match items.as_slice() {
            [only] if target.key_of(only) == Some(&key) => Vec::new(),
            [other] => vec![format!(
                "$filter={} returned key {:?}",
                filter,
                target.key_of(other)
            )],
            _ => vec![format!("$filter={} returned {} entities, expected 1", filter, items.len())],
        };
        Ok(Verdict::from_failures(failures))
    }
}

pub struct OrderByDescending;

#[async_trait]
impl Rule for OrderByDescending {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.OrderBy.1005",
            description: "$orderby=<key> desc returns entities in descending key order.",
            spec_section: "OData URL Conventions 5.1.5",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let order = format!("{} desc", target.key);
        let url = target.query(&[("$orderby", order.as_str()), ("$top", "5")]);
        let items = probe!(target.fetch_entities(http, &url).await?);

        let keys: Vec<&Value> = items.iter().filter_map(|e| target.key_of(e)).collect();
        let failures = keys
            .windows(2)
            .filter(|pair| !is_descending(pair[0], pair[1]))
            .map(|pair| format!("{} is ordered before {}", pair[0], pair[1]))
            .collect();
        Ok(Verdict::from_failures(failures))
    }
}

fn is_descending(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x >= y,
            _ => true,
        },
        // 服務可能使用 ordinal 或不分大小寫的排序
        (Value::String(x), Value::String(y)) => x >= y || x.to_lowercase() >= y.to_lowercase(),
        _ => true,
    }
}

pub struct SelectRestrictsProperties;

#[async_trait]
impl Rule for SelectRestrictsProperties {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Select.1006",
            description: "$select limits the returned structural properties to the selected ones.",
            spec_section: "OData URL Conventions 5.1.3",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let url = target.query(&[("$select", target.key.as_str()), ("$top", "3")]);
        let items = probe!(target.fetch_entities(http, &url).await?);

        let mut failures = Vec::new();
        for (idx, entity) in items.iter().enumerate() {
            let Some(object) = entity.as_object() else {
                failures.push(format!("value[{}] is not an object", idx));
                continue;
            };
            for member in object.keys().filter(|k| !is_annotation(k) && **k != target.key) {
                failures.push(format!("value[{}] contains unselected property '{}'", idx, member));
            }
        }
        Ok(Verdict::from_failures(failures))
    }
}

pub struct EntityByKey;

#[async_trait]
impl Rule for EntityByKey {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.EntityByKey.1007",
            description: "Addressing an entity by its key returns that entity.",
            spec_section: "OData URL Conventions 4.3.1",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let Some(entity) = probe!(target.first_entity(http).await?) else {
            return Ok(Verdict::not_applicable(format!("{} is empty", target.set)));
        };
        let Some(key) = target.key_of(&entity) else {
            return Ok(Verdict::not_applicable("entity carries no key value"));
        };
        let Some(literal) = target.literal(key) else {
            return Ok(Verdict::not_applicable(format!("key value {} cannot be formatted", key)));
        };

        let url = target.entity_url(&literal)?;
        let response = http.get_json(url.as_str()).await?;
        if !response.is_success() {
            return Ok(Verdict::fail(format!("GET {} returned status {}", url, response.status)));
        }

        match response.json() {
            Ok(json) if target.key_of(&json) == Some(key) => Ok(Verdict::pass()),
            Ok(json) => Ok(Verdict::fail(format!(
                "GET {} returned key {:?}, expected {}",
                url,
                target.key_of(&json),
                key
            ))),
            Err(_) => Ok(Verdict::fail(format!("GET {} did not return JSON", url))),
        }
    }
}

pub struct MetadataAvailable;

#[async_trait]
impl Rule for MetadataAvailable {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Metadata.1008",
            description: "The service exposes a metadata document at <service root>/$metadata.",
            spec_section: "OData Protocol 11.1.2",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let url = ctx.metadata_url()?;
        let response = http.get_with_accept(url.as_str(), "application/xml").await?;
        if response.status != 200 {
            return Ok(Verdict::fail(format!("GET {} returned status {}", url, response.status)));
        }

        match XmlElement::parse(&response.body) {
            Ok(root) if root.local_name == "Edmx" => Ok(Verdict::pass()),
            Ok(root) => Ok(Verdict::fail(format!("{} root element is <{}>", url, root.name))),
            Err(e) => Ok(Verdict::fail(format!("{} is not well-formed XML: {}", url, e))),
        }
    }
}

pub struct MissingEntityIsNotFound;

#[async_trait]
impl Rule for MissingEntityIsNotFound {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.NotFound.1009",
            description: "Requesting an entity that does not exist returns 404 Not Found.",
            spec_section: "OData Protocol 11.2",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Should,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let key = probe!(target.unused_key(http).await?);
        let Some(literal) = target.literal(&key) else {
            return Ok(Verdict::not_applicable(format!("key value {} cannot be formatted", key)));
        };

        let url = target.entity_url(&literal)?;
        let response = http.get_json(url.as_str()).await?;
        if response.status == 404 {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!("GET {} returned status {}, expected 404", url, response.status)))
        }
    }
}

pub struct InsertAndDelete;

#[async_trait]
impl Rule for InsertAndDelete {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "ServiceImpl.Insert.1010",
            description: "POST to an entity set creates an entity that can then be deleted.",
            spec_section: "OData Protocol 11.4.2",
            category: RuleCategory::ServiceImpl,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: SERVICE_DOCUMENT,
            formats: &[],
            requires_metadata: true,
            mutating: true,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict> {
        let target = target!(ctx);
        let Some(template) = probe!(target.first_entity(http).await?) else {
            return Ok(Verdict::not_applicable(format!("{} has no entity to copy", target.set)));
        };
        let Some(template) = template.as_object() else {
            return Ok(Verdict::fail("entity is not a JSON object"));
        };

        let key = probe!(target.unused_key(http).await?);
        let Some(literal) = target.literal(&key) else {
            return Ok(Verdict::not_applicable(format!("key value {} cannot be formatted", key)));
        };

        let mut body: serde_json::Map<String, Value> = template
            .iter()
            .filter(|(name, _)| !is_annotation(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        body.insert(target.key.clone(), key);

        let created = http.post_json(target.url.as_str(), &Value::Object(body)).await?;
        if !matches!(created.status, 201 | 204) {
            return Ok(Verdict::fail(format!(
                "POST {} returned status {}, expected 201 or 204",
                target.url, created.status
            )));
        }

        let url = match created_entity_url(&target, &created)? {
            Some(url) => url,
            // 204 且沒有 Location 時只能使用送出的 key
            None => target.entity_url(&literal)?,
        };
        let deleted = http.delete(url.as_str()).await?;
        if deleted.is_success() {
            Ok(Verdict::pass())
        } else {
            tracing::warn!("⚠️ Inserted entity {} could not be deleted", url);
            Ok(Verdict::fail(format!(
                "DELETE {} returned status {}; the inserted entity was left behind",
                url, deleted.status
            )))
        }
    }
}

/// 服務實際建立的 entity：Location / OData-EntityId header，或 201 回應內容的 key
fn created_entity_url(target: &Target, created: &HttpResponse) -> Result<Option<Url>> {
    let header = created
        .header("location")
        .or_else(|| created.header("odata-entityid"));
    if let Some(location) = header {
        return Ok(Some(target.url.join(location.trim())?));
    }

    if created.status == 201 {
        let literal = created
            .json()
            .ok()
            .and_then(|json| target.key_of(&json).and_then(|key| target.literal(key)));
        if let Some(literal) = literal {
            return Ok(Some(target.entity_url(&literal)?));
        }
    }
    Ok(None)
}
