//! Built-in conformance rules.
//!
//! Every rule is a unit struct implementing [`Rule`]: static [`RuleInfo`]
//! describing when it applies, plus an async `verify` that inspects the
//! [`ServiceContext`] and may issue further requests through the shared
//! [`HttpClient`].

pub mod common;
pub mod entity_reference;
pub mod entry;
pub mod error_payload;
pub mod feed;
pub mod metadata;
pub mod service_document;
pub mod service_impl;

use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType, RequirementLevel, RuleCategory};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use url::Url;

/// 規則的靜態描述，決定規則何時適用
#[derive(Debug, Serialize)]
pub struct RuleInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub spec_section: &'static str,
    pub category: RuleCategory,
    pub requirement_level: RequirementLevel,
    /// 空陣列代表所有版本
    pub versions: &'static [ODataVersion],
    pub payload_types: &'static [PayloadType],
    /// 空陣列代表所有格式
    pub formats: &'static [PayloadFormat],
    pub requires_metadata: bool,
    pub mutating: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Verdict {
    pub passed: Option<bool>,
    pub details: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: Some(true),
            details: Vec::new(),
        }
    }

    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: Some(false),
            details: vec![detail.into()],
        }
    }

    pub fn not_applicable(reason: impl Into<String>) -> Self {
        Self {
            passed: None,
            details: vec![reason.into()],
        }
    }

    pub fn from_failures(failures: Vec<String>) -> Self {
        if failures.is_empty() {
            Self::pass()
        } else {
            Self {
                passed: Some(false),
                details: failures,
            }
        }
    }
}

#[async_trait]
pub trait Rule: Send + Sync {
    fn info(&self) -> &'static RuleInfo;

    async fn verify(&self, ctx: &ServiceContext, http: &HttpClient) -> Result<Verdict>;

    fn name(&self) -> &'static str {
        self.info().name
    }
}

pub(crate) const ALL_PAYLOAD_TYPES: &[PayloadType] = &[
    PayloadType::ServiceDocument,
    PayloadType::Metadata,
    PayloadType::Feed,
    PayloadType::Entry,
    PayloadType::Property,
    PayloadType::RawValue,
    PayloadType::EntityReference,
    PayloadType::Error,
    PayloadType::Other,
];

/// 內建規則，依註冊順序執行
pub fn builtin_rules() -> Vec<Arc<dyn Rule>> {
    let mut rules: Vec<Arc<dyn Rule>> = Vec::new();
    rules.extend(common::rules());
    rules.extend(service_document::rules());
    rules.extend(metadata::rules());
    rules.extend(feed::rules());
    rules.extend(entry::rules());
    rules.extend(entity_reference::rules());
    rules.extend(error_payload::rules());
    rules.extend(service_impl::rules());
    rules
}

/// Absolute URI, or a relative reference resolvable against `base`, without whitespace.
pub(crate) fn is_well_formed_uri(value: &str, base: &Url) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }
    match Url::parse(value) {
        Ok(_) => true,
        Err(url::ParseError::RelativeUrlWithoutBase) => base.join(value).is_ok(),
        Err(_) => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_rule_names_are_unique() {
        let rules = builtin_rules();
        let names: HashSet<&str> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), rules.len());
        assert!(rules.len() >= 35);
    }

    #[test]
    fn test_well_formed_uri() {
        let base = Url::parse("http://host/svc/").unwrap();
        assert!(is_well_formed_uri("http://host/svc/Products(1)", &base));
        assert!(is_well_formed_uri("Products(1)", &base));
        assert!(!is_well_formed_uri("Products (1)", &base));
        assert!(!is_well_formed_uri("", &base));
        assert!(!is_well_formed_uri("http://[bad", &base));
    }
}
