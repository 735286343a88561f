use crate::core::context::ServiceContext;
use crate::rules::{builtin_rules, Rule, RuleInfo};
use crate::utils::error::{Result, ValidatorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 依規則名稱前綴挑選要執行的規則
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSelection {
    /// 空陣列代表全部規則
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub allow_mutations: bool,
    /// 單一請求指定的前綴，與 `include` 取交集
    #[serde(skip)]
    pub requested: Vec<String>,
}

fn matches_any(prefixes: &[String], name: &str) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|p| name.starts_with(p.as_str()))
}

impl RuleSelection {
    pub fn allows(&self, info: &RuleInfo) -> bool {
        if info.mutating && !self.allow_mutations {
            return false;
        }
        let excluded = self.exclude.iter().any(|p| info.name.starts_with(p.as_str()));
        matches_any(&self.include, info.name) && matches_any(&self.requested, info.name) && !excluded
    }

    /// Narrows the selection further with per-request prefixes.
    pub fn restricted_to(&self, prefixes: &[String]) -> Self {
        Self {
            requested: prefixes.to_vec(),
            ..self.clone()
        }
    }
}

#[derive(Clone, Default)]
pub struct RuleCatalog {
    rules: Vec<Arc<dyn Rule>>,
}

impl std::fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCatalog")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog populated with every built-in rule.
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::new();
        for rule in builtin_rules() {
            catalog.register(rule)?;
        }
        tracing::debug!(rules = catalog.len(), "rule catalog loaded");
        Ok(catalog)
    }

    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<()> {
        if self.get(rule.name()).is_some() {
            return Err(ValidatorError::DuplicateRule {
                name: rule.name().to_string(),
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn descriptors(&self) -> Vec<&'static RuleInfo> {
        self.rules.iter().map(|r| r.info()).collect()
    }

    /// 依 payload 類型、格式、版本、metadata 與選擇條件過濾，保留註冊順序
    pub fn applicable(&self, ctx: &ServiceContext, selection: &RuleSelection) -> Vec<Arc<dyn Rule>> {
        self.rules
            .iter()
            .filter(|rule| is_applicable(rule.info(), ctx) && selection.allows(rule.info()))
            .cloned()
            .collect()
    }
}

fn is_applicable(info: &RuleInfo, ctx: &ServiceContext) -> bool {
    info.payload_types.contains(&ctx.payload_type)
        && (info.formats.is_empty() || info.formats.contains(&ctx.format))
        && (info.versions.is_empty() || info.versions.contains(&ctx.version))
        && (!info.requires_metadata || ctx.metadata.is_some())
}
