use crate::core::catalog::RuleSelection;
use crate::core::http::HttpConfig;
use crate::core::ConfigProvider;
use crate::utils::error::{Result, ValidatorError};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_WORKERS: usize = 4;
const DEFAULT_RULE_TIMEOUT_SECONDS: u64 = 60;

/// validator-server 的 TOML 設定，每個區段都可省略
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub queue: QueueConfig,
    pub http: HttpSection,
    pub rules: RulesConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: Option<usize>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpSection {
    pub timeout_seconds: Option<u64>,
    pub user_agent: Option<String>,
    pub max_response_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub allow_mutations: Option<bool>,
    pub rule_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 未設定時結果只保存在記憶體
    pub results_path: Option<String>,
}

impl ServerConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ValidatorError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ODATA_TOKEN})，未定義的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ValidatorError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn host(&self) -> &str {
        self.server.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let raw = format!("{}:{}", self.host(), self.port());
        raw.parse().map_err(|_| ValidatorError::InvalidConfigValueError {
            field: "server.host".to_string(),
            value: raw,
            reason: "Expected an IP address".to_string(),
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn workers(&self) -> usize {
        self.queue.workers.unwrap_or(DEFAULT_WORKERS)
    }

    pub fn results_path(&self) -> Option<&str> {
        self.storage.results_path.as_deref()
    }
}

impl ConfigProvider for ServerConfig {
    fn http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            timeout_seconds: self.http.timeout_seconds.unwrap_or(defaults.timeout_seconds),
            user_agent: self.http.user_agent.clone().unwrap_or(defaults.user_agent),
            max_response_bytes: self
                .http
                .max_response_bytes
                .unwrap_or(defaults.max_response_bytes),
        }
    }

    fn rule_selection(&self) -> RuleSelection {
        RuleSelection {
            include: self.rules.include.clone(),
            exclude: self.rules.exclude.clone(),
            allow_mutations: self.rules.allow_mutations.unwrap_or(false),
            requested: Vec::new(),
        }
    }

    fn rule_timeout(&self) -> Duration {
        Duration::from_secs(
            self.rules
                .rule_timeout_seconds
                .unwrap_or(DEFAULT_RULE_TIMEOUT_SECONDS),
        )
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        validation::validate_positive_number("queue.capacity", self.queue_capacity(), 1)?;
        validation::validate_range("queue.workers", self.workers(), 1, 256)?;

        let http = self.http_config();
        validation::validate_range("http.timeout_seconds", http.timeout_seconds, 1, 3600)?;
        validation::validate_non_empty_string("http.user_agent", &http.user_agent)?;
        validation::validate_positive_number("http.max_response_bytes", http.max_response_bytes, 1024)?;

        validation::validate_range("rules.rule_timeout_seconds", self.rule_timeout().as_secs(), 1, 3600)?;
        for prefix in self.rules.include.iter().chain(&self.rules.exclude) {
            validation::validate_non_empty_string("rules", prefix)?;
        }

        if let Some(path) = self.results_path() {
            validation::validate_path("storage.results_path", path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();

        assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.queue_capacity(), 32);
        assert_eq!(config.workers(), 4);
        assert!(config.results_path().is_none());
        assert_eq!(config.http_config(), HttpConfig::default());
        assert!(!config.rule_selection().allow_mutations);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml_content = r#"
[server]
host = "0.0.0.0"
port = 9000

[queue]
capacity = 4
workers = 2

[http]
timeout_seconds = 10
user_agent = "conformance-bot"

[rules]
include = ["Feed.", "ServiceImpl."]
exclude = ["ServiceImpl.Insert"]
allow_mutations = true
rule_timeout_seconds = 5

[storage]
results_path = "./results"
"#;

        let config = ServerConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.port(), 9000);
        assert_eq!(config.queue_capacity(), 4);
        assert_eq!(config.http_config().user_agent, "conformance-bot");
        assert_eq!(config.rule_selection().exclude, vec!["ServiceImpl.Insert"]);
        assert_eq!(config.rule_timeout(), Duration::from_secs(5));
        assert_eq!(config.results_path(), Some("./results"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("ODATA_VALIDATOR_TEST_RESULTS", "/tmp/odata-results");

        let toml_content = r#"
[storage]
results_path = "${ODATA_VALIDATOR_TEST_RESULTS}"
"#;

        let config = ServerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.results_path(), Some("/tmp/odata-results"));

        std::env::remove_var("ODATA_VALIDATOR_TEST_RESULTS");
    }

    #[test]
    fn test_config_validation() {
        let config = ServerConfig::from_toml_str("[queue]\nworkers = 0\n").unwrap();
        assert!(config.validate().is_err());

        let config = ServerConfig::from_toml_str("[server]\nhost = \"not a host\"\n").unwrap();
        assert!(config.validate().is_err());

        let err = ServerConfig::from_toml_str("[queue\ncapacity = 1").unwrap_err();
        assert!(matches!(err, ValidatorError::ConfigValidationError { field, .. } if field == "toml_parsing"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[queue]\ncapacity = 7\n").unwrap();

        let config = ServerConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.queue_capacity(), 7);
    }
}
