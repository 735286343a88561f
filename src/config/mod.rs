pub mod cli;
pub mod toml_config;

use crate::core::catalog::RuleSelection;
use crate::core::http::HttpConfig;
use crate::core::ConfigProvider;
use crate::domain::model::{RequestedFormat, ValidationRequest};
use crate::utils::error::{Result, ValidatorError};
use crate::utils::validation::{self, Validate};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "odata-validator")]
#[command(about = "Validate an OData service against the OData protocol rules")]
pub struct CliConfig {
    /// 要驗證的 OData URI (service root、entity set、entity…)
    #[arg(long)]
    pub uri: String,

    #[arg(long, default_value = "any", help = "json, atom, xml or any")]
    pub format: RequestedFormat,

    /// 額外的 request header，格式為 "Name: value"
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    #[arg(long, value_delimiter = ',', help = "Only run rules whose name starts with one of these prefixes")]
    pub include: Vec<String>,

    #[arg(long, value_delimiter = ',', help = "Skip rules whose name starts with one of these prefixes")]
    pub exclude: Vec<String>,

    #[arg(long, help = "Allow rules that create and delete entities")]
    pub allow_mutations: bool,

    #[arg(long, default_value = "30")]
    pub timeout_seconds: u64,

    #[arg(long, default_value = "60")]
    pub rule_timeout_seconds: u64,

    /// 報告 ZIP 的輸出目錄
    #[arg(long)]
    pub output_path: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    /// 解析 `-H "Name: value"`
    pub fn parsed_headers(&self) -> Result<Vec<(String, String)>> {
        self.headers
            .iter()
            .map(|raw| {
                let (name, value) =
                    raw.split_once(':')
                        .ok_or_else(|| ValidatorError::InvalidConfigValueError {
                            field: "header".to_string(),
                            value: raw.clone(),
                            reason: "Expected 'Name: value'".to_string(),
                        })?;
                Ok((name.trim().to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn request(&self) -> Result<ValidationRequest> {
        let mut request = ValidationRequest::new(self.uri.clone()).with_format(self.format);
        for (name, value) in self.parsed_headers()? {
            request = request.with_header(name, value);
        }
        Ok(request)
    }
}

impl ConfigProvider for CliConfig {
    fn http_config(&self) -> HttpConfig {
        HttpConfig {
            timeout_seconds: self.timeout_seconds,
            ..HttpConfig::default()
        }
    }

    fn rule_selection(&self) -> RuleSelection {
        RuleSelection {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            allow_mutations: self.allow_mutations,
            requested: Vec::new(),
        }
    }

    fn rule_timeout(&self) -> Duration {
        Duration::from_secs(self.rule_timeout_seconds)
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("uri", &self.uri)?;
        for (name, _) in self.parsed_headers()? {
            validation::validate_header_name("header", &name)?;
        }
        validation::validate_range("timeout_seconds", self.timeout_seconds, 1, 3600)?;
        validation::validate_range("rule_timeout_seconds", self.rule_timeout_seconds, 1, 3600)?;
        if let Some(path) = &self.output_path {
            validation::validate_path("output_path", path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliConfig {
        let mut argv = vec!["odata-validator"];
        argv.extend_from_slice(args);
        CliConfig::parse_from(argv)
    }

    #[test]
    fn test_cli_parses_headers_and_selection() {
        let config = parse(&[
            "--uri",
            "http://host/svc/",
            "--format",
            "json",
            "-H",
            "Authorization: Bearer abc:def",
            "--include",
            "Feed.,Entry.",
            "--allow-mutations",
        ]);

        assert_eq!(config.format, RequestedFormat::Json);
        assert!(config.validate().is_ok());

        let request = config.request().unwrap();
        assert_eq!(request.headers["Authorization"], "Bearer abc:def");

        let selection = config.rule_selection();
        assert_eq!(selection.include, vec!["Feed.", "Entry."]);
        assert!(selection.allow_mutations);
        assert_eq!(config.rule_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_cli_validation_failures() {
        let config = parse(&["--uri", "ftp://host/svc/"]);
        assert!(config.validate().is_err());

        let config = parse(&["--uri", "http://host/svc/", "-H", "no-colon"]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidatorError::InvalidConfigValueError { field, .. } if field == "header"));

        let config = parse(&["--uri", "http://host/svc/", "--timeout-seconds", "0"]);
        assert!(config.validate().is_err());
    }
}
