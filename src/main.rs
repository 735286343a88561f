use anyhow::Context;
use clap::Parser;
use odata_validator::core::catalog::RuleCatalog;
use odata_validator::core::http::HttpClient;
use odata_validator::core::ConfigProvider;
use odata_validator::domain::model::{JobOutcome, JobRecord, Outcome, RuleResult};
use odata_validator::domain::ports::{ResultProvider, Storage};
use odata_validator::utils::error::{ErrorSeverity, ValidatorError};
use odata_validator::utils::{logger, validation::Validate};
use odata_validator::{CliConfig, InMemoryResultProvider, LocalStorage, RuleEngine, ServiceContext};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose);

    tracing::info!("🚀 Starting odata-validator");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(2);
    }

    match run(&config).await {
        Ok(has_errors) => {
            if has_errors {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(e) => {
            let Some(e) = e.downcast_ref::<ValidatorError>() else {
                eprintln!("❌ {:#}", e);
                std::process::exit(3);
            };

            tracing::error!(
                "❌ Validation failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 系統層級錯誤回傳 3，其餘請求錯誤回傳 2
            let exit_code = match e.severity() {
                ErrorSeverity::Critical => 3,
                _ => 2,
            };
            std::process::exit(exit_code);
        }
    }
}

/// 回傳是否有規則失敗 (error 或 aborted)
async fn run(config: &CliConfig) -> anyhow::Result<bool> {
    let request = config.request()?;
    let http = HttpClient::new(config.http_config(), config.parsed_headers()?)?;

    let ctx = ServiceContext::build(&http, &request).await?;
    tracing::info!(
        payload_type = ?ctx.payload_type,
        version = %ctx.version,
        format = ?ctx.format,
        "📄 Payload classified"
    );

    let catalog = Arc::new(RuleCatalog::builtin()?);
    let engine = RuleEngine::new(catalog, config.rule_selection(), config.rule_timeout());
    let results = InMemoryResultProvider::new();

    let mut job = JobRecord::queued(request);
    job.mark_running();
    let summary = engine.validate(job.id, &ctx, &http, &results).await?;
    let rule_results = results.results(job.id).await?;

    print_results(&rule_results);
    println!(
        "\n📊 {} rules: {} success, {} error, {} warning, {} recommendation, {} not applicable, {} aborted",
        summary.total,
        summary.success,
        summary.error,
        summary.warning,
        summary.recommendation,
        summary.not_applicable,
        summary.aborted
    );

    let has_errors = summary.has_errors();
    job.mark_complete(JobOutcome {
        payload_type: ctx.payload_type,
        version: ctx.version,
        summary,
    });

    if let Some(output_path) = &config.output_path {
        let archive = odata_validator::results::build_report_archive(&job, &rule_results)?;
        let storage = LocalStorage::new(output_path.as_str());
        let file_name = format!("odata-validation-{}.zip", job.id);
        storage
            .write_file(&file_name, &archive)
            .await
            .with_context(|| format!("writing report to {}", output_path))?;

        tracing::info!("📁 Report saved to: {}", storage.full_path(&file_name).display());
        println!("📁 Report saved to: {}", storage.full_path(&file_name).display());
    }

    Ok(has_errors)
}

fn print_results(results: &[RuleResult]) {
    for result in results {
        let marker = match result.outcome {
            Outcome::Success => "✅",
            Outcome::Error | Outcome::Aborted => "❌",
            Outcome::Warning => "⚠️",
            Outcome::Recommendation => "💡",
            Outcome::NotApplicable => "➖",
        };
        println!("{} {:<32} {}", marker, result.rule_name, result.outcome.as_str());
        for detail in &result.details {
            println!("      {}", detail);
        }
    }
}
