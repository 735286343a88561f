use crate::domain::model::{JobRecord, JobSummary, RuleResult};
use crate::utils::error::{Result, ValidatorError};
use serde::Serialize;
use std::io::Write;
use zip::write::{FileOptions, ZipWriter};

const CSV_HEADER: [&str; 8] = [
    "rule_name",
    "outcome",
    "requirement_level",
    "category",
    "spec_section",
    "duration_ms",
    "target_uri",
    "details",
];

#[derive(Serialize)]
struct ReportSummary<'a> {
    job: &'a JobRecord,
    summary: JobSummary,
}

fn results_csv(results: &[RuleResult]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for result in results {
        let level = serde_json::to_value(result.requirement_level)?;
        let category = serde_json::to_value(result.category)?;
        let duration = result.duration_ms.to_string();
        let details = result.details.join(" | ");
        writer.write_record([
            result.rule_name.as_str(),
            result.outcome.as_str(),
            level.as_str().unwrap_or_default(),
            category.as_str().unwrap_or_default(),
            result.spec_section.as_str(),
            duration.as_str(),
            result.target_uri.as_str(),
            details.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ValidatorError::IoError(e.into_error()))
}

/// 打包 job 報告：results.csv、results.json 與 summary.json
pub fn build_report_archive(job: &JobRecord, results: &[RuleResult]) -> Result<Vec<u8>> {
    let csv_data = results_csv(results)?;
    let json_data = serde_json::to_vec_pretty(results)?;
    let summary = ReportSummary {
        job,
        summary: JobSummary::from_results(results),
    };
    let summary_data = serde_json::to_vec_pretty(&summary)?;

    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    zip.start_file::<_, ()>("results.csv", FileOptions::default())?;
    zip.write_all(&csv_data)?;

    zip.start_file::<_, ()>("results.json", FileOptions::default())?;
    zip.write_all(&json_data)?;

    zip.start_file::<_, ()>("summary.json", FileOptions::default())?;
    zip.write_all(&summary_data)?;

    let cursor = zip.finish()?;
    let data = cursor.into_inner();
    tracing::debug!(job_id = %job.id, bytes = data.len(), "📁 Report archive built");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Outcome, RequirementLevel, RuleCategory, ValidationRequest};
    use std::io::Read;

    fn result(name: &str, outcome: Outcome, details: &[&str]) -> RuleResult {
        RuleResult {
            rule_name: name.to_string(),
            spec_section: "OData JSON Format 4.5.6".to_string(),
            requirement_level: RequirementLevel::Should,
            category: RuleCategory::Core,
            outcome,
            description: "count, as integer".to_string(),
            details: details.iter().map(|d| d.to_string()).collect(),
            target_uri: "http://host/svc/Products".to_string(),
            duration_ms: 12,
        }
    }

    #[test]
    fn test_archive_contains_csv_json_and_summary() {
        let job = JobRecord::queued(ValidationRequest::new("http://host/svc/Products"));
        let results = vec![
            result("Feed.Core.2001", Outcome::Success, &[]),
            result("Feed.Core.2003", Outcome::Warning, &["count is -1", "count, again"]),
        ];

        let data = build_report_archive(&job, &results).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).unwrap();

        let mut file_names: Vec<&str> = archive.file_names().collect();
        file_names.sort();
        assert_eq!(file_names, vec!["results.csv", "results.json", "summary.json"]);

        let mut csv_text = String::new();
        archive
            .by_name("results.csv")
            .unwrap()
            .read_to_string(&mut csv_text)
            .unwrap();
        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][0], "Feed.Core.2003");
        assert_eq!(&rows[1][1], "warning");
        assert_eq!(&rows[1][2], "should");
        assert_eq!(&rows[1][7], "count is -1 | count, again");

        let mut summary_text = String::new();
        archive
            .by_name("summary.json")
            .unwrap()
            .read_to_string(&mut summary_text)
            .unwrap();
        let summary: serde_json::Value = serde_json::from_str(&summary_text).unwrap();
        assert_eq!(summary["summary"]["total"], 2);
        assert_eq!(summary["summary"]["warning"], 1);
        assert_eq!(summary["job"]["id"], job.id.to_string());
    }
}
