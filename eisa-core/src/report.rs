// Load summaries for the terminal

use crate::pipeline::{LoadInfo, ResourceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

pub fn generate_load_report(info: &LoadInfo, format: ReportFormat) -> serde_json::Result<String> {
    match format {
        ReportFormat::Text => Ok(generate_text_report(info)),
        ReportFormat::Json => serde_json::to_string_pretty(info),
    }
}

fn generate_text_report(info: &LoadInfo) -> String {
    let elapsed = (info.finished_at - info.started_at).num_milliseconds() as f64 / 1000.0;

    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Pipeline: {}\n", info.pipeline_name));
    report.push_str(&format!("  Dataset: {}\n", info.dataset_name));
    report.push_str(&format!("  Destination: {}\n", info.destination.display()));
    report.push_str(&format!("  Load id: {}\n", info.load_id));
    report.push_str(&format!("  Status: {}\n", info.status.as_str()));
    report.push_str(&format!("  Records loaded: {}\n", info.total_records()));
    report.push_str(&format!("  Elapsed: {:.2}s\n", elapsed));
    if let Some(ref path) = info.schema_path {
        report.push_str(&format!("  Schema: {}\n", path.display()));
    }

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str(&format!("## Resources ({})\n", info.resources.len()));

    for resource in &info.resources {
        let line = match resource.status {
            ResourceStatus::Loaded => format!(
                "  \x1b[32m✓\x1b[0m {} ({} records)",
                resource.name, resource.records
            ),
            ResourceStatus::Truncated { ref reason } => format!(
                "  \x1b[33m⚠\x1b[0m {} ({} records, truncated: {})",
                resource.name, resource.records, reason
            ),
            ResourceStatus::Failed { ref reason } => {
                format!("  \x1b[31m✗\x1b[0m {} (failed: {})", resource.name, reason)
            }
        };
        report.push_str(&line);
        report.push('\n');
    }

    if !info.skipped.is_empty() {
        report.push_str(&format!("\n## Skipped ({})\n", info.skipped.len()));
        for skipped in &info.skipped {
            report.push_str(&format!(
                "  \x1b[90m-\x1b[0m {} ({})\n",
                skipped.name, skipped.reason
            ));
        }
    }

    report
}
