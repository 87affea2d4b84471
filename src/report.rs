//! Estimation reports.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use chrono::Utc;
use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::gmm::GmmResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub generated_at: String,
    pub panel_path: String,
    pub panel_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationReport {
    pub metadata: ReportMetadata,
    pub result: GmmResult,
}

impl EstimationReport {
    pub fn new(result: GmmResult, panel_path: &Path, panel_rows: usize) -> Self {
        Self {
            metadata: ReportMetadata {
                generated_at: Utc::now().to_rfc3339(),
                panel_path: panel_path.display().to_string(),
                panel_rows,
            },
            result,
        }
    }
}

/// Generate JSON report
pub fn generate_json_report(report: &EstimationReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Human-readable coefficient table and diagnostics
pub fn text_report(report: &EstimationReport) -> String {
    let r = &report.result;
    let mut lines: Vec<String> = Vec::new();

    let title = if r.config.system { "SYSTEM GMM" } else { "ARELLANO-BOND GMM" };
    lines.push("=".repeat(72));
    lines.push(format!("{:^72}", format!("{} ESTIMATES FOR {}", title, r.dependent)));
    lines.push("=".repeat(72));
    lines.push(String::new());

    lines.push(format!("Generated: {}", report.metadata.generated_at));
    lines.push(format!("Panel: {} ({} rows)", report.metadata.panel_path, report.metadata.panel_rows));
    let by_equation: Vec<String> = r
        .rows_by_equation
        .iter()
        .map(|(kind, n)| format!("{} {}", n, kind))
        .collect();
    lines.push(format!("Observations: {} ({})", r.n_obs, by_equation.join(", ")));
    lines.push(format!("Clusters: {}", r.n_clusters));
    lines.push(format!("Instruments: {}", r.n_instruments));
    lines.push(format!("Lags: {}, max instrument lags: {}", r.config.lags, r.config.iv_max_lags));
    lines.push(String::new());

    lines.push(format!("{:<24} {:>12} {:>12} {:>10} {:>10}", "", "coef", "std err", "z", "P>|z|"));
    lines.push("-".repeat(72));
    for i in 0..r.names.len() {
        lines.push(format!(
            "{:<24} {:>12.6} {:>12.6} {:>10.3} {:>10.4}",
            r.names[i], r.coefficients[i], r.std_errors[i], r.z_stats[i], r.p_values[i]
        ));
    }
    lines.push("-".repeat(72));
    lines.push(format!(
        "Hansen J: {:.4} (df {}, p = {:.4})",
        r.hansen_j, r.hansen_df, r.hansen_p_value
    ));
    if !r.dropped_units.is_empty() {
        lines.push(format!(
            "Units without a complete row: {} ({})",
            r.dropped_units.len(),
            r.dropped_units.join(", ")
        ));
    }
    if r.weight_fallback {
        lines.push("Warning: the weight matrix was pseudo-inverted".to_string());
    }

    lines.join("\n")
}

/// Generate human-readable text report
pub fn generate_text_report(report: &EstimationReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, text_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}
