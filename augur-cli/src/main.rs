//! augur-cli — terminal view of per-response predictions
//!
//! Calls the Augur HTTP API and renders the prediction table that the web
//! front end shows: response, user, predicted outcome, confidence.
//!
//! # Subcommands
//! - `predictions <form_id> [--json]` — predictions for every response of a form
//! - `status`                          — show server health

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8780";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "augur-cli", version, about = "Augur prediction table CLI")]
struct Cli {
    /// Augur HTTP server URL (overrides AUGUR_HTTP_URL env var)
    #[arg(long, env = "AUGUR_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show predictions for every response of a form
    Predictions {
        /// Form identifier (UUID)
        form_id: String,

        /// Print the raw JSON array instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show Augur server status
    Status,
}

// ============================================================================
// API Response Types
// ============================================================================

/// One row of `GET /forms/:form_id/predictions`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRow {
    pub response_id: String,
    pub user_id: Option<String>,
    pub prediction: serde_json::Value,
    pub confidence: serde_json::Value,
    #[serde(default)]
    pub raw_data: serde_json::Value,
}

// ============================================================================
// Table rendering
// ============================================================================

const HEADERS: [&str; 4] = ["Response ID", "User ID", "Predicted Outcome", "Confidence"];

/// Strings print bare; anything else prints as JSON.
fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "N/A".to_string(),
        other => other.to_string(),
    }
}

/// Render rows as a fixed-width text table.
pub fn render_table(rows: &[PredictionRow]) -> String {
    let cells: Vec<[String; 4]> = rows
        .iter()
        .map(|r| {
            [
                r.response_id.clone(),
                r.user_id.clone().unwrap_or_else(|| "N/A".to_string()),
                display_value(&r.prediction),
                display_value(&r.confidence),
            ]
        })
        .collect();

    let mut widths: [usize; 4] = HEADERS.map(|h| h.chars().count());
    for row in &cells {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let format_line = |values: [&str; 4]| -> String {
        values
            .iter()
            .zip(widths.iter())
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&format_line(HEADERS));
    out.push('\n');
    out.push_str(&format_line(widths.map(|w| "-".repeat(w)).each_ref().map(String::as_str)));
    out.push('\n');
    for row in &cells {
        out.push_str(&format_line(row.each_ref().map(String::as_str)));
        out.push('\n');
    }
    out
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn do_predictions(server: &str, form_id: &str, json_output: bool) -> anyhow::Result<()> {
    // Batches call the predictor once per response; allow for slow forms.
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let url = format!("{}/forms/{}/predictions", server, form_id);
    let resp = match client.get(&url).send() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("augur-cli: connection failed to {}: {}", url, e);
            std::process::exit(1);
        }
    };

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("augur-cli: form {} not found", form_id);
        std::process::exit(1);
    }

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        eprintln!("augur-cli: server returned {}: {}", status, body);
        std::process::exit(1);
    }

    let rows: Vec<PredictionRow> = match resp.json() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("augur-cli: failed to parse predictions: {}", e);
            std::process::exit(1);
        }
    };

    if json_output {
        let raw: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "responseId": r.response_id,
                    "userId": r.user_id,
                    "prediction": r.prediction,
                    "confidence": r.confidence,
                    "rawData": r.raw_data,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&raw)?);
    } else if rows.is_empty() {
        eprintln!("No predictions to display.");
    } else {
        print!("{}", render_table(&rows));
    }

    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Augur server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Store:        {}", body["store"].as_str().unwrap_or("?"));
            println!("Detail:       {}", body["detail"].as_str().unwrap_or("?"));
            println!("Predictor:    {}", body["predictor"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("augur-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("augur-cli: cannot reach {} — {}", url, e);
            std::process::exit(1);
        }
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match cli.command {
        Commands::Predictions { form_id, json } => do_predictions(&server, form_id.trim(), json),
        Commands::Status => do_status(&server),
    };

    if let Err(e) = result {
        eprintln!("augur-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
