//! physio-cli: operator client for the Physio session pipeline HTTP API
//!
//! # Subcommands
//! - `status`                                      show server health
//! - `predict <file> [--json]`                     run a sensor file through the prediction service
//! - `sessions <patient> [--json]`                 list a patient's sessions, newest first
//! - `insights <patient> [--json]`                 show derived insights for a patient
//! - `report <patient> [-o <path>]`                download the patient progress report
//! - `report --session <id> [-o <path>]`           download a report named after a session

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Deserialize;

const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "physio-cli", version, about = "Physio session pipeline CLI")]
struct Cli {
    /// Physio HTTP server URL (overrides PHYSIO_HTTP_URL env var)
    #[arg(long, env = "PHYSIO_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// User id forwarded as the x-user-id header
    #[arg(long, env = "PHYSIO_USER_ID")]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show server status
    Status,

    /// Send a sensor recording (.csv, .xlsx, .xls) to the prediction service
    Predict {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// List a patient's sessions
    Sessions {
        patient: String,

        #[arg(long)]
        json: bool,
    },

    /// Show derived insights for a patient
    Insights {
        patient: String,

        #[arg(long)]
        json: bool,
    },

    /// Download a PDF report
    Report {
        /// Patient id (omit when using --session)
        #[arg(required_unless_present = "session")]
        patient: Option<String>,

        /// Build the report from a session id instead
        #[arg(long, conflicts_with = "patient")]
        session: Option<String>,

        /// Output path (defaults to the server-provided file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    pub predicted_classes: Vec<f64>,
    pub pain_level: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightView {
    pub pain_reduction: Option<f64>,
    pub improvement_rate: Option<f64>,
    pub initial_pain_level: Option<f64>,
    pub current_pain_level: Option<f64>,
    pub recovery_progress: Option<f64>,
    pub mobility_trend: String,
    pub total_sessions: usize,
    pub last_session_date: Option<String>,
    pub next_appointment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub session_code: String,
    pub session_type: String,
    pub session_date: String,
    pub pain_level: f64,
    pub predicted_pain_level: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionView>,
}

// ============================================================================
// Formatting
// ============================================================================

fn or_na<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

/// Human-readable insight summary.
pub fn format_insights(patient: &str, view: &InsightView) -> String {
    let mut out = format!("Patient {}\n", patient);
    out.push_str(&format!("Sessions:          {}\n", view.total_sessions));
    out.push_str(&format!(
        "Pain (first/now):  {} -> {}\n",
        or_na(view.initial_pain_level),
        or_na(view.current_pain_level)
    ));
    if let Some(reduction) = view.pain_reduction.filter(|r| *r > 0.0) {
        out.push_str(&format!(
            "Pain reduction:    {} points ({}%)\n",
            reduction,
            or_na(view.improvement_rate)
        ));
    }
    out.push_str(&format!("Recovery:          {}%\n", or_na(view.recovery_progress)));
    out.push_str(&format!("Mobility trend:    {}\n", view.mobility_trend));
    out.push_str(&format!("Last session:      {}\n", or_na(view.last_session_date.as_deref())));
    out.push_str(&format!("Next appointment:  {}", or_na(view.next_appointment.as_deref())));
    out
}

/// File name from a `Content-Disposition: attachment; filename="..."` header.
pub fn disposition_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').to_string())
        .filter(|name| !name.is_empty() && !name.contains(['/', '\\']))
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    client: reqwest::blocking::Client,
    server: String,
    user: Option<String>,
}

impl Api {
    fn new(server: &str, user: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            server: server.trim_end_matches('/').to_string(),
            user,
        })
    }

    fn get(&self, segments: &[&str], query: &[(&str, &str)]) -> anyhow::Result<reqwest::blocking::Response> {
        let mut req = self.client.get(endpoint(&self.server, segments, query)?);
        if let Some(user) = &self.user {
            req = req.header("x-user-id", user);
        }
        checked(req.send()?)
    }
}

/// Server URL with percent-encoded path segments and query pairs appended.
pub fn endpoint(server: &str, segments: &[&str], query: &[(&str, &str)]) -> anyhow::Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(server)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("server URL cannot take a path: {}", server))?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Local fallback file name built from a user-supplied id.
fn local_file_name(prefix: &str, id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}.pdf", prefix, id)
}

fn checked(resp: reqwest::blocking::Response) -> anyhow::Result<reqwest::blocking::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body: serde_json::Value = resp.json().unwrap_or_default();
    let message = body["error"].as_str().unwrap_or("no error message");
    anyhow::bail!("server returned {}: {}", status, message)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn do_status(api: &Api) -> anyhow::Result<()> {
    let body: serde_json::Value = api.get(&["health"], &[])?.json()?;
    println!("Physio server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:       {}", body["version"].as_str().unwrap_or("?"));
    println!("Storage:       {}", body["storage"].as_str().unwrap_or("?"));
    println!("Database:      {}", body["database"].as_str().unwrap_or("?"));
    println!("Predictor:     {}", body["predictor"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_predict(api: &Api, file: &Path, json_output: bool) -> anyhow::Result<()> {
    let form = reqwest::blocking::multipart::Form::new().file("file", file)?;
    let resp = checked(
        api.client
            .post(endpoint(&api.server, &["api", "predict"], &[])?)
            .multipart(form)
            .send()?,
    )?;

    let body: serde_json::Value = resp.json()?;
    if json_output {
        return print_json(&body);
    }
    let prediction: PredictResponse = serde_json::from_value(body)?;
    println!("Predicted pain level: {}", prediction.pain_level);
    println!("Windows analysed:     {}", prediction.predicted_classes.len());
    Ok(())
}

fn do_sessions(api: &Api, patient: &str, json_output: bool) -> anyhow::Result<()> {
    let body: serde_json::Value = api.get(&["api", "sessions"], &[("patient", patient)])?.json()?;
    if json_output {
        return print_json(&body);
    }
    let list: SessionList = serde_json::from_value(body)?;
    if list.count == 0 {
        eprintln!("No sessions recorded for {}", patient);
        return Ok(());
    }
    for s in &list.sessions {
        let date: String = s.session_date.chars().take(10).collect();
        println!(
            "{}  {:<20} pain {:<4} predicted {:<4} {} ({})",
            date,
            s.session_type,
            s.pain_level,
            or_na(s.predicted_pain_level),
            s.session_code,
            s.id
        );
    }
    Ok(())
}

fn do_insights(api: &Api, patient: &str, json_output: bool) -> anyhow::Result<()> {
    let body: serde_json::Value = api
        .get(&["api", "patients", patient, "insights"], &[])?
        .json()?;
    if json_output {
        return print_json(&body);
    }
    let view: InsightView = serde_json::from_value(body)?;
    println!("{}", format_insights(patient, &view));
    Ok(())
}

fn do_report(
    api: &Api,
    patient: Option<&str>,
    session: Option<&str>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (segments, fallback) = match (session, patient) {
        (Some(id), _) => (
            vec!["api", "generate-report", id],
            local_file_name("session_report", id),
        ),
        (None, Some(patient)) => (
            vec!["api", "patients", patient, "report"],
            local_file_name("patient_report", patient),
        ),
        (None, None) => anyhow::bail!("either a patient id or --session is required"),
    };

    let resp = api.get(&segments, &[])?;
    let server_name = resp
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name);
    let bytes = resp.bytes()?;

    let target = output.unwrap_or_else(|| PathBuf::from(server_name.unwrap_or(fallback)));
    std::fs::write(&target, &bytes)?;
    println!("Saved {} ({} bytes)", target.display(), bytes.len());
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let result = Api::new(&cli.server, cli.user.clone()).and_then(|api| match cli.command {
        Commands::Status => do_status(&api),
        Commands::Predict { file, json } => do_predict(&api, &file, json),
        Commands::Sessions { patient, json } => do_sessions(&api, &patient, json),
        Commands::Insights { patient, json } => do_insights(&api, &patient, json),
        Commands::Report {
            patient,
            session,
            output,
        } => do_report(&api, patient.as_deref(), session.as_deref(), output),
    });

    if let Err(e) = result {
        eprintln!("physio-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
