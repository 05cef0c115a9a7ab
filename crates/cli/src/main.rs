//! Citewatch CLI - operator commands against the daemon's control surface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9537";
const CONTROL_METHOD: &str = "control.v1";

#[derive(Parser)]
#[command(name = "citewatch")]
#[command(about = "Citewatch crawler CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "CITEWATCH_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show agent state, queue counts and sessions
    Status,

    /// Switch to active mode (polling and dispatch)
    Start,

    /// Switch to idle mode
    Stop,

    /// Check that the daemon is up
    Ping,

    /// Ask whether the browser profile is logged in to a target
    CheckLogin {
        /// Target id (e.g., perplexity)
        target: String,
    },

    /// Extract the answer and citations currently shown for a target
    Capture {
        /// Target id (e.g., perplexity)
        target: String,
    },

    /// Run one query now
    Execute {
        /// Target id (e.g., perplexity)
        #[arg(short, long)]
        target: String,

        /// Query text to submit
        #[arg(short, long)]
        query: String,

        /// Task id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Tasks")]
    count: String,
}

#[derive(Tabled)]
struct CitationRow {
    #[tabled(rename = "#")]
    position: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "URL")]
    url: String,
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

/// Send one control message; returns the reply payload
async fn control(url: &str, kind: &str, payload: Option<Value>) -> Result<Value> {
    let mut envelope = json!({ "type": kind });
    if let Some(payload) = payload {
        envelope["payload"] = payload;
    }
    let reply = call_rpc(url, CONTROL_METHOD, envelope).await?;
    Ok(reply.get("payload").cloned().unwrap_or(Value::Null))
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn list(value: &Value) -> String {
    let items: Vec<String> = value
        .as_array()
        .map(|a| a.iter().map(text).collect())
        .unwrap_or_default();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn print_status(status: &Value) {
    let state = &status["state"];
    let mode = text(&state["mode"]);
    let mode = if mode == "active" {
        mode.green()
    } else {
        mode.yellow()
    };
    let auth = if state["isAuthenticated"].as_bool().unwrap_or(false) {
        "yes".green()
    } else {
        "no".red()
    };

    println!("  {} {}", "Mode:".bold(), mode);
    println!("  {} {}", "Authenticated:".bold(), auth);
    println!("  {} {}", "Polling:".bold(), text(&state["isPolling"]));
    println!("  {} {}", "Active task:".bold(), text(&state["activeTaskId"]));
    println!(
        "  {} {} completed, {} failed ({} today)",
        "Stats:".bold(),
        text(&state["stats"]["completed"]),
        text(&state["stats"]["failed"]),
        text(&state["stats"]["totalToday"])
    );
    if let Some(alert) = state.get("lastAlert").filter(|a| !a.is_null()) {
        println!(
            "  {} [{}] {}",
            "Alert:".red().bold(),
            text(&alert["targetId"]),
            text(&alert["message"])
        );
    }
    println!();

    let queue = &status["queue"];
    let rows: Vec<CountRow> = [
        ("pending", "pending"),
        ("running", "running"),
        ("completed", "completed"),
        ("failed", "failed"),
        ("outbox", "unsubmitted"),
    ]
    .iter()
    .map(|(label, key)| CountRow {
        state: label.to_string(),
        count: text(&queue[*key]),
    })
    .collect();
    println!("{}", Table::new(rows));
    println!();

    println!("  {} {}", "Busy sessions:".bold(), text(&status["busySessions"]));
    println!("  {} {}", "Active targets:".bold(), list(&status["activeTargets"]));
    println!("  {} {}", "Paused targets:".bold(), list(&status["pausedTargets"]));
    println!("  {} {}", "In flight:".bold(), list(&status["inFlight"]));
    println!("  {} {}", "Supported:".bold(), list(&status["supportedTargets"]));
}

fn print_capture(capture: &Value) {
    if !capture["success"].as_bool().unwrap_or(false) {
        println!(
            "  {} {}",
            "✗ Capture failed:".red().bold(),
            text(&capture["error"])
        );
        return;
    }
    println!("{}", text(&capture["responseText"]));
    println!();

    let rows: Vec<CitationRow> = capture["citations"]
        .as_array()
        .map(|citations| {
            citations
                .iter()
                .map(|c| CitationRow {
                    position: text(&c["position"]),
                    domain: text(&c["domain"]),
                    title: text(&c["title"]),
                    url: text(&c["url"]),
                })
                .collect()
        })
        .unwrap_or_default();
    if rows.is_empty() {
        println!("{}", "No citations".yellow());
    } else {
        println!("{}", Table::new(rows));
    }
}

async fn set_mode(url: &str, mode: &str) -> Result<()> {
    let reply = control(url, "STATUS_UPDATE", Some(json!({ "mode": mode }))).await?;
    println!(
        "{} {}",
        "✓ Mode set to".green().bold(),
        text(&reply["mode"]).bold()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let url = cli.rpc_url.as_str();

    match cli.command {
        Commands::Status => {
            println!("{}", "Citewatch Status".cyan().bold());
            println!();
            match control(url, "GET_STATUS", None).await {
                Ok(status) => {
                    println!("  {} {}", "RPC URL:".bold(), url);
                    println!("  {} {}", "Daemon:".bold(), "ONLINE".green());
                    print_status(&status);
                }
                Err(e) => {
                    println!("  {} {}", "Daemon:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }

        Commands::Start => set_mode(url, "active").await?,

        Commands::Stop => set_mode(url, "idle").await?,

        Commands::Ping => {
            let reply = control(url, "PING", None).await?;
            println!(
                "{} v{} ({})",
                "✓ Daemon is up".green().bold(),
                text(&reply["version"]),
                text(&reply["mode"])
            );
        }

        Commands::CheckLogin { target } => {
            let reply = control(url, "CHECK_LOGIN", Some(json!({ "targetId": target }))).await?;
            if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
                println!("  {} {}", "✗ Check failed:".red().bold(), text(error));
            } else if reply["loggedIn"].as_bool().unwrap_or(false) {
                println!("{} {}", "✓ Logged in to".green().bold(), target);
            } else {
                println!("{} {}", "✗ Not logged in to".yellow().bold(), target);
            }
        }

        Commands::Capture { target } => {
            println!("{}", format!("Capturing {}...", target).cyan().bold());
            println!();
            let reply = control(url, "CAPTURE_PAGE", Some(json!({ "targetId": target }))).await?;
            print_capture(&reply);
        }

        Commands::Execute { target, query, id } => {
            let mut payload = json!({ "targetId": target, "queryText": query });
            if let Some(id) = id {
                payload["id"] = json!(id);
            }
            let reply = control(url, "EXECUTE_TASK", Some(payload)).await?;

            let task_id = text(&reply["taskId"]);
            if !reply["added"].as_bool().unwrap_or(false) {
                println!("{} {}", "○ Already queued:".yellow().bold(), task_id);
            } else if reply["dispatched"].as_bool().unwrap_or(false) {
                println!("{} {}", "✓ Task started:".green().bold(), task_id);
            } else {
                println!(
                    "{} {} (waiting for a free session)",
                    "✓ Task queued:".green().bold(),
                    task_id
                );
            }
        }
    }

    Ok(())
}
