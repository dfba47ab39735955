//! Leveler CLI - load generator and status client for the Leveler daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};

const DEFAULT_CONSUMER_URL: &str = "http://127.0.0.1:3000";

#[derive(Parser)]
#[command(name = "leveler")]
#[command(about = "Leveler queue-based load leveling CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon RPC URL
    #[arg(long, env = "CONSUMER_URL", default_value = DEFAULT_CONSUMER_URL)]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy an image N times and submit the copies as one batch
    Upload {
        /// Image to copy
        #[arg(short, long)]
        image: PathBuf,

        /// Number of copies
        #[arg(short, long, default_value = "1")]
        copies: usize,

        /// Where the copies are written (the daemon must be able to read it)
        #[arg(long, default_value = "./uploads")]
        upload_dir: PathBuf,
    },

    /// Run one image through the pipeline without the queue
    Process {
        /// Image path
        path: PathBuf,
    },

    /// Look up the output of a queued job
    Status {
        /// Job ID returned by upload
        job_id: String,
    },

    /// Show queue, admission and consumer counters
    Stats,
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Deserialize, Tabled)]
#[serde(rename_all = "camelCase")]
struct QueuedRow {
    job_id: String,
    filename: String,
    priority: String,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
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

/// `scan.png`, copy 3 -> `scan-copy3.png`
fn copy_name(image: &Path, index: usize) -> Result<String> {
    let stem = image
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Not a file name: {}", image.display()))?;
    Ok(match image.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}-copy{}.{}", stem, index, ext),
        None => format!("{}-copy{}", stem, index),
    })
}

async fn write_copies(image: &Path, copies: usize, upload_dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
    let upload_dir = tokio::fs::canonicalize(upload_dir).await?;

    let mut paths = Vec::with_capacity(copies);
    for i in 0..copies {
        let target = upload_dir.join(copy_name(image, i)?);
        tokio::fs::copy(image, &target)
            .await
            .with_context(|| format!("Failed to copy {} to {}", image.display(), target.display()))?;
        paths.push(target);
    }
    Ok(paths)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            image,
            copies,
            upload_dir,
        } => {
            if copies == 0 {
                anyhow::bail!("--copies must be a positive number");
            }
            let paths = write_copies(&image, copies, &upload_dir).await?;
            let files: Vec<_> = paths.iter().map(|p| json!({ "path": p })).collect();

            let result = call_rpc(&cli.url, "upload.batch.v1", json!({ "files": files })).await?;

            let message = result["message"].as_str().unwrap_or_default();
            println!("{}", format!("✓ {}", message).green().bold());
            println!("  {} {}", "Batch size:".bold(), result["batchSize"]);
            println!();

            let rows: Vec<QueuedRow> = serde_json::from_value(result["files"].clone())?;
            println!("{}", Table::new(rows));

            if let Some(rejected) = result["rejected"].as_array() {
                println!();
                for r in rejected {
                    println!("  {} {} ({})", "✗".red(), r["filename"], r["reason"]);
                }
            }
        }

        Commands::Process { path } => {
            let path = tokio::fs::canonicalize(&path)
                .await
                .with_context(|| format!("Image not found: {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let result = call_rpc(
                &cli.url,
                "process.v1",
                json!({ "originalPath": path, "filename": filename }),
            )
            .await?;

            if result["success"].as_bool().unwrap_or(false) {
                println!("{}", "✓ Processed".green().bold());
                println!("  {} {}", "Output:".bold(), result["outputPath"]);
            } else {
                println!("{}", "✗ Processing failed".red().bold());
                println!("  {} {}", "Error:".bold(), result["error"]);
            }
        }

        Commands::Status { job_id } => {
            let result = call_rpc(&cli.url, "status.v1", json!({ "jobId": job_id })).await?;
            match result["outputPath"].as_str() {
                Some(output) => println!("{} {}", "done".green().bold(), output),
                None => println!("{}", "processing".yellow().bold()),
            }
        }

        Commands::Stats => {
            println!("{}", "System Status".cyan().bold());
            println!();

            match call_rpc(&cli.url, "admin.stats.v1", json!({})).await {
                Ok(stats) => {
                    println!("  {} {}", "URL:".bold(), cli.url);
                    println!("  {} {}", "Status:".bold(), "ONLINE".green());
                    println!("  {} {}", "Queue:".bold(), stats["queue"]);
                    println!();
                    println!("  {} {}", "Ready:".bold(), stats["depth"]["ready"]);
                    println!("  {} {}", "Unacked:".bold(), stats["depth"]["unacked"]);
                    println!(
                        "  {} {:.2} / {}",
                        "Tokens:".bold(),
                        stats["admission"]["tokens"].as_f64().unwrap_or(0.0),
                        stats["admission"]["capacity"]
                    );
                    println!();
                    let consumer = &stats["consumer"];
                    println!("  {} {}", "Delivered:".bold(), consumer["delivered"]);
                    println!("  {} {}", "Acked:".bold(), consumer["acked"]);
                    println!("  {} {}", "Requeued:".bold(), consumer["requeued"]);
                    println!("  {} {}", "Throttled:".bold(), consumer["throttled"]);
                    println!("  {} {}", "Dead-lettered:".bold(), consumer["deadLettered"]);
                    println!(
                        "  {} {} (peak {})",
                        "In flight:".bold(),
                        consumer["inFlight"],
                        consumer["peakInFlight"]
                    );
                    println!();
                    println!(
                        "  {} {} / {}",
                        "Direct active:".bold(),
                        stats["directActive"],
                        stats["directMaxConcurrent"]
                    );
                    println!("  {} {} seconds", "Uptime:".bold(), stats["uptimeSeconds"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "ERROR".red());
                    println!("  {} {}", "Error:".bold(), e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_names_follow_upload_script() {
        assert_eq!(copy_name(Path::new("/img/i-1.png"), 0).unwrap(), "i-1-copy0.png");
        assert_eq!(copy_name(Path::new("scan"), 2).unwrap(), "scan-copy2");
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from(["leveler", "upload", "--image", "a.png", "--copies", "20"])
            .unwrap();
        match cli.command {
            Commands::Upload { copies, image, .. } => {
                assert_eq!(copies, 20);
                assert_eq!(image, PathBuf::from("a.png"));
            }
            _ => panic!("expected upload"),
        }
    }
}
