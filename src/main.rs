//! Wayfarer - 行程规划智能体
//!
//! 用法：`wayfarer <request.json|request.toml> [--config <path>] [--events]`（`--help` 查看全部参数）
//! 行程 JSON 输出到 stdout，日志与过程事件输出到 stderr；Ctrl+C 取消本次规划。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio::sync::mpsc;
use wayfarer::budget::CategoryWeights;
use wayfarer::config::load_config;
use wayfarer::core::{PlannerBuilder, ShutdownManager};
use wayfarer::observability;
use wayfarer::trip::TravelRequest;

/// 请求文件：行程请求 + 可选的类别权重
#[derive(Debug, Deserialize)]
struct RequestFile {
    #[serde(flatten)]
    request: TravelRequest,
    #[serde(default)]
    weights: Option<CategoryWeights>,
}

fn read_request(path: &Path) -> anyhow::Result<RequestFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text).context("Invalid TOML request")?,
        _ => serde_json::from_str(&text).context("Invalid JSON request")?,
    };
    Ok(parsed)
}

/// 行程规划命令行
#[derive(Debug, Parser)]
#[command(name = "wayfarer", version, about = "Plan a costed multi-day itinerary with an LLM")]
struct Args {
    /// 行程请求文件（.json 或 .toml）
    request: PathBuf,

    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 将规划过程事件以 JSON 行输出到 stderr
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Args::parse();
    let file = read_request(&args.request)?;
    let cfg = load_config(args.config).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let mut builder = PlannerBuilder::new(cfg).with_cancel_token(shutdown.token());
    if args.events {
        let (tx, mut rx) = mpsc::unbounded_channel();
        builder = builder.with_event_tx(tx);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&ev) {
                    eprintln!("{}", line);
                }
            }
        });
    }
    let planner = builder.build();

    let result = planner.plan(&file.request, file.weights.as_ref()).await;
    if let Err(e) = planner.close() {
        tracing::warn!(error = %e, "cache close failed");
    }

    let itinerary = result.context("Planning failed")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&itinerary).context("Failed to encode itinerary")?
    );
    Ok(())
}
