//! Drone - 无界面运行一次任务
//!
//! 用法：drone [--config path.toml] <task...>
//! 事件以 JSON 行输出到 stdout，日志输出到 stderr。

use std::path::PathBuf;

use anyhow::{bail, Context};
use drone::{config::load_config, observability, AgentBuilder, TaskContext};
use futures_util::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1).peekable();
    let mut config_path: Option<PathBuf> = None;
    if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        config_path = Some(args.next().context("--config needs a path")?.into());
    }
    let task = args.collect::<Vec<_>>().join(" ");
    if task.trim().is_empty() {
        bail!("usage: drone [--config path.toml] <task>");
    }

    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.logging.level);

    let mut agent = AgentBuilder::from_app_config(&cfg)
        .build()
        .context("Failed to build agent")?;

    let mut success = false;
    {
        let mut events = agent.stream(&task, TaskContext::default());
        while let Some(event) = events.next().await {
            if let drone::react::AgentEventPayload::Complete { .. } = &event.payload {
                success = true;
            }
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
