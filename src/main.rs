//! PEV Agent 命令行入口
//!
//! 用法：
//!   pev-agent [--config <path>] [--session <id>] <query...>   单次查询，输出 JSON 响应
//!   pev-agent [--config <path>]                               交互模式，逐行读取查询并复用同一会话

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use pev_agent::{load_config, observability, AgentResponse, OrchestratorBuilder};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "pev-agent")]
#[command(version, about = "Plan-Execute-Verify agent: classify, plan, execute and verify a query")]
struct Cli {
    /// 配置文件路径（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 复用已有会话
    #[arg(short, long)]
    session: Option<String>,

    /// 查询内容；为空时进入交互模式
    query: Vec<String>,
}

fn print_response(response: &AgentResponse) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to serialize response")?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let cfg = load_config(args.config).context("Failed to load config")?;
    observability::init(&cfg.log);

    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to create orchestrator")?;

    if !args.query.is_empty() {
        let query = args.query.join(" ");
        let response = orchestrator.run(&query, args.session.as_deref()).await;
        return print_response(&response);
    }

    // 交互模式：首轮生成会话 id，之后复用
    let mut session = args.session;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("pev-agent interactive mode, empty line or Ctrl-D to quit");
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let query = line.trim();
        if query.is_empty() {
            break;
        }
        let response = orchestrator.run(query, session.as_deref()).await;
        session = Some(response.session_id.clone());
        print_response(&response)?;
    }

    Ok(())
}
