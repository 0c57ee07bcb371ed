//! Triage Desk CLI
//!
//! 运行分诊服务，管理监听频道，查看会话与费用

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use triage_desk::{
    transport::stdio::read_events, ChatClient, PersistenceManager, RegistryChange,
    SharedState, Snapshot, StdioTransport, TriageConfig, TriageService,
};

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Triage Desk - 入站消息分诊与 AI 支持会话管理")]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/triage-desk/config.json）
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// 快照文件路径（覆盖配置）
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动服务（stdin/stdout JSON Lines 宿主桥）
    Run,
    /// 管理监听频道
    Channels {
        #[command(subcommand)]
        action: ChannelAction,
    },
    /// 列出所有会话
    Sessions {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 查看会话历史
    History {
        /// 会话 ID
        session_id: String,
    },
    /// 查看费用汇总
    Costs {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ChannelAction {
    /// 添加监听频道
    Add { group: String, channel: String },
    /// 移除监听频道
    Remove { group: String, channel: String },
    /// 列出监听频道
    List {
        /// 只列出指定 group
        group: Option<String>,
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认为 info；stdout 留给宿主协议
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("triage_desk=info,triage=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();
    let mut config = TriageConfig::load(cli.config.as_deref())?;
    if let Some(path) = cli.data_file {
        config.data_file = path;
    }

    match cli.command {
        Commands::Run => run_service(config).await?,
        Commands::Channels { action } => handle_channels(&config, action)?,
        Commands::Sessions { json } => {
            let state = load_state(&config);
            let sessions = state.session_infos().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                println!("发现 {} 个会话:\n", sessions.len());
                for s in sessions {
                    println!("  ID: {} | 消息数: {} | 费用: ${:.4}", s.id, s.message_count, s.cost);
                }
            }
        }
        Commands::History { session_id } => {
            let snapshot = PersistenceManager::new(&config.data_file).load();
            let history = snapshot
                .sessions
                .get(&session_id)
                .ok_or_else(|| anyhow!("会话 {} 不存在", session_id))?;
            for (i, msg) in history.iter().enumerate() {
                println!("--- 消息 {} ({}) ---", i + 1, msg.role);
                println!("{}\n", msg.content);
            }
        }
        Commands::Costs { json } => {
            let snapshot = PersistenceManager::new(&config.data_file).load();
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot.costs)?);
            } else {
                let totals = snapshot.costs.totals();
                println!("分类调用: ${:.4}", totals.classification);
                println!("会话回复: ${:.4}", totals.response);
                println!("合计:     ${:.4}", totals.classification + totals.response);
            }
        }
    }

    Ok(())
}

fn load_state(config: &TriageConfig) -> SharedState {
    let snapshot = PersistenceManager::new(&config.data_file).load();
    SharedState::from_snapshot(snapshot, config.history_window)
}

async fn run_service(config: TriageConfig) -> Result<()> {
    let client = Arc::new(ChatClient::from_config(&config)?);
    let transport = Arc::new(StdioTransport::new());
    let service = TriageService::new(&config, client.clone(), client, transport);

    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(e) = read_events(BufReader::new(tokio::io::stdin()), tx).await {
            warn!(error = %e, "Reading stdin failed");
        }
    });

    info!(data_file = %config.data_file.display(), "Listening on stdin");
    service.run(rx).await
}

/// 修改前严格加载，避免用空状态覆盖一个损坏但可修复的快照
fn load_for_update(persistence: &PersistenceManager) -> Result<Snapshot> {
    if persistence.path().exists() {
        persistence.try_load()
    } else {
        Ok(Snapshot::default())
    }
}

fn handle_channels(config: &TriageConfig, action: ChannelAction) -> Result<()> {
    let persistence = PersistenceManager::new(&config.data_file);

    match action {
        ChannelAction::Add { group, channel } => {
            let mut snapshot = load_for_update(&persistence)?;
            match snapshot.guilds.watch(&group, &channel) {
                RegistryChange::Changed => {
                    persistence.save(&snapshot)?;
                    println!("已添加监听频道: {} / {}", group, channel);
                }
                RegistryChange::Unchanged => println!("频道 {} / {} 已在监听中", group, channel),
            }
        }
        ChannelAction::Remove { group, channel } => {
            let mut snapshot = load_for_update(&persistence)?;
            match snapshot.guilds.unwatch(&group, &channel) {
                RegistryChange::Changed => {
                    persistence.save(&snapshot)?;
                    println!("已移除监听频道: {} / {}", group, channel);
                }
                RegistryChange::Unchanged => println!("频道 {} / {} 未在监听中", group, channel),
            }
        }
        ChannelAction::List { group, json } => {
            let snapshot = persistence.load();
            let groups: Vec<(String, Vec<String>)> = snapshot
                .guilds
                .groups()
                .filter(|(g, _)| group.as_deref().map_or(true, |want| want == *g))
                .map(|(g, channels)| (g.to_string(), channels.iter().cloned().collect()))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else if groups.is_empty() {
                println!("没有监听中的频道");
            } else {
                for (g, channels) in groups {
                    println!("{}: {}", g, channels.join(", "));
                }
            }
        }
    }

    Ok(())
}
