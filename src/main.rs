use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use automation_core::AppConfig;

mod app;

use app::Engine;

/// 定时任务与对象工作流自动化引擎
///
/// 每个子命令执行一次后退出，周期性调用由外部定时器负责。
#[derive(Parser, Debug)]
#[command(name = "automation")]
#[command(version = "1.0.0")]
#[command(about = "定时任务与对象工作流自动化引擎")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径（默认查找 config/automation.toml 或 automation.toml）
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, global = true, value_parser = ["json", "pretty"])]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 创建数据表
    Migrate,
    /// 执行所有到期的定时任务
    SweepTasks,
    /// 回收运行超时的定时任务
    SweepStalled,
    /// 扫描日期偏移工作流步骤
    SweepWorkflows {
        /// 对象类型，可重复；缺省时使用 engine.workflow_object_classes
        #[arg(long = "class")]
        classes: Vec<String>,
    },
    /// 手动触发一个工作流步骤
    Trigger {
        #[arg(long = "class")]
        object_class: String,
        #[arg(long)]
        pk: String,
        #[arg(long)]
        step: String,
        /// 触发值，缺省为 N/A
        #[arg(long)]
        trigger_value: Option<String>,
    },
    /// 查看执行历史
    History {
        /// 定时任务ID
        #[arg(long, conflicts_with_all = ["object_class", "pk"])]
        task: Option<i64>,
        #[arg(long, default_value = "20")]
        limit: i64,
        /// 对象类型（与 --pk 一起查看工作流完成记录）
        #[arg(long = "class", requires = "pk")]
        object_class: Option<String>,
        #[arg(long, requires = "object_class")]
        pk: Option<String>,
    },
    /// 新建定时任务
    AddTask {
        #[arg(long)]
        name: String,
        /// 任务实现标识
        #[arg(long)]
        task: String,
        /// 任务配置 (JSON对象)
        #[arg(long)]
        task_config: Option<String>,
        /// 时间规则 (JSON)，可重复，例如 '{"hour":9,"minute":30}'
        #[arg(long = "rule")]
        rules: Vec<String>,
        /// 超时时间 (秒)，缺省为 engine.default_timeout_seconds
        #[arg(long)]
        timeout_seconds: Option<i64>,
    },
    /// 新建工作流步骤
    AddStep {
        #[arg(long = "class")]
        object_class: String,
        #[arg(long)]
        step: String,
        /// MANUAL、DATE_OFFSET_DAYS 或 PROPERTY_CHANGE
        #[arg(long)]
        trigger: String,
        /// 触发数据，例如 expires_at:-7 或 status
        #[arg(long)]
        trigger_data: Option<String>,
        /// 任务实现标识
        #[arg(long)]
        task: String,
        /// 任务配置 (JSON对象)
        #[arg(long)]
        task_config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(config.logging.level.as_str());
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(config.logging.format.as_str());
    init_logging(log_level, log_format)?;

    info!("数据库: {}", config.database.url);
    let engine = Engine::new(config).await?;
    let result = run_command(&engine, cli.command).await;
    engine.shutdown().await;
    result
}

async fn run_command(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => engine.migrate().await,
        Commands::SweepTasks => engine.sweep_tasks().await,
        Commands::SweepStalled => engine.sweep_stalled().await,
        Commands::SweepWorkflows { classes } => engine.sweep_workflows(classes).await,
        Commands::Trigger {
            object_class,
            pk,
            step,
            trigger_value,
        } => {
            engine
                .trigger(&object_class, &pk, &step, trigger_value.as_deref())
                .await
        }
        Commands::History {
            task,
            limit,
            object_class,
            pk,
        } => match (task, object_class, pk) {
            (Some(task_id), _, _) => engine.task_history(task_id, limit).await,
            (None, Some(object_class), Some(pk)) => engine.object_history(&object_class, &pk).await,
            _ => Err(anyhow::anyhow!("请指定 --task，或同时指定 --class 与 --pk")),
        },
        Commands::AddTask {
            name,
            task,
            task_config,
            rules,
            timeout_seconds,
        } => {
            engine
                .add_task(&name, &task, task_config.as_deref(), &rules, timeout_seconds)
                .await
        }
        Commands::AddStep {
            object_class,
            step,
            trigger,
            trigger_data,
            task,
            task_config,
        } => {
            engine
                .add_step(
                    &object_class,
                    &step,
                    &trigger,
                    trigger_data.as_deref(),
                    &task,
                    task_config.as_deref(),
                )
                .await
        }
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}
