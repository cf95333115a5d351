// main.rs
// 命令行入口：按 JSON 配置逐层模拟 MoE 专家执行，或生成合成路由轨迹。
use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use expert_scheduler::{
    report,
    scheduler::ExecutionStrategy,
    trace_generator::{TraceDistribution, TraceGenerator},
    MoeConfig, MoeLayerSimulator, MoeStatsLog,
};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "moe-expert-sim", version, about = "MoE 专家执行周期模拟器")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 按配置逐层评估 MoE 层并打印报告
    Simulate {
        /// JSON 配置文件
        #[arg(long)]
        config: PathBuf,
        /// 覆盖配置中的层数
        #[arg(long)]
        layers: Option<u32>,
        /// 写出 moe_stats.tsv 与 moe_stats.json 的目录
        #[arg(long)]
        stats_dir: Option<PathBuf>,
        /// 覆盖配置中的执行策略
        #[arg(long)]
        strategy: Option<ExecutionStrategy>,
        /// 打印每层的执行计划明细
        #[arg(long)]
        verbose: bool,
    },
    /// 生成路由轨迹 CSV
    GenTrace {
        #[arg(long, default_value = "expert_routing_trace.csv")]
        output: PathBuf,
        #[arg(long, default_value_t = 512)]
        batch_size: usize,
        #[arg(long, default_value_t = 8)]
        num_experts: usize,
        #[arg(long, default_value_t = 1)]
        num_layers: usize,
        #[arg(long, value_enum, default_value_t = DistributionKind::Zipf)]
        distribution: DistributionKind,
        /// Zipf 偏斜系数，或幂律集中度
        #[arg(long, default_value_t = 0.8)]
        skew: f64,
        #[arg(long, default_value_t = 0.05)]
        noise: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DistributionKind {
    Zipf,
    Uniform,
    PowerLaw,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Simulate {
            config,
            layers,
            stats_dir,
            strategy,
            verbose,
        } => simulate(config, layers, stats_dir, strategy, verbose),
        Commands::GenTrace {
            output,
            batch_size,
            num_experts,
            num_layers,
            distribution,
            skew,
            noise,
            seed,
        } => {
            let distribution = match distribution {
                DistributionKind::Zipf => TraceDistribution::Zipf { skew },
                DistributionKind::Uniform => TraceDistribution::Uniform,
                DistributionKind::PowerLaw => TraceDistribution::PowerLaw {
                    concentration: skew,
                },
            };
            let generator = TraceGenerator {
                batch_size,
                num_experts,
                num_layers,
                distribution,
                noise_level: noise,
                seed,
            };
            generator
                .write_csv(&output)
                .with_context(|| format!("写出路由轨迹失败: {}", output.display()))?;
            Ok(())
        }
    }
}

fn simulate(
    config_path: PathBuf,
    layers: Option<u32>,
    stats_dir: Option<PathBuf>,
    strategy: Option<ExecutionStrategy>,
    verbose: bool,
) -> anyhow::Result<()> {
    let mut config = MoeConfig::from_json_file(&config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.display()))?;
    if let Some(strategy) = strategy {
        config.execution_strategy = strategy;
    }
    let num_layers = layers.unwrap_or(config.num_layers as u32);

    let mut simulator = MoeLayerSimulator::new(config)?;
    let mut log = MoeStatsLog::new();
    info!(
        "开始模拟 {} 层, 执行策略: {} ({})",
        num_layers,
        simulator.strategy(),
        simulator.strategy().description()
    );

    for layer_id in 0..num_layers {
        let eval = simulator.evaluate_layer(layer_id, &mut log);
        if layer_id == 0 || verbose {
            println!("\n=== layer{}.moe token 分布 ===", layer_id);
            report::distribution_summary_table(&eval.assignment, simulator.routing_source())
                .printstd();
            report::distribution_table(&eval.assignment).printstd();
        }
        if verbose {
            println!("\n=== layer{}.moe 执行计划 ===", layer_id);
            report::execution_plan_table(&eval.tasks).printstd();
            report::execution_summary_table(
                simulator.config().num_experts,
                &eval.tasks,
                &eval.latency,
                &simulator.planner().totals(),
            )
            .printstd();
        }
    }

    println!("\n=== 专家缓存 ===");
    report::cache_stats_table(&simulator.cache_stats()).printstd();
    println!("\n=== 逐层汇总 ===");
    report::layer_summary_table(&log).printstd();
    println!("MoE 总周期: {}", log.total_moe_cycles());

    if let Some(dir) = stats_dir {
        let tsv = log.write_tsv(&dir)?;
        let json_path = dir.join("moe_stats.json");
        fs::write(&json_path, log.to_json()?)
            .with_context(|| format!("写出统计失败: {}", json_path.display()))?;
        info!("统计已写入: {} / {}", tsv.display(), json_path.display());
    }
    Ok(())
}
