use expert_scheduler::{scheduler::ExecutionStrategy, MoeConfig, MoeLayerSimulator, MoeStatsLog};
use prettytable::{row, Table};

const NUM_LAYERS: u32 = 6;

/// 对比不同缓存容量与负载分布下的命中率和三种执行策略的总周期
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let mut table = Table::new();
    table.set_titles(row![
        "Skewed", "CacheSize", "HitRate", "Serial", "Parallel", "DoubleBuf", "Saved"
    ]);

    for skewed in [false, true] {
        for cache_size in [1, 2, 4, 8, 16] {
            let config = MoeConfig {
                num_experts: 16,
                experts_per_token: 2,
                batch_size: 64,
                expert_cache_size: cache_size,
                expert_load_imbalance: skewed,
                compute_cycles_per_token: 450,
                ..MoeConfig::default()
            };
            let mut simulator = MoeLayerSimulator::new(config)?;
            let mut log = MoeStatsLog::new();
            simulator.run(NUM_LAYERS, &mut log);

            let total = |strategy: ExecutionStrategy| -> u64 {
                log.layers().iter().map(|l| l.latency.get(strategy)).sum()
            };
            table.add_row(row![
                skewed,
                cache_size,
                format!("{:.1}%", simulator.cache_stats().hit_rate * 100.0),
                total(ExecutionStrategy::Serial),
                total(ExecutionStrategy::Parallel),
                total(ExecutionStrategy::DoubleBuffered),
                simulator.planner().totals().cache_saved_cycles
            ]);
        }
    }

    println!("{} 层, 16 个专家, top-2, 批大小 64", NUM_LAYERS);
    table.printstd();
    Ok(())
}
