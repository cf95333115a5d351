// stats.rs
// MoE 层统计：每次层评估生成一份统计对象，由调用方显式传入的收集器汇总，可导出 TSV/JSON。
use crate::error::Result;
use crate::router::RoutingSource;
use crate::scheduler::{ExecutionStrategy, LatencySummary};
use crate::task::ExpertTask;
use crate::types::{ExpertId, TokenAssignment};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// TSV 统计文件名
pub const STATS_FILE_NAME: &str = "moe_stats.tsv";

/// 单个专家在一次层评估中的利用情况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertUtilization {
    pub expert_id: ExpertId,
    pub tokens_processed: u32,
    pub param_load_cycles: u64,
    pub compute_cycles: u64,
    /// 该专家分到的 token 占全部分配的比例
    pub load_percentage: f64,
}

impl ExpertUtilization {
    /// 汇总每个专家（含未激活专家）的利用情况
    pub fn collect(assignment: &TokenAssignment, tasks: &[ExpertTask]) -> Vec<Self> {
        let total = assignment.total_assignments();
        let mut stats: Vec<Self> = assignment
            .token_counts
            .iter()
            .enumerate()
            .map(|(expert_id, &tokens)| Self {
                expert_id: expert_id as ExpertId,
                tokens_processed: tokens,
                param_load_cycles: 0,
                compute_cycles: 0,
                load_percentage: if total == 0 {
                    0.0
                } else {
                    100.0 * tokens as f64 / total as f64
                },
            })
            .collect();
        for task in tasks {
            if let Some(entry) = stats.get_mut(task.expert_id as usize) {
                entry.param_load_cycles = task.param_load_cycles;
                entry.compute_cycles = task.compute_cycles;
            }
        }
        stats
    }
}

/// 一次 MoE 层评估的统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoeLayerStats {
    pub layer_id: u32,
    pub layer_name: String,
    pub num_experts: usize,
    pub experts_per_token: usize,
    pub batch_size: usize,
    pub routing_source: RoutingSource,
    pub active_experts: usize,
    pub expert_stats: Vec<ExpertUtilization>,
    pub load_balance_variance: f64,
    pub load_imbalance_ratio: f64,
    /// 本次评估期间的缓存命中/未命中/驱逐
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    /// 路由与合并阶段按跳过处理，周期为 0
    pub router_cycles: u64,
    pub combine_cycles: u64,
    pub latency: LatencySummary,
    pub strategy: ExecutionStrategy,
    /// 路由 + 所选策略下的专家延迟 + 合并
    pub total_moe_cycles: u64,
}

impl MoeLayerStats {
    pub fn expert_cycles(&self) -> u64 {
        self.latency.get(self.strategy)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

/// MoE 统计收集器
///
/// 每次运行/测试各自持有一个实例，层评估时显式传入。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MoeStatsLog {
    layers: Vec<MoeLayerStats>,
}

impl MoeStatsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stats: MoeLayerStats) {
        self.layers.push(stats);
    }

    pub fn layers(&self) -> &[MoeLayerStats] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// 所有层的 MoE 周期之和
    pub fn total_moe_cycles(&self) -> u64 {
        self.layers.iter().map(|l| l.total_moe_cycles).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 在 `log_dir` 下写出 `moe_stats.tsv`，返回文件路径
    pub fn write_tsv(&self, log_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(STATS_FILE_NAME);
        let mut out = BufWriter::new(File::create(&path)?);

        writeln!(
            out,
            "Layer\tSource\tActiveExperts\tImbalanceRatio\tCacheHits\tCacheMisses\tCacheEvictions\t\
             RouterCycles\tSerialCycles\tParallelCycles\tDoubleBufferedCycles\tCombineCycles\tTotalMoECycles"
        )?;
        for stat in &self.layers {
            writeln!(
                out,
                "{}\t{:?}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                stat.layer_name,
                stat.routing_source,
                stat.active_experts,
                stat.load_imbalance_ratio,
                stat.cache_hits,
                stat.cache_misses,
                stat.cache_evictions,
                stat.router_cycles,
                stat.latency.serial,
                stat.latency.parallel,
                stat.latency.double_buffered,
                stat.combine_cycles,
                stat.total_moe_cycles
            )?;
        }
        out.flush()?;

        info!("MoE 统计已写入: {}", path.display());
        Ok(path)
    }
}
