// simulator.rs
// MoE 层模拟器：组合路由器、执行规划器与代价模型，逐层评估并把统计写入调用方提供的收集器。
use crate::config::MoeConfig;
use crate::error::Result;
use crate::expert_cache::{CacheStats, ExpertCache};
use crate::router::{select_router, RoutingSource, TokenRouter};
use crate::scheduler::{ExecutionPlanner, ExecutionStrategy, LatencySummary};
use crate::stats::{ExpertUtilization, MoeLayerStats, MoeStatsLog};
use crate::task::ExpertTask;
use crate::types::{ExpertId, TokenAssignment};
use tracing::info;

/// 一次层评估的结果
#[derive(Debug, Clone)]
pub struct LayerEvaluation {
    pub assignment: TokenAssignment,
    pub tasks: Vec<ExpertTask>,
    pub latency: LatencySummary,
    /// 配置策略下的专家阶段周期
    pub selected_latency: u64,
}

/// MoE 层模拟器
///
/// 专家缓存由内部规划器持有，跨层保留，后续层可以复用前面层留下的专家。
pub struct MoeLayerSimulator {
    config: MoeConfig,
    router: Box<dyn TokenRouter>,
    planner: ExecutionPlanner,
    param_load_cycles_per_expert: u64,
}

impl MoeLayerSimulator {
    /// 校验配置并选定路由器，配置无效时返回错误
    pub fn new(config: MoeConfig) -> Result<Self> {
        config.validate()?;
        let router = select_router(&config)?;
        let planner = ExecutionPlanner::new(config.num_experts, config.expert_cache_size)?;
        let param_load_cycles_per_expert = config.param_load_cycles_per_expert();
        info!(
            "MoE 模拟器: {} 个专家, top-{}, 批大小 {}, 缓存 {} 个专家, 路由来源: {}",
            config.num_experts,
            config.experts_per_token,
            config.batch_size,
            config.expert_cache_size,
            router.source()
        );
        Ok(Self {
            config,
            router,
            planner,
            param_load_cycles_per_expert,
        })
    }

    /// 评估一层：路由、规划、三种策略延迟，并记录统计
    pub fn evaluate_layer(&mut self, layer_id: u32, log: &mut MoeStatsLog) -> LayerEvaluation {
        let before = self.planner.cache_stats();

        let assignment = self.router.route(layer_id);
        let tasks = self.planner.plan_execution(
            &assignment.token_counts,
            self.param_load_cycles_per_expert,
            self.config.compute_cycles_per_token,
        );
        let latency = LatencySummary::from_tasks(&tasks);
        let selected_latency = latency.get(self.config.execution_strategy);

        let after = self.planner.cache_stats();
        let stats = MoeLayerStats {
            layer_id,
            layer_name: format!("layer{}.moe", layer_id),
            num_experts: self.config.num_experts,
            experts_per_token: self.config.experts_per_token,
            batch_size: self.config.batch_size,
            routing_source: self.router.source(),
            active_experts: tasks.len(),
            expert_stats: ExpertUtilization::collect(&assignment, &tasks),
            load_balance_variance: assignment.load_variance(),
            load_imbalance_ratio: assignment.load_imbalance_ratio(),
            cache_hits: after.hits - before.hits,
            cache_misses: after.misses - before.misses,
            cache_evictions: after.evictions - before.evictions,
            router_cycles: 0,
            combine_cycles: 0,
            latency,
            strategy: self.config.execution_strategy,
            total_moe_cycles: selected_latency,
        };
        info!(
            "{}: 活跃专家 {}/{}, 命中 {} 未命中 {}, 串行 {} / 并行 {} / 双缓冲 {} 周期",
            stats.layer_name,
            stats.active_experts,
            stats.num_experts,
            stats.cache_hits,
            stats.cache_misses,
            latency.serial,
            latency.parallel,
            latency.double_buffered
        );
        log.record(stats);

        LayerEvaluation {
            assignment,
            tasks,
            latency,
            selected_latency,
        }
    }

    /// 依次评估 `0..num_layers` 层
    pub fn run(&mut self, num_layers: u32, log: &mut MoeStatsLog) -> Vec<LayerEvaluation> {
        (0..num_layers)
            .map(|layer_id| self.evaluate_layer(layer_id, log))
            .collect()
    }

    pub fn config(&self) -> &MoeConfig {
        &self.config
    }

    pub fn routing_source(&self) -> RoutingSource {
        self.router.source()
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.config.execution_strategy
    }

    pub fn param_load_cycles_per_expert(&self) -> u64 {
        self.param_load_cycles_per_expert
    }

    pub fn planner(&self) -> &ExecutionPlanner {
        &self.planner
    }

    pub fn cache(&self) -> &ExpertCache {
        self.planner.cache()
    }

    /// 预热缓存，不计入命中/未命中
    pub fn warm_cache(&mut self, experts: &[ExpertId]) {
        for &expert_id in experts {
            self.planner.cache_mut().warm(expert_id);
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.planner.cache_stats()
    }
}
