// scheduler.rs
// 专家执行规划器：结合 token 数与缓存驻留情况生成专家任务，并按串行/并行/双缓冲三种策略估算层延迟。
use crate::error::{Error, Result};
use crate::expert_cache::{CacheAccess, CacheStats, ExpertCache};
use crate::task::ExpertTask;
use crate::types::ExpertId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// 层延迟的执行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// 逐个专家串行执行：所有任务周期求和
    Serial,
    /// 计算资源无限并行：取最长任务
    Parallel,
    /// 下一个专家的参数搬运与上一个专家的计算重叠
    DoubleBuffered,
}

impl ExecutionStrategy {
    pub const ALL: [ExecutionStrategy; 3] = [
        ExecutionStrategy::Serial,
        ExecutionStrategy::Parallel,
        ExecutionStrategy::DoubleBuffered,
    ];

    /// 按该策略计算任务列表的总周期
    pub fn latency(&self, tasks: &[ExpertTask]) -> u64 {
        match self {
            ExecutionStrategy::Serial => serial_latency(tasks),
            ExecutionStrategy::Parallel => parallel_latency(tasks),
            ExecutionStrategy::DoubleBuffered => double_buffered_latency(tasks),
        }
    }

    /// 策略描述
    pub fn description(&self) -> &'static str {
        match self {
            ExecutionStrategy::Serial => "串行执行",
            ExecutionStrategy::Parallel => "并行执行",
            ExecutionStrategy::DoubleBuffered => "双缓冲执行",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStrategy::Serial => "serial",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::DoubleBuffered => "double_buffered",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(ExecutionStrategy::Serial),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "double_buffered" | "double-buffered" => Ok(ExecutionStrategy::DoubleBuffered),
            other => Err(Error::Config(format!("未知的执行策略: {}", other))),
        }
    }
}

/// 串行延迟：所有任务 total_cycles 之和
pub fn serial_latency(tasks: &[ExpertTask]) -> u64 {
    tasks.iter().map(|t| t.total_cycles).sum()
}

/// 并行延迟：最长任务的 total_cycles，空列表为 0
pub fn parallel_latency(tasks: &[ExpertTask]) -> u64 {
    let max_latency = tasks.iter().map(|t| t.total_cycles).max().unwrap_or(0);
    debug!(
        "并行执行: {} 个活跃专家, 最大延迟 = {} 周期",
        tasks.len(),
        max_latency
    );
    max_latency
}

/// 双缓冲延迟：按任务列表顺序，第 i 个专家的参数搬运与第 i-1 个专家的计算重叠
pub fn double_buffered_latency(tasks: &[ExpertTask]) -> u64 {
    let Some(first) = tasks.first() else {
        return 0;
    };

    // 第一个专家没有可重叠的前驱
    let mut total = first.param_load_cycles + first.compute_cycles;
    for pair in tasks.windows(2) {
        let (prev, task) = (&pair[0], &pair[1]);
        if !task.needs_param_load {
            total += task.compute_cycles;
        } else if task.param_load_cycles <= prev.compute_cycles {
            total += task.compute_cycles;
            debug!(
                "专家 {} 的参数搬运完全隐藏在专家 {} 的计算中",
                task.expert_id, prev.expert_id
            );
        } else {
            let exposed = task.param_load_cycles - prev.compute_cycles;
            total += exposed + task.compute_cycles;
            debug!(
                "专家 {} 的参数搬运部分隐藏（暴露 {} 周期）",
                task.expert_id, exposed
            );
        }
    }

    debug!(
        "双缓冲执行: {} 周期 (串行 {} 周期)",
        total,
        serial_latency(tasks)
    );
    total
}

/// 三种策略下的层延迟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub serial: u64,
    pub parallel: u64,
    pub double_buffered: u64,
}

impl LatencySummary {
    pub fn from_tasks(tasks: &[ExpertTask]) -> Self {
        Self {
            serial: serial_latency(tasks),
            parallel: parallel_latency(tasks),
            double_buffered: double_buffered_latency(tasks),
        }
    }

    pub fn get(&self, strategy: ExecutionStrategy) -> u64 {
        match strategy {
            ExecutionStrategy::Serial => self.serial,
            ExecutionStrategy::Parallel => self.parallel,
            ExecutionStrategy::DoubleBuffered => self.double_buffered,
        }
    }
}

/// 规划器的累计统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlannerTotals {
    /// 累计发生的参数搬运次数
    pub total_param_loads: u64,
    /// 因缓存命中而省下的搬运周期
    pub cache_saved_cycles: u64,
    /// 最近一次规划的计算周期总和
    pub last_compute_cycles: u64,
}

/// 专家执行规划器
///
/// 独占一个专家缓存，缓存状态在多次 `plan_execution` 之间保留，
/// 因此可以模拟跨层/跨批次的专家复用。
#[derive(Debug, Clone)]
pub struct ExecutionPlanner {
    num_experts: usize,
    cache: ExpertCache,
    totals: PlannerTotals,
}

impl ExecutionPlanner {
    /// 创建规划器，缓存容量为 0 时返回配置错误
    pub fn new(num_experts: usize, expert_cache_size: usize) -> Result<Self> {
        Ok(Self {
            num_experts,
            cache: ExpertCache::new(expert_cache_size)?,
            totals: PlannerTotals::default(),
        })
    }

    /// 为一次层评估生成专家任务
    ///
    /// 按专家编号升序遍历，跳过 0 token 的专家；其余专家访问一次缓存，
    /// 命中则不需要搬运参数。`token_counts` 长度小于专家数属于调用方缺陷，直接 panic。
    pub fn plan_execution(
        &mut self,
        token_counts: &[u32],
        param_load_cycles_per_expert: u64,
        compute_cycles_per_token: u64,
    ) -> Vec<ExpertTask> {
        assert!(
            token_counts.len() >= self.num_experts,
            "token_counts 长度 {} 小于专家数 {}",
            token_counts.len(),
            self.num_experts
        );

        let mut tasks = Vec::with_capacity(self.num_experts);
        for (expert_id, &num_tokens) in token_counts[..self.num_experts].iter().enumerate() {
            let expert_id = expert_id as ExpertId;
            if num_tokens == 0 {
                debug!("专家 {} 没有 token，跳过", expert_id);
                continue;
            }

            let needs_param_load = match self.cache.access(expert_id) {
                CacheAccess::Hit => {
                    self.totals.cache_saved_cycles += param_load_cycles_per_expert;
                    debug!(
                        "专家 {} 缓存命中，省下 {} 周期",
                        expert_id, param_load_cycles_per_expert
                    );
                    false
                }
                CacheAccess::Miss { evicted } => {
                    self.totals.total_param_loads += 1;
                    debug!(
                        "专家 {} 缓存未命中，搬运参数 {} 周期 (驱逐: {:?})",
                        expert_id, param_load_cycles_per_expert, evicted
                    );
                    true
                }
            };

            let task = ExpertTask::new(
                expert_id,
                num_tokens,
                needs_param_load,
                param_load_cycles_per_expert,
                compute_cycles_per_token,
            );
            debug!(
                "专家 {}: {} 个 token, 共 {} 周期 (搬运={}, 计算={})",
                expert_id,
                num_tokens,
                task.total_cycles,
                task.param_load_cycles,
                task.compute_cycles
            );
            tasks.push(task);
        }

        self.totals.last_compute_cycles = tasks.iter().map(|t| t.compute_cycles).sum();
        tasks
    }

    pub fn cache(&self) -> &ExpertCache {
        &self.cache
    }

    /// 可变访问缓存，用于预热或清零统计
    pub fn cache_mut(&mut self) -> &mut ExpertCache {
        &mut self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn totals(&self) -> PlannerTotals {
        self.totals
    }
}
