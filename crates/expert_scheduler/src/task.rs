// task.rs
// 专家任务结构体：一次执行规划中某个活跃专家的 token 数与周期拆分。
use crate::types::ExpertId;
use serde::{Deserialize, Serialize};

/// 单个活跃专家的执行任务
///
/// 由 `plan_execution` 生成后不再修改；`token_count` 永远不为 0。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertTask {
    /// 专家编号
    pub expert_id: ExpertId,
    /// 分到的 token 数
    pub token_count: u32,
    /// 规划时专家不在片上，需要搬运参数
    pub needs_param_load: bool,
    /// 参数搬运周期，命中缓存时为 0
    pub param_load_cycles: u64,
    /// 计算周期：token 数 × 每 token 周期
    pub compute_cycles: u64,
    /// 搬运 + 计算
    pub total_cycles: u64,
}

impl ExpertTask {
    /// 按缓存命中情况和代价常量构造任务
    pub fn new(
        expert_id: ExpertId,
        token_count: u32,
        needs_param_load: bool,
        param_load_cycles_per_expert: u64,
        compute_cycles_per_token: u64,
    ) -> Self {
        let param_load_cycles = if needs_param_load {
            param_load_cycles_per_expert
        } else {
            0
        };
        let compute_cycles = token_count as u64 * compute_cycles_per_token;
        Self {
            expert_id,
            token_count,
            needs_param_load,
            param_load_cycles,
            compute_cycles,
            total_cycles: param_load_cycles + compute_cycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_task_has_no_load() {
        let task = ExpertTask::new(0, 5, false, 100, 10);
        assert_eq!(task.param_load_cycles, 0);
        assert_eq!(task.compute_cycles, 50);
        assert_eq!(task.total_cycles, 50);
    }

    #[test]
    fn test_uncached_task_adds_load() {
        let task = ExpertTask::new(2, 3, true, 100, 10);
        assert!(task.needs_param_load);
        assert_eq!(task.total_cycles, 130);
    }
}
