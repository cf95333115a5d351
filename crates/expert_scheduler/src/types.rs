// types.rs
// 定义通用类型，如专家ID、单层的 token→专家 分配结果，以及路由相关常量。
use serde::{Deserialize, Serialize};

/// 专家在层内的稳定编号，取值范围 [0, num_experts)
pub type ExpertId = u32;

/// 批次内的 token 编号
pub type TokenId = u32;

// 常量定义，避免硬编码
/// 合成分发器的默认随机种子
pub const DEFAULT_ROUTING_SEED: u64 = 42;
/// 热点专家占专家总数的百分比
pub const HOT_EXPERT_PERCENT: u32 = 5;
/// 非热点专家的 Zipf 权重缩放系数
pub const COLD_EXPERT_WEIGHT_SCALE: f64 = 0.2;

/// 一次层评估的 token→专家 分配结果
///
/// `token_counts[e]` 与 `assignments[e].len()` 始终相等，
/// `assignments[e]` 按 token 编号升序排列。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAssignment {
    /// 每个专家分到的 token 数
    pub token_counts: Vec<u32>,
    /// 每个专家分到的 token 编号列表
    pub assignments: Vec<Vec<TokenId>>,
}

impl TokenAssignment {
    /// 创建全零分配（所有专家都没有 token）
    pub fn zeroed(num_experts: usize) -> Self {
        Self {
            token_counts: vec![0; num_experts],
            assignments: vec![Vec::new(); num_experts],
        }
    }

    /// 记录一次 token→专家 分配
    pub fn assign(&mut self, expert_id: ExpertId, token_id: TokenId) {
        let idx = expert_id as usize;
        self.token_counts[idx] += 1;
        self.assignments[idx].push(token_id);
    }

    pub fn num_experts(&self) -> usize {
        self.token_counts.len()
    }

    /// 分配总数（正常情况下等于 batch_size × experts_per_token）
    pub fn total_assignments(&self) -> u64 {
        self.token_counts.iter().map(|&c| c as u64).sum()
    }

    /// 至少分到一个 token 的专家数
    pub fn active_experts(&self) -> usize {
        self.token_counts.iter().filter(|&&c| c > 0).count()
    }

    pub fn min_tokens(&self) -> u32 {
        self.token_counts.iter().copied().min().unwrap_or(0)
    }

    pub fn max_tokens(&self) -> u32 {
        self.token_counts.iter().copied().max().unwrap_or(0)
    }

    /// 平均每个专家分到的 token 数
    pub fn mean_tokens(&self) -> f64 {
        if self.token_counts.is_empty() {
            return 0.0;
        }
        self.total_assignments() as f64 / self.token_counts.len() as f64
    }

    /// 负载不均衡比：最忙专家的 token 数 / 平均值
    ///
    /// 没有专家时返回 1.0，全零分配时返回 0.0。
    pub fn load_imbalance_ratio(&self) -> f64 {
        if self.token_counts.is_empty() {
            return 1.0;
        }
        let mean = self.mean_tokens();
        if mean == 0.0 {
            return 0.0;
        }
        self.max_tokens() as f64 / mean
    }

    /// 各专家 token 数的方差
    pub fn load_variance(&self) -> f64 {
        if self.token_counts.is_empty() {
            return 0.0;
        }
        let mean = self.mean_tokens();
        let sum_sq: f64 = self
            .token_counts
            .iter()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum();
        sum_sq / self.token_counts.len() as f64
    }
}
