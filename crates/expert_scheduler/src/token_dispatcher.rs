// token_dispatcher.rs
// 合成 token 分发器，按固定种子生成可复现的 token→专家 分配，支持均匀分布和热点倾斜分布。
use crate::config::MoeConfig;
use crate::error::{Error, Result};
use crate::router::{RoutingSource, TokenRouter};
use crate::types::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use tracing::info;

/// 合成 token 分发器
///
/// 分配在构造时一次性生成，之后对任意层的查询都返回同一份结果。
#[derive(Debug, Clone)]
pub struct TokenDispatcher {
    num_experts: usize,
    experts_per_token: usize,
    batch_size: usize,
    skew_factor: f64,
    seed: u64,
    assignment: TokenAssignment,
}

impl TokenDispatcher {
    /// 使用默认种子创建分发器
    pub fn new(
        num_experts: usize,
        experts_per_token: usize,
        batch_size: usize,
        enable_imbalance: bool,
        skew_factor: f64,
    ) -> Result<Self> {
        Self::with_seed(
            num_experts,
            experts_per_token,
            batch_size,
            enable_imbalance,
            skew_factor,
            DEFAULT_ROUTING_SEED,
        )
    }

    /// 使用指定种子创建分发器
    pub fn with_seed(
        num_experts: usize,
        experts_per_token: usize,
        batch_size: usize,
        enable_imbalance: bool,
        skew_factor: f64,
        seed: u64,
    ) -> Result<Self> {
        if experts_per_token > num_experts {
            return Err(Error::Config(format!(
                "experts_per_token {} 超过专家总数 {}",
                experts_per_token, num_experts
            )));
        }
        let mut dispatcher = Self {
            num_experts,
            experts_per_token,
            batch_size,
            skew_factor,
            seed,
            assignment: TokenAssignment::zeroed(num_experts),
        };
        dispatcher.assignment = if enable_imbalance {
            dispatcher.generate_skewed_distribution()?
        } else {
            dispatcher.generate_uniform_distribution()
        };
        Ok(dispatcher)
    }

    pub fn from_config(config: &MoeConfig) -> Result<Self> {
        Self::with_seed(
            config.num_experts,
            config.experts_per_token,
            config.batch_size,
            config.expert_load_imbalance,
            config.expert_load_skew,
            config.routing_seed,
        )
    }

    /// 每个专家的 token 数
    pub fn expert_token_counts(&self) -> &[u32] {
        &self.assignment.token_counts
    }

    /// 每个专家的 token 编号列表
    pub fn expert_token_assignments(&self) -> &[Vec<TokenId>] {
        &self.assignment.assignments
    }

    pub fn assignment(&self) -> &TokenAssignment {
        &self.assignment
    }

    pub fn load_imbalance_ratio(&self) -> f64 {
        self.assignment.load_imbalance_ratio()
    }

    /// 热点专家数：专家总数的 5%，至少 1 个
    pub fn hot_expert_count(&self) -> usize {
        std::cmp::max(1, self.num_experts * HOT_EXPERT_PERCENT as usize / 100)
    }

    /// 倾斜模式下每个专家被抽中的概率（已归一化）
    ///
    /// 热点专家权重为 1/(rank+1)，其余为 0.2/(rank+1)。
    pub fn expert_probabilities(&self) -> Vec<f64> {
        let hot = self.hot_expert_count();
        let weights: Vec<f64> = (0..self.num_experts)
            .map(|rank| {
                let zipf = 1.0 / (rank as f64 + 1.0);
                if rank < hot {
                    zipf
                } else {
                    zipf * COLD_EXPERT_WEIGHT_SCALE
                }
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        weights.into_iter().map(|w| w / sum).collect()
    }

    /// 均匀模式：每个 token 打乱专家序列，取前 k 个
    fn generate_uniform_distribution(&self) -> TokenAssignment {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut assignment = TokenAssignment::zeroed(self.num_experts);
        for token_id in 0..self.batch_size as TokenId {
            let mut experts: Vec<ExpertId> = (0..self.num_experts as ExpertId).collect();
            experts.shuffle(&mut rng);
            for &expert_id in &experts[..self.experts_per_token] {
                assignment.assign(expert_id, token_id);
            }
        }
        assignment
    }

    /// 倾斜模式：按 Zipf 式权重为每个 token 抽取 k 个互不相同的专家
    fn generate_skewed_distribution(&self) -> Result<TokenAssignment> {
        let hot = self.hot_expert_count();
        // skew_factor 只用于日志，实际权重固定
        info!("MoE 负载分布:");
        info!(
            "  前 {}% 专家 ({} 个): 目标承担 {}% 的分配",
            HOT_EXPERT_PERCENT,
            hot,
            (self.skew_factor * 100.0) as u32
        );
        info!(
            "  其余专家 ({} 个): 目标承担 {}% 的分配",
            self.num_experts.saturating_sub(hot),
            ((1.0 - self.skew_factor) * 100.0) as u32
        );

        let mut assignment = TokenAssignment::zeroed(self.num_experts);
        if self.batch_size == 0 || self.experts_per_token == 0 {
            return Ok(assignment);
        }

        let probs = self.expert_probabilities();
        let dist = WeightedIndex::new(&probs)
            .map_err(|e| Error::Config(format!("无法构造专家概率分布: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        for token_id in 0..self.batch_size as TokenId {
            let mut selected = BTreeSet::new();
            while selected.len() < self.experts_per_token {
                selected.insert(dist.sample(&mut rng) as ExpertId);
            }
            for expert_id in selected {
                assignment.assign(expert_id, token_id);
            }
        }
        Ok(assignment)
    }
}

impl TokenRouter for TokenDispatcher {
    fn route(&mut self, _layer_id: u32) -> TokenAssignment {
        self.assignment.clone()
    }

    fn source(&self) -> RoutingSource {
        RoutingSource::Synthetic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_well_formed(d: &TokenDispatcher, batch_size: usize, k: usize) {
        let a = d.assignment();
        assert_eq!(a.total_assignments(), (batch_size * k) as u64);
        for (counts, tokens) in a.token_counts.iter().zip(&a.assignments) {
            assert_eq!(*counts as usize, tokens.len());
            assert!(tokens.windows(2).all(|w| w[0] < w[1]));
        }
        // 每个 token 恰好被分配 k 次
        let mut per_token = vec![0usize; batch_size];
        for tokens in &a.assignments {
            for &t in tokens {
                per_token[t as usize] += 1;
            }
        }
        assert!(per_token.iter().all(|&n| n == k));
    }

    #[test]
    fn test_uniform_conservation() {
        for &(n, k, b) in &[(8, 2, 64), (4, 4, 10), (16, 1, 100), (3, 0, 5)] {
            let d = TokenDispatcher::new(n, k, b, false, 0.8).unwrap();
            check_well_formed(&d, b, k);
        }
    }

    #[test]
    fn test_skewed_conservation() {
        for &(n, k, b) in &[(8, 2, 64), (4, 4, 10), (64, 8, 200), (1, 1, 3)] {
            let d = TokenDispatcher::new(n, k, b, true, 0.8).unwrap();
            check_well_formed(&d, b, k);
        }
    }

    #[test]
    fn test_deterministic_for_same_seed() {
        let a = TokenDispatcher::new(16, 2, 128, true, 0.8).unwrap();
        let b = TokenDispatcher::new(16, 2, 128, true, 0.8).unwrap();
        assert_eq!(a.assignment(), b.assignment());

        let c = TokenDispatcher::new(16, 2, 128, false, 0.8).unwrap();
        let d = TokenDispatcher::new(16, 2, 128, false, 0.8).unwrap();
        assert_eq!(c.assignment(), d.assignment());
    }

    #[test]
    fn test_zero_batch_yields_zero_assignment() {
        let d = TokenDispatcher::new(8, 2, 0, true, 0.8).unwrap();
        assert_eq!(d.assignment(), &TokenAssignment::zeroed(8));
        let d = TokenDispatcher::new(8, 2, 0, false, 0.8).unwrap();
        assert_eq!(d.expert_token_counts(), &[0; 8]);
    }

    #[test]
    fn test_top_k_larger_than_experts_is_fatal() {
        assert!(matches!(
            TokenDispatcher::new(4, 5, 16, false, 0.8),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_skewed_favours_hot_experts() {
        let d = TokenDispatcher::new(32, 2, 2000, true, 0.8).unwrap();
        assert_eq!(d.hot_expert_count(), 1);
        let counts = d.expert_token_counts();
        let max = *counts.iter().max().unwrap();
        assert_eq!(counts[0], max);
        assert!(d.load_imbalance_ratio() > 2.0);
    }

    #[test]
    fn test_probabilities_follow_fixed_weighting() {
        let d = TokenDispatcher::new(40, 1, 0, true, 0.3).unwrap();
        assert_eq!(d.hot_expert_count(), 2);
        let p = d.expert_probabilities();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // 热点专家之间按 1/(rank+1)，越过热点边界时额外乘 0.2
        assert!((p[0] / p[1] - 2.0).abs() < 1e-9);
        assert!((p[1] / p[2] - (3.0 / 2.0) / 0.2).abs() < 1e-9);
        // 不受 skew_factor 影响
        let e = TokenDispatcher::new(40, 1, 0, true, 0.9).unwrap();
        assert_eq!(p, e.expert_probabilities());
    }

    #[test]
    fn test_route_returns_same_assignment_for_every_layer() {
        let mut d = TokenDispatcher::new(8, 2, 32, false, 0.8).unwrap();
        let first = d.route(0);
        assert_eq!(first, d.route(7));
        assert_eq!(d.source(), RoutingSource::Synthetic);
    }
}
