// config.rs
// MoE 层模拟的全局配置，包含专家数、top-k、批大小、专家缓存容量、计算/搬运代价常量及其默认实现。
use crate::error::{Error, Result};
use crate::scheduler::ExecutionStrategy;
use crate::types::DEFAULT_ROUTING_SEED;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// MoE 层模拟配置
///
/// 字段名与上游模拟器的 JSON 配置保持一致，缺省字段使用 [`Default`] 中的取值。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MoeConfig {
    /// 专家总数
    pub num_experts: usize,
    /// 每个 token 路由到的专家数（top-k）
    pub experts_per_token: usize,
    /// 批大小（token 数）
    pub batch_size: usize,
    /// 需要模拟的 MoE 层数
    pub num_layers: usize,
    /// 片上可同时驻留的专家数
    pub expert_cache_size: usize,
    /// 每个 token 的专家计算周期（FC1 + GELU + FC2）
    pub compute_cycles_per_token: u64,
    /// 是否启用热点专家倾斜分布
    pub expert_load_imbalance: bool,
    /// 目标热点分配比例，仅用于日志
    pub expert_load_skew: f64,
    /// 合成分发器随机种子
    pub routing_seed: u64,
    /// 路由轨迹文件路径，缺失或无效时回退到合成分发器
    pub moe_routing_trace_path: Option<PathBuf>,
    /// 隐藏层维度 d_model
    pub model_n_embd: u32,
    /// 专家 FFN 中间维度，缺省为 4 × d_model
    pub d_ff_expert: Option<u32>,
    /// 每个参数的字节数（FP16 为 2）
    pub precision: u32,
    /// 核心频率（MHz）
    pub core_freq_mhz: u32,
    /// 片外互连带宽（GB/s）
    pub interconnect_bandwidth_gbps: f64,
    /// 专家参数搬运的固定基础延迟（周期）
    pub expert_load_latency: u64,
    /// 层延迟采用的执行策略
    pub execution_strategy: ExecutionStrategy,
}

impl Default for MoeConfig {
    /// 默认配置：8 个专家、top-2、批大小 512、缓存 4 个专家
    fn default() -> Self {
        Self {
            num_experts: 8,
            experts_per_token: 2,
            batch_size: 512,
            num_layers: 1,
            expert_cache_size: 4,
            compute_cycles_per_token: 450,
            expert_load_imbalance: false,
            expert_load_skew: 0.8,
            routing_seed: DEFAULT_ROUTING_SEED,
            moe_routing_trace_path: None,
            model_n_embd: 768,
            d_ff_expert: None,
            precision: 2,
            core_freq_mhz: 1000,
            interconnect_bandwidth_gbps: 16.0,
            expert_load_latency: 0,
            execution_strategy: ExecutionStrategy::DoubleBuffered,
        }
    }
}

impl MoeConfig {
    /// 从 JSON 文件读取配置并校验
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        let config = Self::from_json_str(&contents)?;
        info!("已加载 MoE 配置: {}", path.display());
        Ok(config)
    }

    /// 从 JSON 字符串解析配置并校验
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: MoeConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置，任何一项不满足都是致命错误
    pub fn validate(&self) -> Result<()> {
        if self.num_experts == 0 {
            return Err(Error::Config("num_experts 必须大于 0".to_string()));
        }
        if self.experts_per_token > self.num_experts {
            return Err(Error::Config(format!(
                "experts_per_token {} 超过专家总数 {}",
                self.experts_per_token, self.num_experts
            )));
        }
        if self.expert_cache_size == 0 {
            return Err(Error::Config("expert_cache_size 必须至少为 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.expert_load_skew) {
            return Err(Error::Config(format!(
                "expert_load_skew {} 不在 [0, 1] 范围内",
                self.expert_load_skew
            )));
        }
        if self.core_freq_mhz == 0 {
            return Err(Error::Config("core_freq_mhz 必须大于 0".to_string()));
        }
        if !(self.interconnect_bandwidth_gbps.is_finite() && self.interconnect_bandwidth_gbps > 0.0)
        {
            return Err(Error::Config(format!(
                "interconnect_bandwidth_gbps {} 必须为正数",
                self.interconnect_bandwidth_gbps
            )));
        }
        Ok(())
    }

    /// 专家 FFN 中间维度
    pub fn expert_ffn_dim(&self) -> u64 {
        self.d_ff_expert
            .map(u64::from)
            .unwrap_or(4 * u64::from(self.model_n_embd))
    }

    /// 每个专家的参数搬运周期
    pub fn param_load_cycles_per_expert(&self) -> u64 {
        ParamLoadModel::from(self).load_cycles()
    }
}

/// 专家参数搬运代价模型
///
/// 每个专家包含 FC1 `[d_model, d_ff]` 与 FC2 `[d_ff, d_model]` 两组权重（偏置忽略不计），
/// 网络拓扑抽象为单一的聚合带宽。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamLoadModel {
    pub d_model: u64,
    pub d_ff_expert: u64,
    pub bytes_per_param: u64,
    pub core_freq_mhz: u64,
    pub bandwidth_gbps: f64,
    pub base_latency: u64,
}

impl From<&MoeConfig> for ParamLoadModel {
    fn from(config: &MoeConfig) -> Self {
        Self {
            d_model: config.model_n_embd as u64,
            d_ff_expert: config.expert_ffn_dim(),
            bytes_per_param: config.precision as u64,
            core_freq_mhz: config.core_freq_mhz as u64,
            bandwidth_gbps: config.interconnect_bandwidth_gbps,
            base_latency: config.expert_load_latency,
        }
    }
}

impl ParamLoadModel {
    /// 单个专家的参数量：2 × d_model × d_ff
    pub fn params_per_expert(&self) -> u64 {
        self.d_model.saturating_mul(self.d_ff_expert).saturating_mul(2)
    }

    pub fn weight_bytes(&self) -> u64 {
        self.params_per_expert().saturating_mul(self.bytes_per_param)
    }

    /// 每个核心周期可搬运的字节数
    pub fn bytes_per_core_cycle(&self) -> f64 {
        self.bandwidth_gbps * 1e9 / (self.core_freq_mhz as f64 * 1e6)
    }

    /// 纯传输周期（向下取整）
    pub fn transfer_cycles(&self) -> u64 {
        (self.weight_bytes() as f64 / self.bytes_per_core_cycle()) as u64
    }

    /// 传输周期加固定基础延迟
    pub fn load_cycles(&self) -> u64 {
        let cycles = self.transfer_cycles().saturating_add(self.base_latency);
        info!(
            "专家参数搬运: {} 个参数 ({:.2}MB), {:.2} 字节/周期, 传输 {} 周期 + 基础延迟 {} 周期 = {} 周期",
            self.params_per_expert(),
            self.weight_bytes() as f64 / 1e6,
            self.bytes_per_core_cycle(),
            self.transfer_cycles(),
            self.base_latency,
            cycles
        );
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MoeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expert_ffn_dim(), 4 * 768);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MoeConfig::from_json_str(
            r#"{ "num_experts": 16, "experts_per_token": 1, "moe_routing_trace_path": "trace.csv",
                 "execution_strategy": "parallel" }"#,
        )
        .unwrap();
        assert_eq!(config.num_experts, 16);
        assert_eq!(config.batch_size, 512);
        assert_eq!(config.execution_strategy, ExecutionStrategy::Parallel);
        assert_eq!(config.moe_routing_trace_path, Some(PathBuf::from("trace.csv")));
    }

    #[test]
    fn test_top_k_larger_than_experts_is_fatal() {
        let err = MoeConfig::from_json_str(r#"{ "num_experts": 4, "experts_per_token": 5 }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_cache_capacity_is_fatal() {
        let config = MoeConfig {
            expert_cache_size: 0,
            ..MoeConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_param_load_cycles() {
        // 2 × 64 × 256 = 32768 个参数，FP16 → 65536 字节
        // 16 GB/s @ 1000 MHz → 16 字节/周期 → 4096 周期
        let config = MoeConfig {
            model_n_embd: 64,
            d_ff_expert: Some(256),
            expert_load_latency: 100,
            ..MoeConfig::default()
        };
        let model = ParamLoadModel::from(&config);
        assert_eq!(model.weight_bytes(), 65536);
        assert_eq!(model.transfer_cycles(), 4096);
        assert_eq!(config.param_load_cycles_per_expert(), 4196);
    }

    #[test]
    fn test_huge_embedding_does_not_overflow() {
        let config = MoeConfig {
            model_n_embd: (1 << 30) + 1,
            ..MoeConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.expert_ffn_dim(), 4 * ((1u64 << 30) + 1));
        // 字节数超出 u64 时饱和，而不是溢出 panic
        let model = ParamLoadModel::from(&config);
        assert_eq!(model.weight_bytes(), u64::MAX);
        assert!(config.param_load_cycles_per_expert() > 0);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moe.json");
        let config = MoeConfig {
            num_experts: 32,
            experts_per_token: 4,
            ..MoeConfig::default()
        };
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = MoeConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.num_experts, 32);
        assert_eq!(loaded.experts_per_token, 4);
    }
}
