// trace_generator.rs
// 路由轨迹生成器：按 Zipf/均匀/幂律基础分布加逐 token 噪声，写出路由轨迹读取器可回放的 CSV。
use crate::error::{Error, Result};
use crate::types::DEFAULT_ROUTING_SEED;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// 基础专家概率分布
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceDistribution {
    /// p(k) ∝ 1/k^alpha，alpha = -ln(1 - skew) / ln 2
    Zipf { skew: f64 },
    Uniform,
    /// p(k) ∝ 1/k^concentration
    PowerLaw { concentration: f64 },
}

impl TraceDistribution {
    /// 归一化后的基础概率，下标即专家编号
    pub fn base_probabilities(&self, num_experts: usize) -> Result<Vec<f64>> {
        if num_experts == 0 {
            return Err(Error::Trace("num_experts 必须大于 0".to_string()));
        }
        let exponent = match *self {
            TraceDistribution::Uniform => 0.0,
            TraceDistribution::Zipf { skew } => {
                if !(skew > 0.0 && skew < 1.0) {
                    return Err(Error::Trace(format!("Zipf 偏斜系数 {} 不在 (0, 1) 内", skew)));
                }
                -(1.0 - skew).ln() / 2f64.ln()
            }
            TraceDistribution::PowerLaw { concentration } => {
                if !(concentration.is_finite() && concentration >= 0.0) {
                    return Err(Error::Trace(format!("幂律集中度 {} 无效", concentration)));
                }
                concentration
            }
        };
        let weights: Vec<f64> = (1..=num_experts)
            .map(|rank| 1.0 / (rank as f64).powf(exponent))
            .collect();
        let sum: f64 = weights.iter().sum();
        Ok(weights.into_iter().map(|w| w / sum).collect())
    }
}

/// 路由轨迹生成参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceGenerator {
    pub batch_size: usize,
    pub num_experts: usize,
    pub num_layers: usize,
    pub distribution: TraceDistribution,
    /// 逐 token 均匀噪声幅度，0 表示不加噪声
    pub noise_level: f64,
    pub seed: u64,
}

impl Default for TraceGenerator {
    fn default() -> Self {
        Self {
            batch_size: 512,
            num_experts: 8,
            num_layers: 1,
            distribution: TraceDistribution::Zipf { skew: 0.8 },
            noise_level: 0.05,
            seed: DEFAULT_ROUTING_SEED,
        }
    }
}

impl TraceGenerator {
    /// 写出轨迹 CSV，返回写出的路径
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref().to_path_buf();
        let mut out = BufWriter::new(File::create(&path)?);
        let rows = self.write_to(&mut out)?;
        out.flush()?;
        info!(
            "路由轨迹已写入: {} ({} 行, {} 层 × {} token)",
            path.display(),
            rows,
            self.num_layers,
            self.batch_size
        );
        Ok(path)
    }

    /// 写出表头和所有数据行，返回数据行数
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<usize> {
        if !(self.noise_level.is_finite() && self.noise_level >= 0.0) {
            return Err(Error::Trace(format!("噪声幅度 {} 无效", self.noise_level)));
        }
        let base = self.distribution.base_probabilities(self.num_experts)?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let header: Vec<String> = (0..self.num_experts)
            .map(|i| format!("expert_{}", i))
            .collect();
        writeln!(out, "layer_id,token_id,{}", header.join(","))?;

        let mut rows = 0;
        for layer_id in 0..self.num_layers {
            for token_id in 0..self.batch_size {
                let probs = self.token_probabilities(&base, &mut rng);
                let cells: Vec<String> = probs.iter().map(|p| format!("{:.6}", p)).collect();
                writeln!(out, "{},{},{}", layer_id, token_id, cells.join(","))?;
                rows += 1;
            }
        }
        Ok(rows)
    }

    /// 在基础分布上叠加噪声，截断负值后重新归一化
    fn token_probabilities(&self, base: &[f64], rng: &mut StdRng) -> Vec<f64> {
        if self.noise_level == 0.0 {
            return base.to_vec();
        }
        let noisy: Vec<f64> = base
            .iter()
            .map(|&p| (p + rng.gen_range(-self.noise_level..=self.noise_level)).max(0.0))
            .collect();
        let sum: f64 = noisy.iter().sum();
        if sum <= 0.0 {
            return base.to_vec();
        }
        noisy.into_iter().map(|p| p / sum).collect()
    }
}
