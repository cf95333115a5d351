// router.rs
// token 路由来源抽象：路由轨迹回放与合成分发器实现同一个接口，在初始化时选定一次。
use crate::config::MoeConfig;
use crate::error::Result;
use crate::token_dispatcher::TokenDispatcher;
use crate::trace_reader::RoutingTraceReader;
use crate::types::TokenAssignment;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// 分配结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingSource {
    /// 路由轨迹文件
    Trace,
    /// 合成分发器
    Synthetic,
}

impl fmt::Display for RoutingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingSource::Trace => write!(f, "路由轨迹文件"),
            RoutingSource::Synthetic => write!(f, "合成分布"),
        }
    }
}

/// token 路由器：为某一层产生一份 token→专家 分配
pub trait TokenRouter {
    fn route(&mut self, layer_id: u32) -> TokenAssignment;
    fn source(&self) -> RoutingSource;
}

/// 根据配置选择路由器
///
/// 配置了轨迹路径且至少读到一行有效数据时使用轨迹回放，否则回退到合成分发器。
pub fn select_router(config: &MoeConfig) -> Result<Box<dyn TokenRouter>> {
    if let Some(path) = &config.moe_routing_trace_path {
        let reader = RoutingTraceReader::new(
            path,
            config.num_experts,
            config.experts_per_token,
            config.batch_size,
        );
        if reader.has_trace() {
            return Ok(Box::new(reader));
        }
        info!("路由轨迹不可用，回退到合成分布");
    }
    Ok(Box::new(TokenDispatcher::from_config(config)?))
}
