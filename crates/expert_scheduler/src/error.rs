// error.rs
// 定义项目通用的错误类型（配置、IO、JSON解析、路由轨迹等）和Result类型。
use std::io;
use thiserror::Error;

/// 项目通用错误类型
///
/// 路由轨迹读取失败不会产生错误：读取器会退化为“无轨迹”状态，由调用方回退到合成分发器。
#[derive(Debug, Error)]
pub enum Error {
    /// 配置错误（构造阶段即失败）
    #[error("配置错误: {0}")]
    Config(String),
    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
    /// JSON解析错误
    #[error("JSON解析错误: {0}")]
    Json(#[from] serde_json::Error),
    /// 路由轨迹生成/写出错误
    #[error("路由轨迹错误: {0}")]
    Trace(String),
}

/// 通用结果类型
pub type Result<T> = std::result::Result<T, Error>;
