// trace_reader.rs
// 路由轨迹读取器，从 CSV 回放每层每个 token 的专家概率，并按 top-k 推导分配（按层缓存）。
use crate::router::{RoutingSource, TokenRouter};
use crate::types::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 路由轨迹读取器
///
/// 轨迹格式（首行为表头，读取时跳过）：
///
/// ```text
/// layer_id,token_id,expert_0,expert_1,...,expert_N
/// 0,0,0.45,0.32,0.10,...
/// ```
///
/// 文件不存在或没有任何有效行时进入“无轨迹”状态，不视为错误。
#[derive(Debug, Clone)]
pub struct RoutingTraceReader {
    trace_path: PathBuf,
    num_experts: usize,
    experts_per_token: usize,
    batch_size: usize,
    has_trace: bool,
    /// layer_id -> token_id -> 专家概率
    routing_probs: BTreeMap<u32, Vec<Option<Vec<f64>>>>,
    /// 按层缓存的分配结果
    assignments: HashMap<u32, TokenAssignment>,
}

impl RoutingTraceReader {
    /// 读取轨迹文件（构造时一次性阻塞读取）
    pub fn new(
        trace_path: impl AsRef<Path>,
        num_experts: usize,
        experts_per_token: usize,
        batch_size: usize,
    ) -> Self {
        let trace_path = trace_path.as_ref().to_path_buf();
        let contents = match fs::read_to_string(&trace_path) {
            Ok(contents) => Some(contents),
            Err(e) => {
                info!("无法读取路由轨迹 {}: {}", trace_path.display(), e);
                None
            }
        };
        let mut reader = Self::empty(trace_path, num_experts, experts_per_token, batch_size);
        if let Some(contents) = contents {
            reader.load_trace(&contents);
        }
        if reader.has_trace {
            info!("已加载 MoE 路由轨迹: {}", reader.trace_path.display());
        } else {
            info!(
                "未找到可用的路由轨迹: {}，将使用合成分布",
                reader.trace_path.display()
            );
        }
        reader
    }

    /// 直接从 CSV 文本构造
    pub fn from_csv_str(
        contents: &str,
        num_experts: usize,
        experts_per_token: usize,
        batch_size: usize,
    ) -> Self {
        let mut reader = Self::empty(PathBuf::new(), num_experts, experts_per_token, batch_size);
        reader.load_trace(contents);
        reader
    }

    fn empty(
        trace_path: PathBuf,
        num_experts: usize,
        experts_per_token: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            trace_path,
            num_experts,
            experts_per_token,
            batch_size,
            has_trace: false,
            routing_probs: BTreeMap::new(),
            assignments: HashMap::new(),
        }
    }

    /// 是否成功加载了至少一行有效数据
    pub fn has_trace(&self) -> bool {
        self.has_trace
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }

    /// 轨迹中出现过的层编号（升序）
    pub fn layers(&self) -> Vec<u32> {
        self.routing_probs.keys().copied().collect()
    }

    /// 某层的分配结果，首次查询时计算并缓存
    pub fn assignment(&mut self, layer_id: u32) -> &TokenAssignment {
        if !self.assignments.contains_key(&layer_id) {
            let computed = self.compute_assignments(layer_id);
            self.assignments.insert(layer_id, computed);
        }
        &self.assignments[&layer_id]
    }

    pub fn expert_token_counts(&mut self, layer_id: u32) -> Vec<u32> {
        self.assignment(layer_id).token_counts.clone()
    }

    pub fn expert_token_assignments(&mut self, layer_id: u32) -> Vec<Vec<TokenId>> {
        self.assignment(layer_id).assignments.clone()
    }

    fn load_trace(&mut self, contents: &str) {
        let mut lines = contents.lines();
        // 跳过表头
        if lines.next().is_none() {
            return;
        }

        let batch_size = self.batch_size;
        let mut valid_rows = 0usize;
        for (line_no, line) in lines.enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // 表头占第 1 行
            let Some((layer_id, token_id, probs)) = self.parse_row(line, line_no + 2) else {
                continue;
            };
            valid_rows += 1;

            let tokens = self
                .routing_probs
                .entry(layer_id)
                .or_insert_with(|| vec![None; batch_size]);
            if let Some(slot) = tokens.get_mut(token_id as usize) {
                *slot = Some(probs);
            }
        }

        info!(
            "已加载 {} 层的路由概率（{} 行有效数据）",
            self.routing_probs.len(),
            valid_rows
        );
        self.has_trace = !self.routing_probs.is_empty();
    }

    /// 解析一行，格式不对时记录警告并返回 None
    fn parse_row(&self, line: &str, line_no: usize) -> Option<(u32, u32, Vec<f64>)> {
        let cells: Vec<&str> = line.split(',').map(str::trim).collect();
        let expected = 2 + self.num_experts;
        if cells.len() < expected {
            warn!(
                "路由轨迹第 {} 行无效（需要 {} 列，实际 {} 列）",
                line_no,
                expected,
                cells.len()
            );
            return None;
        }

        let (layer_id, token_id) = match (cells[0].parse::<u32>(), cells[1].parse::<u32>()) {
            (Ok(layer_id), Ok(token_id)) => (layer_id, token_id),
            _ => {
                warn!("路由轨迹第 {} 行的层/token 编号无法解析", line_no);
                return None;
            }
        };

        let mut probs = Vec::with_capacity(self.num_experts);
        for cell in &cells[2..expected] {
            match cell.parse::<f64>() {
                Ok(p) if p.is_finite() => probs.push(p),
                _ => {
                    warn!("路由轨迹第 {} 行的概率值 '{}' 无效", line_no, cell);
                    return None;
                }
            }
        }
        Some((layer_id, token_id, probs))
    }

    fn compute_assignments(&self, layer_id: u32) -> TokenAssignment {
        let mut assignment = TokenAssignment::zeroed(self.num_experts);
        let Some(tokens) = self.routing_probs.get(&layer_id) else {
            warn!("第 {} 层没有路由数据", layer_id);
            return assignment;
        };

        for (token_id, probs) in tokens.iter().enumerate() {
            let Some(probs) = probs else {
                warn!("第 {} 层 token {} 缺少路由数据", layer_id, token_id);
                continue;
            };
            for expert_id in top_k_experts(probs, self.experts_per_token) {
                assignment.assign(expert_id, token_id as TokenId);
            }
        }
        assignment
    }
}

/// 按概率降序选出前 k 个专家，概率相同时编号小的优先
pub fn top_k_experts(probs: &[f64], k: usize) -> Vec<ExpertId> {
    let mut pairs: Vec<(f64, ExpertId)> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (p, i as ExpertId))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    pairs.into_iter().take(k).map(|(_, id)| id).collect()
}

impl TokenRouter for RoutingTraceReader {
    fn route(&mut self, layer_id: u32) -> TokenAssignment {
        self.assignment(layer_id).clone()
    }

    fn source(&self) -> RoutingSource {
        RoutingSource::Trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HEADER: &str = "layer_id,token_id,expert_0,expert_1,expert_2,expert_3";

    #[test]
    fn test_malformed_row_is_skipped() {
        let csv = format!(
            "{}\n0,0,0.1,0.6,0.2,0.1\n0,1,0.5,0.3\n0,2,0.1,0.1,0.1,0.7\n",
            HEADER
        );
        let mut reader = RoutingTraceReader::from_csv_str(&csv, 4, 1, 3);
        assert!(reader.has_trace());
        // token 1 的行被跳过
        assert_eq!(reader.expert_token_counts(0), vec![0, 1, 0, 1]);
        assert_eq!(reader.expert_token_assignments(0)[3], vec![2]);
    }

    #[test]
    fn test_bad_numbers_are_skipped() {
        let csv = format!(
            "{}\n0,0,abc,0.6,0.2,0.1\n0,x,0.1,0.6,0.2,0.1\n1,0,NaN,0.6,0.2,0.1\n",
            HEADER
        );
        let reader = RoutingTraceReader::from_csv_str(&csv, 4, 1, 2);
        assert!(!reader.has_trace());
    }

    #[test]
    fn test_header_only_means_no_trace() {
        let reader = RoutingTraceReader::from_csv_str(HEADER, 4, 2, 8);
        assert!(!reader.has_trace());
        let reader = RoutingTraceReader::from_csv_str("", 4, 2, 8);
        assert!(!reader.has_trace());
    }

    #[test]
    fn test_missing_file_means_no_trace() {
        let reader = RoutingTraceReader::new("/nonexistent/trace.csv", 4, 2, 8);
        assert!(!reader.has_trace());
    }

    #[test]
    fn test_top_k_per_layer() {
        let csv = format!(
            "{}\n0,0,0.1,0.6,0.2,0.1\n0,1,0.5,0.3,0.1,0.1\n1,0,0.0,0.0,0.3,0.7\n1,1,0.25,0.25,0.25,0.25\n",
            HEADER
        );
        let mut reader = RoutingTraceReader::from_csv_str(&csv, 4, 2, 2);
        assert_eq!(reader.layers(), vec![0, 1]);
        let l0 = reader.assignment(0).clone();
        assert_eq!(l0.token_counts, vec![1, 2, 1, 0]);
        assert_eq!(l0.assignments[1], vec![0, 1]);
        // 第 1 层 token 1 四个概率相同，取编号最小的两个
        let l1 = reader.assignment(1).clone();
        assert_eq!(l1.token_counts, vec![1, 1, 1, 1]);
        assert_eq!(l1.assignments[0], vec![1]);
        assert_eq!(l1.assignments[3], vec![0]);
        assert_eq!(l1.total_assignments(), 4);
    }

    #[test]
    fn test_top_k_tie_break_prefers_lower_id() {
        assert_eq!(top_k_experts(&[0.2, 0.4, 0.4, 0.0], 2), vec![1, 2]);
        assert_eq!(top_k_experts(&[0.1, 0.1, 0.1], 1), vec![0]);
        assert_eq!(top_k_experts(&[0.1, 0.9], 5), vec![1, 0]);
    }

    #[test]
    fn test_missing_layer_yields_zero_assignment() {
        let csv = format!("{}\n0,0,0.1,0.6,0.2,0.1\n", HEADER);
        let mut reader = RoutingTraceReader::from_csv_str(&csv, 4, 2, 1);
        assert_eq!(reader.assignment(5), &TokenAssignment::zeroed(4));
    }

    #[test]
    fn test_out_of_range_and_missing_tokens() {
        // token 9 超出批大小被忽略；token 1 没有数据
        let csv = format!("{}\n0,0,0.1,0.6,0.2,0.1\n0,9,0.9,0.0,0.0,0.1\n", HEADER);
        let mut reader = RoutingTraceReader::from_csv_str(&csv, 4, 1, 2);
        assert!(reader.has_trace());
        assert_eq!(reader.expert_token_counts(0), vec![0, 1, 0, 0]);
    }

    #[test]
    fn test_repeated_lookup_is_idempotent() {
        let csv = format!(
            "{}\n0,0,0.1,0.6,0.2,0.1\n0,1,0.5,0.3,0.1,0.1\n",
            HEADER
        );
        let mut reader = RoutingTraceReader::from_csv_str(&csv, 4, 2, 2);
        let first = reader.route(0);
        let second = reader.route(0);
        assert_eq!(first, second);
        assert_eq!(reader.expert_token_counts(0), first.token_counts);
        assert_eq!(reader.source(), RoutingSource::Trace);
    }

    #[test]
    fn test_reads_trace_file_with_extra_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{},note", HEADER).unwrap();
        writeln!(file, "0,0,0.1,0.6,0.2,0.1,foo").unwrap();
        writeln!(file, "0,1,0.7,0.1,0.1,0.1,bar").unwrap();
        let mut reader = RoutingTraceReader::new(file.path(), 4, 1, 2);
        assert!(reader.has_trace());
        assert_eq!(reader.trace_path(), file.path());
        assert_eq!(reader.expert_token_counts(0), vec![1, 1, 0, 0]);
    }
}
