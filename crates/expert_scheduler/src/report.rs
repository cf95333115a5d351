// report.rs
// 诊断输出：token 分布直方图、执行计划、缓存统计与逐层汇总，统一渲染为 prettytable 表格。
use crate::expert_cache::CacheStats;
use crate::router::RoutingSource;
use crate::scheduler::{LatencySummary, PlannerTotals};
use crate::stats::MoeStatsLog;
use crate::task::ExpertTask;
use crate::types::TokenAssignment;
use prettytable::{row, Table};

/// 直方图中从头展示的专家数
const HEAD_EXPERTS: usize = 10;
/// 专家较多时额外展示的末尾专家数
const TAIL_EXPERTS: usize = 3;

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

/// token 分布概要：来源、总分配数、均值、最小/最大、不均衡比
pub fn distribution_summary_table(assignment: &TokenAssignment, source: RoutingSource) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["指标", "值"]);
    table.add_row(row!["来源", source]);
    table.add_row(row!["token-专家 分配总数", assignment.total_assignments()]);
    table.add_row(row!["平均每专家 token 数", format!("{:.1}", assignment.mean_tokens())]);
    table.add_row(row!["最少 token", assignment.min_tokens()]);
    table.add_row(row!["最多 token", assignment.max_tokens()]);
    table.add_row(row![
        "负载不均衡比",
        format!("{:.2}x", assignment.load_imbalance_ratio())
    ]);
    table
}

/// 专家 token 直方图：前 10 个专家，专家超过 10 个时再列出最后 3 个
pub fn distribution_table(assignment: &TokenAssignment) -> Table {
    let total = assignment.total_assignments();
    let n = assignment.num_experts();
    let mut table = Table::new();
    table.set_titles(row!["专家", "token 数", "占比"]);

    let push = |table: &mut Table, expert_id: usize| {
        let tokens = assignment.token_counts[expert_id];
        table.add_row(row![
            expert_id,
            tokens,
            format!("{:5.2}%", percent(tokens as u64, total))
        ]);
    };

    for expert_id in 0..n.min(HEAD_EXPERTS) {
        push(&mut table, expert_id);
    }
    if n > HEAD_EXPERTS {
        table.add_row(row![format!("... (另有 {} 个专家)", n - HEAD_EXPERTS), "", ""]);
        for expert_id in n.saturating_sub(TAIL_EXPERTS).max(HEAD_EXPERTS)..n {
            push(&mut table, expert_id);
        }
    }
    table
}

/// 活跃专家的执行计划明细
pub fn execution_plan_table(tasks: &[ExpertTask]) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["ID", "Tokens", "Cached?", "ParamLoad", "Compute", "Total"]);
    for task in tasks {
        table.add_row(row![
            task.expert_id,
            task.token_count,
            if task.needs_param_load { "NO" } else { "YES" },
            task.param_load_cycles,
            task.compute_cycles,
            task.total_cycles
        ]);
    }
    table
}

/// 执行汇总：三种策略延迟、搬运/计算占比、缓存省下的周期
pub fn execution_summary_table(
    num_experts: usize,
    tasks: &[ExpertTask],
    latency: &LatencySummary,
    totals: &PlannerTotals,
) -> Table {
    let load: u64 = tasks.iter().map(|t| t.param_load_cycles).sum();
    let compute: u64 = tasks.iter().map(|t| t.compute_cycles).sum();

    let mut table = Table::new();
    table.set_titles(row!["指标", "周期"]);
    table.add_row(row!["专家总数", num_experts]);
    table.add_row(row!["活跃专家", tasks.len()]);
    table.add_row(row!["跳过的专家", num_experts.saturating_sub(tasks.len())]);
    table.add_row(row!["串行执行", latency.serial]);
    table.add_row(row!["并行执行", latency.parallel]);
    table.add_row(row!["双缓冲执行", latency.double_buffered]);
    table.add_row(row![
        "参数搬运开销",
        format!("{} ({:.1}%)", load, percent(load, latency.serial))
    ]);
    table.add_row(row![
        "计算周期",
        format!("{} ({:.1}%)", compute, percent(compute, latency.serial))
    ]);
    table.add_row(row!["缓存累计省下", totals.cache_saved_cycles]);
    table
}

pub fn cache_stats_table(stats: &CacheStats) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["专家缓存", "值"]);
    table.add_row(row!["容量", stats.capacity]);
    table.add_row(row!["当前驻留", stats.resident]);
    table.add_row(row!["命中", stats.hits]);
    table.add_row(row!["未命中", stats.misses]);
    table.add_row(row!["命中率", format!("{:.2}%", stats.hit_rate * 100.0)]);
    table.add_row(row!["驱逐", stats.evictions]);
    table
}

/// 逐层汇总
pub fn layer_summary_table(log: &MoeStatsLog) -> Table {
    let mut table = Table::new();
    table.set_titles(row![
        "Layer", "Source", "Active", "Imbalance", "HitRate", "Serial", "Parallel", "DoubleBuf",
        "TotalMoE"
    ]);
    for stat in log.layers() {
        table.add_row(row![
            stat.layer_name,
            stat.routing_source,
            stat.active_experts,
            format!("{:.2}x", stat.load_imbalance_ratio),
            format!("{:.1}%", stat.cache_hit_rate() * 100.0),
            stat.latency.serial,
            stat.latency.parallel,
            stat.latency.double_buffered,
            stat.total_moe_cycles
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_dispatcher::TokenDispatcher;

    fn dispatcher_fixture(num_experts: usize) -> TokenAssignment {
        TokenDispatcher::new(num_experts, 1, 64, false, 0.8)
            .unwrap()
            .assignment()
            .clone()
    }

    #[test]
    fn test_distribution_table_truncates_long_lists() {
        let assignment = dispatcher_fixture(16);
        let table = distribution_table(&assignment);
        // 10 个头部专家 + 省略行 + 3 个尾部专家
        assert_eq!(table.len(), 14);
        assert!(table.to_string().contains("另有 6 个专家"));

        let small = dispatcher_fixture(4);
        assert_eq!(distribution_table(&small).len(), 4);
    }

    #[test]
    fn test_execution_plan_table() {
        let tasks = [
            ExpertTask::new(0, 5, true, 100, 10),
            ExpertTask::new(2, 3, false, 100, 10),
        ];
        let table = execution_plan_table(&tasks);
        assert_eq!(table.len(), 2);
        let rendered = table.to_string();
        assert!(rendered.contains("150"));
        assert!(rendered.contains("YES"));

        let summary = LatencySummary::from_tasks(&tasks);
        let rendered =
            execution_summary_table(4, &tasks, &summary, &PlannerTotals::default()).to_string();
        assert!(rendered.contains("180"));
        assert!(rendered.contains("100 (55.6%)"));
    }

    #[test]
    fn test_empty_plan_renders_without_nan() {
        let rendered = execution_summary_table(
            4,
            &[],
            &LatencySummary::default(),
            &PlannerTotals::default(),
        )
        .to_string();
        assert!(!rendered.contains("NaN"));
    }
}
