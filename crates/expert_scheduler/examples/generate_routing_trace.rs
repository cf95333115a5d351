use expert_scheduler::{
    report,
    router::RoutingSource,
    trace_generator::{TraceDistribution, TraceGenerator},
    trace_reader::RoutingTraceReader,
};
use std::env;
use std::path::PathBuf;

/// 生成三种分布的路由轨迹，并用轨迹读取器回放第 0 层的 token 分布
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let out_dir = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir);
    std::fs::create_dir_all(&out_dir)?;

    let distributions = [
        ("zipf", TraceDistribution::Zipf { skew: 0.8 }),
        ("uniform", TraceDistribution::Uniform),
        ("power_law", TraceDistribution::PowerLaw { concentration: 1.5 }),
    ];

    for (name, distribution) in distributions {
        let generator = TraceGenerator {
            batch_size: 256,
            num_experts: 16,
            num_layers: 2,
            distribution,
            noise_level: 0.02,
            ..TraceGenerator::default()
        };
        let path = generator.write_csv(out_dir.join(format!("routing_trace_{}.csv", name)))?;

        let mut reader =
            RoutingTraceReader::new(&path, generator.num_experts, 2, generator.batch_size);
        println!("\n--- {} ({}) ---", name, path.display());
        let assignment = reader.assignment(0);
        report::distribution_summary_table(assignment, RoutingSource::Trace).printstd();
        report::distribution_table(assignment).printstd();
    }
    Ok(())
}
