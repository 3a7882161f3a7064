use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use lib::digraph::{accumulate_compound_priorities, WorkingGraph};
use lib::error::ErrorStrategy;
use lib::log::RunSummary;
use lib::node::{TaskNode, TaskTable};
use lib::scheduler::execute;
use lib::util::create_run_log_yaml;
use log::info;

#[derive(Parser)]
#[clap(
    name = "report_pipeline",
    version = "1.0",
    about = "About:
    report_pipeline runs a small gated reporting DAG on the execution engine.
    The two sources are fetched in parallel, merged, and the report is only
    published when the merged volume exceeds the threshold."
)]
struct ArgParser {
    ///Number of worker threads.
    #[clap(short = 'c', long = "max_concurrency", default_value = "2")]
    max_concurrency: usize,
    ///Error strategy: strict, permissive or all_children.
    #[clap(short = 'e', long = "error_strategy", default_value = "strict")]
    error_strategy: String,
    ///Volume threshold above which the report is published.
    #[clap(short = 't', long = "threshold", default_value = "100")]
    threshold: f64,
    ///Path to output directory.
    #[clap(short = 'o', long = "output_dir_path", default_value = "../outputs")]
    output_dir_path: String,
}

fn fetch_node(id: &str, volume: f64) -> TaskNode<f64> {
    TaskNode::new(id, move |_: &TaskTable<f64>| {
        thread::sleep(Duration::from_millis(50));
        Ok(volume)
    })
}

fn main() {
    env_logger::init();
    let arg: ArgParser = ArgParser::parse();
    let error_strategy =
        ErrorStrategy::from_str(&arg.error_strategy).expect("Unknown error strategy.");

    let mut graph = WorkingGraph::new();
    for id in ["fetch_orders", "fetch_inventory", "merge", "gate", "publish"] {
        graph.add_task(id).expect("Failed to build the graph.");
    }
    for (from, to) in [
        ("fetch_orders", "merge"),
        ("fetch_inventory", "merge"),
        ("merge", "gate"),
        ("merge", "publish"),
        ("gate", "publish"),
    ] {
        graph
            .add_dependency(from, to)
            .expect("Failed to build the graph.");
    }

    let priorities = HashMap::from([
        ("fetch_orders".to_string(), 0),
        ("fetch_inventory".to_string(), 0),
        ("merge".to_string(), 1),
        ("gate".to_string(), 3),
        ("publish".to_string(), 5),
    ]);
    let compound = accumulate_compound_priorities(&graph, &priorities)
        .expect("Failed to accumulate the compound priorities.");

    let threshold = arg.threshold;
    let nodes = vec![
        fetch_node("fetch_orders", 120.0),
        fetch_node("fetch_inventory", 80.0),
        TaskNode::new("merge", |state: &TaskTable<f64>| {
            let orders = state["fetch_orders"].result().copied().unwrap_or(0.0);
            let inventory = state["fetch_inventory"].result().copied().unwrap_or(0.0);
            Ok(orders + inventory)
        }),
        TaskNode::new("gate", move |state: &TaskTable<f64>| {
            let volume = state["merge"].result().copied().unwrap_or(0.0);
            Ok(if volume > threshold { 1.0 } else { 0.0 })
        }),
        TaskNode::new("publish", |state: &TaskTable<f64>| {
            let volume = state["merge"].result().copied().unwrap_or(0.0);
            info!("Publishing a report for a volume of {volume}.");
            Ok(volume)
        })
        .gated_by("gate"),
    ];
    let node_table: TaskTable<f64> = nodes
        .into_iter()
        .map(|node| {
            let id = node.id().clone();
            let node = node
                .with_priority(priorities.get(&id).copied().unwrap_or(0))
                .with_compound_priority(compound.get(&id).copied().unwrap_or(0));
            (id, Arc::new(node))
        })
        .collect();

    let state = execute(
        &node_table,
        arg.max_concurrency,
        error_strategy,
        graph,
        None,
        "report_pipeline",
    )
    .expect("The execution failed.");

    match state["publish"].result() {
        Some(volume) => info!("The report was published with a volume of {volume}."),
        None => info!("The report was not published."),
    }

    let summary = RunSummary::new(
        "report_pipeline",
        error_strategy,
        arg.max_concurrency,
        &state,
    );
    let file_path = create_run_log_yaml(&arg.output_dir_path, "report_pipeline");
    summary.dump_to_yaml(&file_path);
}
