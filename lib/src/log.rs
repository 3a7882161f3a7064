use chrono::Utc;
use serde::Serialize;
use serde_derive::{Deserialize, Serialize};

use crate::error::ErrorStrategy;
use crate::node::TaskTable;

pub fn dump_struct(file_path: &str, target_struct: &impl Serialize) {
    let yaml = serde_yaml::to_string(&target_struct).expect("Failed to serialize.");
    std::fs::write(file_path, yaml).expect("Failed to write the log file.");
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct TaskResultInfo {
    id: String,
    completed: bool,
}

/// Outcome of one invocation, for dumping to YAML.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    call_id: String,
    error_strategy: String,
    max_concurrency: usize,
    finished_at: String,
    tasks: Vec<TaskResultInfo>,
}

impl RunSummary {
    pub fn new<V>(
        call_id: &str,
        error_strategy: ErrorStrategy,
        max_concurrency: usize,
        state: &TaskTable<V>,
    ) -> Self {
        let mut tasks: Vec<TaskResultInfo> = state
            .iter()
            .map(|(id, node)| TaskResultInfo {
                id: id.clone(),
                completed: node.executed(),
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        Self {
            call_id: call_id.to_string(),
            error_strategy: error_strategy.to_string(),
            max_concurrency,
            finished_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            tasks,
        }
    }

    pub fn completed_task_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|task| task.completed)
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn dump_to_yaml(&self, file_path: &str) {
        dump_struct(file_path, self);
    }
}
