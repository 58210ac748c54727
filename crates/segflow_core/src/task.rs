use crate::constants::{defaults, files};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

/// One user-initiated segmentation run over an input directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub input_dir: PathBuf,
    /// Where results should go. [`None`] means a `seg` directory next to the input.
    pub desired_output_dir: Option<PathBuf>,
    /// The output directory actually used, set on success.
    pub output_dir: Option<PathBuf>,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            desired_output_dir: None,
            output_dir: None,
            status: TaskStatus::Pending,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.desired_output_dir = Some(dir.into());
        self
    }

    /// The directory results are written to.
    pub fn resolve_output_dir(&self) -> PathBuf {
        match &self.desired_output_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => self
                .input_dir
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(files::SEG_DIR),
        }
    }

    pub(crate) fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
    }

    pub(crate) fn succeed(&mut self, output_dir: PathBuf) {
        self.output_dir = Some(output_dir);
        self.status = TaskStatus::Success;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
        self.status = TaskStatus::Failed;
        self.finished_at = Some(Utc::now());
    }
}

/// Which model/configuration a run invokes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTagSpec {
    /// Dataset identifier, passed as `-d`.
    pub dataset: String,
    /// Configuration name, passed as `-c`.
    pub configuration: String,
    /// Fold specifier, passed as `-f`.
    pub folds: String,
    pub name: Option<String>,
}

impl Default for TaskTagSpec {
    fn default() -> Self {
        Self::new(defaults::DATASET)
    }
}

impl TaskTagSpec {
    pub fn new(dataset: impl Into<String>) -> Self {
        let dataset = dataset.into().trim().to_string();
        Self {
            dataset: if dataset.is_empty() {
                defaults::DATASET.to_string()
            } else {
                dataset
            },
            configuration: defaults::CONFIGURATION.to_string(),
            folds: defaults::FOLDS.to_string(),
            name: None,
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = non_blank_or(configuration.into(), defaults::CONFIGURATION);
        self
    }

    pub fn with_folds(mut self, folds: impl Into<String>) -> Self {
        self.folds = non_blank_or(folds.into(), defaults::FOLDS);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Looks up a preset by its label, e.g. `IO Split (101)`, or by dataset id.
    pub fn preset(key: &str) -> Option<Self> {
        let key = key.trim();
        PRESET_TASK_TAGS
            .iter()
            .find(|(label, dataset, _)| *label == key || *dataset == key)
            .map(|(_, dataset, name)| Self::new(*dataset).with_name(*name))
    }
}

fn non_blank_or(value: String, default: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        default.to_string()
    } else {
        value.to_string()
    }
}

/// Named presets as `(label, dataset, name)`.
pub const PRESET_TASK_TAGS: [(&str, &str, &str); 2] = [
    ("IO Split (101)", "101", "IO Split"),
    ("Pre Seg (007)", "007", "Pre Seg"),
];
