//! Per-run summary of what happened to each target.

use crate::ui::Table;
use colored::*;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Built,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Built => write!(f, "built"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub project: String,
    pub target: String,
    pub kind: &'static str,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub entries: Vec<TargetReport>,
}

impl BuildReport {
    pub fn record(&mut self, entry: TargetReport) {
        self.entries.push(entry);
    }

    pub fn outcome_of(&self, target: &str) -> Option<Outcome> {
        self.entries
            .iter()
            .find(|e| e.target == target)
            .map(|e| e.outcome)
    }

    /// Names of the targets that were rebuilt, in build order.
    pub fn built(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.outcome == Outcome::Built)
            .map(|e| e.target.as_str())
            .collect()
    }

    pub fn print(&self) {
        if self.entries.is_empty() {
            return;
        }
        let mut table = Table::new(&["Project", "Target", "Kind", "Result", "Time"]);
        for entry in &self.entries {
            let outcome = match entry.outcome {
                Outcome::Built => entry.outcome.to_string().green().to_string(),
                Outcome::Skipped => entry.outcome.to_string().dimmed().to_string(),
            };
            table.add_row(vec![
                entry.project.clone(),
                entry.target.clone(),
                entry.kind.to_string(),
                outcome,
                format!("{:.2?}", entry.elapsed),
            ]);
        }
        table.print();
    }
}
