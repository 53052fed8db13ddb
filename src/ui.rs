//! Terminal tables for run summaries.
//!
//! Columns size to their widest cell (ANSI colors ignored) and shrink, widest
//! first, until the table fits the terminal.

use colored::*;
use console::{Term, measure_text_width, truncate_str};

const MIN_COLUMN: usize = 8;

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Rows with the wrong number of cells are ignored.
    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row.into_iter().map(|c| single_line(&c)).collect());
        }
    }

    pub fn print(&self) {
        let (_, columns) = Term::stdout().size();
        for line in self.render(columns as usize) {
            println!("{}", line);
        }
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| measure_text_width(h)).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(measure_text_width(cell));
            }
        }

        // "│ a │ b │" costs 3 per column plus the leading indent and border
        let overhead = 3 + 3 * self.headers.len();
        let available = max_width.saturating_sub(overhead);
        while widths.iter().sum::<usize>() > available {
            let Some((widest, &width)) = widths.iter().enumerate().max_by_key(|(_, w)| **w) else {
                break;
            };
            if width <= MIN_COLUMN {
                break;
            }
            widths[widest] -= 1;
        }
        widths
    }

    pub fn render(&self, max_width: usize) -> Vec<String> {
        if self.headers.is_empty() {
            return Vec::new();
        }
        let widths = self.column_widths(max_width);
        let border = |left: &str, mid: &str, right: &str| {
            let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {}{}{}", left, segments.join(mid), right)
        };
        let row = |cells: &[String], bold: bool| {
            let mut line = String::from("  │");
            for (cell, width) in cells.iter().zip(&widths) {
                let text = truncate_str(cell, *width, "...");
                let padding = width.saturating_sub(measure_text_width(&text));
                let text = if bold {
                    text.bold().to_string()
                } else {
                    text.to_string()
                };
                line.push_str(&format!(" {}{} │", text, " ".repeat(padding)));
            }
            line
        };

        let mut lines = vec![border("┌", "┬", "┐"), row(&self.headers, true), border("├", "┼", "┤")];
        lines.extend(self.rows.iter().map(|r| row(r, false)));
        lines.push(border("└", "┴", "┘"));
        lines
    }
}

fn single_line(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}
