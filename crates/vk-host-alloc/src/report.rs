use colored::*;
use prettytable::{color, Attr, Cell, Row, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::allocator::{AllocatorStats, TrackedAllocator};
use crate::block::scope_name;

/// Output format for allocator reports.
///
/// * `Table` - Human-readable table format (default)
/// * `Json` - Compact JSON format (single line)
/// * `JsonPretty` - Pretty-printed JSON format with indentation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Table,
    Json,
    JsonPretty,
}

impl Format {
    pub fn reporter(self) -> Box<dyn Reporter> {
        match self {
            Format::Table => Box::new(TableReporter),
            Format::Json => Box::new(JsonReporter),
            Format::JsonPretty => Box::new(JsonPrettyReporter),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Format::Table),
            "json" => Ok(Format::Json),
            "json-pretty" => Ok(Format::JsonPretty),
            other => Err(format!(
                "unknown format '{other}', expected one of: table, json, json-pretty"
            )),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Table => write!(f, "table"),
            Format::Json => write!(f, "json"),
            Format::JsonPretty => write!(f, "json-pretty"),
        }
    }
}

/// Live blocks of one allocation scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRow {
    pub blocks: usize,
    pub bytes: u64,
}

/// Point-in-time view of a [`TrackedAllocator`]: what is still live, grouped by
/// scope, and the call counters so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorReport {
    pub label: String,
    pub live_blocks: usize,
    pub live_bytes: u64,
    pub scopes: BTreeMap<String, ScopeRow>,
    pub stats: AllocatorStats,
}

impl AllocatorReport {
    pub fn new(label: impl Into<String>, allocator: &TrackedAllocator) -> Self {
        let blocks = allocator.blocks();

        let mut scopes: BTreeMap<String, ScopeRow> = BTreeMap::new();
        for block in blocks.values() {
            let row = scopes.entry(scope_name(block.scope).to_string()).or_default();
            row.blocks += 1;
            row.bytes += block.size as u64;
        }

        Self {
            label: label.into(),
            live_blocks: blocks.len(),
            live_bytes: scopes.values().map(|row| row.bytes).sum(),
            scopes,
            stats: allocator.stats(),
        }
    }

    /// Anything a reviewer should look at: leaked blocks or refused calls.
    pub fn has_anomalies(&self) -> bool {
        self.live_blocks > 0
            || self.stats.untracked_frees > 0
            || self.stats.untracked_reallocations > 0
    }
}

impl TrackedAllocator {
    pub fn report(&self, label: impl Into<String>) -> AllocatorReport {
        AllocatorReport::new(label, self)
    }
}

/// Trait for implementing custom report output.
///
/// ```rust
/// use vk_host_alloc::{AllocatorReport, Reporter};
/// use std::error::Error;
///
/// struct Summary;
///
/// impl Reporter for Summary {
///     fn report(&self, report: &AllocatorReport) -> Result<(), Box<dyn Error>> {
///         println!("{}: {} live blocks", report.label, report.live_blocks);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter: Send + Sync {
    fn report(&self, report: &AllocatorReport) -> Result<(), Box<dyn std::error::Error>>;
}

pub struct TableReporter;

impl TableReporter {
    pub fn render(report: &AllocatorReport) -> String {
        let use_colors = std::env::var("NO_COLOR").is_err();

        let mut table = Table::new();
        let header_cells: Vec<Cell> = ["Scope", "Blocks", "Bytes", "% Bytes"]
            .into_iter()
            .map(|header| {
                if use_colors {
                    Cell::new(header)
                        .with_style(Attr::Bold)
                        .with_style(Attr::ForegroundColor(color::CYAN))
                } else {
                    Cell::new(header).with_style(Attr::Bold)
                }
            })
            .collect();
        table.add_row(Row::new(header_cells));

        let mut rows: Vec<_> = report.scopes.iter().collect();
        rows.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes).then_with(|| a.0.cmp(b.0)));

        for (scope, row) in rows {
            let percentage = if report.live_bytes > 0 {
                row.bytes as f64 / report.live_bytes as f64 * 100.0
            } else {
                0.0
            };
            table.add_row(Row::new(vec![
                Cell::new(scope),
                Cell::new(&row.blocks.to_string()),
                Cell::new(&format_bytes(row.bytes)),
                Cell::new(&format!("{percentage:.2}%")),
            ]));
        }

        let stats = &report.stats;
        let mut out = format!(
            "{} {} - {} live blocks, {}\n",
            "[vk-host-alloc]".blue().bold(),
            report.label.yellow().bold(),
            report.live_blocks,
            format_bytes(report.live_bytes)
        );
        out.push_str(&format!(
            "allocations: {}, reallocations: {}, frees: {}, failed: {}, rounded: {}\n",
            stats.allocations,
            stats.reallocations,
            stats.frees,
            stats.failed_allocations,
            stats.rounded_allocations
        ));
        if stats.untracked_frees > 0 || stats.untracked_reallocations > 0 {
            out.push_str(&format!(
                "{} untracked frees: {}, untracked reallocations: {}\n",
                "warning:".yellow().bold(),
                stats.untracked_frees,
                stats.untracked_reallocations
            ));
        }

        if report.scopes.is_empty() {
            out.push_str("No live blocks.\n");
        } else {
            out.push_str(&table.to_string());
        }

        out
    }
}

impl Reporter for TableReporter {
    fn report(&self, report: &AllocatorReport) -> Result<(), Box<dyn std::error::Error>> {
        print!("{}", Self::render(report));
        Ok(())
    }
}

pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn report(&self, report: &AllocatorReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string(report)?);
        Ok(())
    }
}

pub struct JsonPrettyReporter;

impl Reporter for JsonPrettyReporter {
    fn report(&self, report: &AllocatorReport) -> Result<(), Box<dyn std::error::Error>> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}

/// Human-readable size in binary units: `512 B`, `2.0 KB`, `3.0 MB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut unit = 0;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && unit < UNITS.len() - 1 {
        scaled /= 1024.0;
        unit += 1;
    }

    match unit {
        0 => format!("{bytes} B"),
        _ => format!("{scaled:.1} {}", UNITS[unit]),
    }
}
