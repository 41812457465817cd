//! Output formatting for ecutool (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable table
    #[default]
    Table,
    Json,
    Csv,
}

/// Where command results and status lines go
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Spinners only on an interactive table run
    pub fn show_progress(&self) -> bool {
        self.format == OutputFormat::Table && !self.quiet
    }

    pub fn success(&self, msg: &str) {
        if self.quiet {
            return;
        }
        println!("{}", msg.green());
    }

    /// Status text that would corrupt json/csv output is dropped there
    pub fn info(&self, msg: &str) {
        if self.quiet || self.format != OutputFormat::Table {
            return;
        }
        println!("{msg}");
    }

    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red().bold());
    }

    pub fn print<T: Tabled + Serialize>(&self, rows: &[T]) {
        let rendered = match self.format {
            OutputFormat::Table if rows.is_empty() => {
                if self.quiet {
                    return;
                }
                "(none)".to_string()
            }
            OutputFormat::Table => Table::new(rows).to_string(),
            OutputFormat::Json => json_text(&rows),
            OutputFormat::Csv => {
                print!("{}", to_csv(rows));
                return;
            }
        };
        println!("{rendered}");
    }

    /// Single record given as labelled values
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                for (key, value) in pairs {
                    println!("{}  {value}", format!("{key:<width$}").bold());
                }
            }
            OutputFormat::Json => {
                let record: serde_json::Map<_, _> = pairs
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), serde_json::Value::from(v.as_str())))
                    .collect();
                println!("{}", json_text(&record));
            }
            OutputFormat::Csv => {
                let header = pairs.iter().map(|(k, _)| escape_csv(k));
                let record = pairs.iter().map(|(_, v)| escape_csv(v));
                println!("{}", header.collect::<Vec<_>>().join(","));
                println!("{}", record.collect::<Vec<_>>().join(","));
            }
        }
    }
}

fn json_text<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// CSV with one column per serialized field. serde_json keeps object keys
/// sorted, so columns come out in name order.
fn to_csv<T: Serialize>(rows: &[T]) -> String {
    let records: Vec<serde_json::Map<String, serde_json::Value>> = rows
        .iter()
        .filter_map(|row| match serde_json::to_value(row) {
            Ok(serde_json::Value::Object(fields)) => Some(fields),
            _ => None,
        })
        .collect();
    let Some(columns) = records.first().map(|r| r.keys().cloned().collect::<Vec<_>>()) else {
        return String::new();
    };

    let mut lines = vec![columns.join(",")];
    for record in &records {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| match record.get(column) {
                Some(serde_json::Value::String(text)) => escape_csv(text),
                Some(other) => escape_csv(&other.to_string()),
                None => String::new(),
            })
            .collect();
        lines.push(cells.join(","));
    }
    lines.join("\n") + "\n"
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Checksum report for the checksum command
#[derive(Debug, Tabled, Serialize)]
pub struct ChecksumRow {
    #[tabled(rename = "Scheme")]
    pub scheme: String,
    #[tabled(rename = "Matched")]
    pub matched: usize,
    #[tabled(rename = "Total")]
    pub total: usize,
    #[tabled(rename = "Status")]
    pub status: String,
}

/// Changed sector for the diff command
#[derive(Debug, PartialEq, Eq, Tabled, Serialize)]
pub struct SectorRow {
    #[tabled(rename = "Sector")]
    pub index: usize,
    #[tabled(rename = "Address")]
    pub address: String,
    #[tabled(rename = "Changed bytes")]
    pub changed_bytes: usize,
}

/// Decoded telemetry parameter for the decode command
#[derive(Debug, PartialEq, Tabled, Serialize)]
pub struct ParameterRow {
    #[tabled(rename = "PID")]
    pub pid: u32,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Raw")]
    pub raw: u32,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
}

/// Synthetic PID for the pids command
#[derive(Debug, Tabled, Serialize)]
pub struct PidRow {
    #[tabled(rename = "PID")]
    pub pid: u32,
    #[tabled(rename = "Block")]
    pub block: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Bits")]
    pub bits: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
}

/// One frame for the frame command
#[derive(Debug, PartialEq, Eq, Tabled, Serialize)]
pub struct FrameRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Payload")]
    pub payload: String,
    #[tabled(rename = "Bytes")]
    pub bytes: String,
    #[tabled(rename = "Valid")]
    pub valid: bool,
}
