use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use std::io::Write;

use crate::theme::{ICONS, THEME};

/// Output format options.
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Human-readable output with tables (default)
    #[default]
    Table,
    /// Machine payloads only, as JSON
    Json,
}

/// Global CLI options affecting output.
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// All terminal output funnels through here, so `--quiet`, `--output
/// json`, and `--no-color` behave uniformly.
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    fn decorative(&self) -> bool {
        !self.options.quiet && self.options.output_format != OutputFormat::Json
    }

    /// Print a machine payload. Always emitted (unless quiet) — this
    /// is the command's contract output, pretty-printed.
    pub fn payload(&self, value: &serde_json::Value) {
        if self.options.quiet {
            return;
        }
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(err) => eprintln!("failed to render payload: {err}"),
        }
    }

    pub fn success(&self, message: &str) {
        if self.decorative() {
            println!("{}", self.paint(ICONS.success, message, THEME.success));
        }
    }

    pub fn error(&self, message: &str) {
        let line = self.paint(ICONS.error, message, THEME.error);
        eprintln!("{line}");
    }

    pub fn warning(&self, message: &str) {
        if self.decorative() {
            println!("{}", self.paint(ICONS.warning, message, THEME.warning));
        }
    }

    pub fn info(&self, message: &str) {
        if self.decorative() {
            println!("{}", self.paint(ICONS.info, message, THEME.info));
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.options.verbose && self.decorative() {
            eprintln!("{}", self.paint(ICONS.arrow, message, THEME.muted));
        }
    }

    pub fn heading(&self, text: &str) {
        if self.decorative() {
            if self.options.no_color {
                println!("\n{text}\n{}", "=".repeat(text.len()));
            } else {
                println!("\n{}", text.color(THEME.primary).bold());
            }
        }
    }

    pub fn bullet(&self, text: &str) {
        if self.decorative() {
            if self.options.no_color {
                println!("  {} {text}", ICONS.bullet);
            } else {
                println!("  {} {text}", ICONS.bullet.color(THEME.muted));
            }
        }
    }

    pub fn key_value(&self, key: &str, value: &str) {
        if self.decorative() {
            if self.options.no_color {
                println!("{key}: {value}");
            } else {
                println!("{}: {}", key.color(THEME.key).bold(), value.color(THEME.value));
            }
        }
    }

    /// Transient progress line; clear with [`OutputManager::clear_line`].
    pub fn progress(&self, message: &str) {
        if !self.decorative() {
            return;
        }
        let line = if self.options.no_color {
            format!("{} {message}...", ICONS.loading)
        } else {
            format!(
                "{} {}...",
                ICONS.loading.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };
        print!("\r{line}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if !self.decorative() {
            return;
        }
        print!("\r{}\r", " ".repeat(80));
        std::io::stdout().flush().ok();
    }

    /// A themed table; callers fill rows.
    pub fn create_table(&self, headers: Vec<&str>) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
            table.set_header(
                headers
                    .iter()
                    .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                    .collect::<Vec<_>>(),
            );
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
            table.set_header(
                headers
                    .iter()
                    .map(|h| {
                        Cell::new(h)
                            .add_attribute(Attribute::Bold)
                            .fg(TableColor::Cyan)
                    })
                    .collect::<Vec<_>>(),
            );
        }
        table
    }

    pub fn print_table(&self, table: Table) {
        if self.decorative() {
            println!("{table}");
        }
    }

    fn paint(&self, icon: &str, message: &str, color: colored::Color) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_mode_suppresses_decorative_output() {
        let manager = OutputManager::new(GlobalOptions {
            output_format: OutputFormat::Json,
            ..Default::default()
        });
        assert!(!manager.decorative());
    }

    #[test]
    fn test_quiet_suppresses_everything() {
        let manager = OutputManager::new(GlobalOptions {
            quiet: true,
            ..Default::default()
        });
        assert!(!manager.decorative());
        // Exercises the early-return path.
        manager.payload(&serde_json::json!({ "ignored": true }));
    }
}
