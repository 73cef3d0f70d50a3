//! Output formatting: table, JSON, YAML.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Section heading for table views.
pub fn heading(title: &str, color: bool) -> String {
    if color {
        title.bold().cyan().to_string()
    } else {
        title.to_owned()
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a serde-serializable item in the chosen format. `table_fn`
/// builds the human view for `table`.
pub fn render<T>(
    format: OutputFormat,
    data: &T,
    table_fn: impl FnOnce(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize + ?Sized,
{
    match format {
        OutputFormat::Table => Ok(table_fn(data)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(data)?),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", output.trim_end());
}

// ── Table renderer ───────────────────────────────────────────────────

pub fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, Tabled)]
    struct Row {
        name: &'static str,
        rate: f64,
    }

    #[test]
    fn formats() {
        let rows = [Row { name: "a", rate: 2.0 }];
        let json = render(OutputFormat::JsonCompact, &rows[..], |_| String::new()).unwrap();
        assert_eq!(json, r#"[{"name":"a","rate":2.0}]"#);

        let yaml = render(OutputFormat::Yaml, &rows[..], |_| String::new()).unwrap();
        assert!(yaml.contains("name: a"));

        let table = render(OutputFormat::Table, &rows[..], render_table).unwrap();
        assert!(table.contains("rate") && table.contains('╭'));
    }

    #[test]
    fn plain_heading_without_color() {
        assert_eq!(heading("Devices", false), "Devices");
        assert!(heading("Devices", true).contains("\u{1b}["));
    }
}
