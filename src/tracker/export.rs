use super::store::{render_snapshot, Layout, Snapshot};
use super::types::{ItemEntry, StageRegistry};
use crate::item::{SHOW_FIELD, TITLE_FIELD};
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("unsupported export format {other:?} (use json or csv)")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Csv => f.write_str("csv"),
        }
    }
}

pub(super) fn write_export(
    path: &Path,
    format: ExportFormat,
    snapshot: &Snapshot,
    registry: &StageRegistry,
) -> Result<()> {
    let text = match format {
        ExportFormat::Json => render_snapshot(snapshot, Layout::Flat)?,
        ExportFormat::Csv => render_csv(snapshot.items.values(), registry),
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, text.as_bytes()).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Render one header line plus one row per item; stages follow registry order.
pub fn render_csv<'a>(
    entries: impl IntoIterator<Item = &'a ItemEntry>,
    registry: &StageRegistry,
) -> String {
    let mut header = vec!["Episode".to_string(), "Show".to_string()];
    header.extend(registry.stages().iter().cloned());
    let mut lines = vec![csv_line(&header)];
    for entry in entries {
        let mut row = vec![
            entry
                .display_field(TITLE_FIELD)
                .unwrap_or(&entry.key)
                .to_string(),
            entry.display_field(SHOW_FIELD).unwrap_or_default().to_string(),
        ];
        row.extend(registry.stages().iter().map(|stage| {
            entry
                .stage_state(stage)
                .map(|state| state.as_str().to_string())
                .unwrap_or_default()
        }));
        lines.push(csv_line(&row));
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_with_separators_are_quoted() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
