use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::fmt::Write;
use std::fs::DirBuilder;
use std::io;
use std::path::{Path, PathBuf};

/// Substitute strftime tokens (`%Y`, `%H`, ...) in an output template.
///
/// Evaluated once at session start; the recording keeps this name even if it
/// runs past midnight.
pub fn expand_output_template(template: &Path, now: DateTime<Local>) -> anyhow::Result<PathBuf> {
    let raw = template.to_string_lossy();
    if !raw.contains('%') {
        return Ok(template.to_path_buf());
    }

    let items: Vec<Item> = StrftimeItems::new(&raw).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        anyhow::bail!("invalid timestamp token in output path '{}'", raw);
    }

    let mut expanded = String::with_capacity(raw.len() + 16);
    write!(expanded, "{}", now.format_with_items(items.iter()))
        .map_err(|_| anyhow::anyhow!("cannot format output path '{}'", raw))?;

    Ok(PathBuf::from(expanded))
}

/// Make sure the directory that will hold `output` exists.
pub fn prepare_output_dir(output: &Path) -> io::Result<()> {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            DirBuilder::new().recursive(true).create(parent)
        }
        _ => Ok(()),
    }
}
