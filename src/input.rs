//! Reading process lists from text or JSON.
//!
//! Text format, one descriptor per line:
//!
//! ```text
//! # burst io_operations
//! 2 1
//! 5 2
//! ```
//!
//! Blank lines and `#` comments are ignored. Values are parsed as signed
//! integers; range checks belong to [`RunConfig::validate`].

use std::fs;
use std::path::Path;

use crate::config::{ProcessSpec, RunConfig, SchedulerConfig};
use crate::error::ConfigError;

/// Parse a text process list.
pub fn parse_process_list(text: &str) -> Result<Vec<ProcessSpec>, ConfigError> {
    let mut specs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = match raw.find('#') {
            Some(pos) => &raw[..pos],
            None => raw,
        }
        .trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let burst = parse_field(fields.next(), "burst", line_no)?;
        let io_operations = parse_field(fields.next(), "io_operations", line_no)?;
        if let Some(extra) = fields.next() {
            return Err(ConfigError::Parse {
                line: line_no,
                detail: format!("unexpected trailing field {extra:?}"),
            });
        }
        specs.push(ProcessSpec::new(burst, io_operations));
    }
    Ok(specs)
}

fn parse_field(field: Option<&str>, name: &str, line: usize) -> Result<i64, ConfigError> {
    let Some(raw) = field else {
        return Err(ConfigError::Parse {
            line,
            detail: format!("missing {name}"),
        });
    };
    raw.parse::<i64>().map_err(|err| ConfigError::Parse {
        line,
        detail: format!("{name} {raw:?}: {err}"),
    })
}

/// Load a run description from `path`.
///
/// `.json` files hold a full [`RunConfig`]; anything else is a text process
/// list run with default scheduler tuning.
pub fn load_run_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        Ok(RunConfig::new(
            SchedulerConfig::default(),
            parse_process_list(&text)?,
        ))
    }
}
