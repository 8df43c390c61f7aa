//! Variable list file: which data points to poll, and how
//!
//! Plain text, `#` starts a comment, blank lines are skipped. Four
//! whitespace-separated columns per line:
//!
//! ```text
//! # name        forward  address  type
//! temp_outdoor  yes      0x0800   degC
//! sys_time      no       0x088e   systime
//! ```

use std::fs;
use std::path::Path;

use crate::decode::{self, Codec};
use crate::error::{Result, VitoError};

/// One data point to poll: where to read it, how long it is, how to
/// decode it, and whether to forward it to the sink
#[derive(Debug, Clone)]
pub struct VariableDescriptor {
    pub name: String,
    pub forward: bool,
    pub addr: u16,
    pub codec: Codec,
}

/// Load and resolve a variable list file
pub fn load_variable_list(path: &Path) -> Result<Vec<VariableDescriptor>> {
    let content = fs::read_to_string(path)?;
    parse_variable_list(&content, path)
}

fn parse_variable_list(content: &str, origin: &Path) -> Result<Vec<VariableDescriptor>> {
    let mut list = Vec::new();

    for (lno, raw) in content.lines().enumerate() {
        let lno = lno + 1;
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 4 {
            return Err(list_error(origin, lno, "not enough columns, need at least 4"));
        }

        let forward = parse_flag(columns[1])
            .ok_or_else(|| list_error(origin, lno, &format!(
                "cannot parse {:?} as yes/no/true/false",
                columns[1]
            )))?;

        let addr = decode::parse_int(columns[2])
            .filter(|&a| a <= u16::MAX as u64)
            .ok_or_else(|| list_error(origin, lno, &format!(
                "bad address {:?}",
                columns[2]
            )))? as u16;

        let codec = decode::resolve(columns[3]).map_err(|e| {
            list_error(origin, lno, &e.to_string())
        })?;

        list.push(VariableDescriptor {
            name: columns[0].to_string(),
            forward,
            addr,
            codec,
        });
    }

    Ok(list)
}

/// Parse the forward-to-sink column
fn parse_flag(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "yes" | "true" | "t" | "y" | "1" | "x" | "✓" | "🗸" => Some(true),
        "no" | "false" | "f" | "n" | "0" | "-" => Some(false),
        _ => None,
    }
}

fn list_error(origin: &Path, line: usize, reason: &str) -> VitoError {
    VitoError::VariableList {
        file: origin.to_path_buf(),
        line,
        reason: reason.to_string(),
    }
}
