use std::path::Path;

use anyhow::Result;
use ember::EmberConfig;

pub fn load_config(path: Option<&Path>) -> Result<EmberConfig> {
    match path {
        Some(path) => ember::load_config_from_path(path),
        None => ember::load_config(),
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    }
}
