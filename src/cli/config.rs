//! CLI configuration view
//!
//! `callgate config` prints the configuration after every source
//! (defaults, files, environment) has been applied.

use std::path::Path;

use anyhow::{Context, Result};

use crate::loader::load_config;

pub fn run(path: Option<&Path>) -> Result<()> {
    let config = load_config(path).context("Failed to load configuration")?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    println!("# Effective callgate configuration\n");
    print!("{rendered}");
    Ok(())
}
