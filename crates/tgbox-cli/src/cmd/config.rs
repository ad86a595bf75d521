use anyhow::{Context as _, Result};

use crate::context::Context;

pub fn show(ctx: &Context) -> Result<()> {
    if ctx.config_path.exists() {
        println!("# Configuration from: {}", ctx.config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            ctx.config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(&ctx.config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
