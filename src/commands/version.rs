use anyhow::Result;

use crate::platform::release_target;

pub fn execute() -> Result<()> {
    println!("edgewatch version {} ({})", env!("CARGO_PKG_VERSION"), release_target());
    Ok(())
}
