// CLI module for repolens
// Author: kelexine (https://github.com/kelexine)

use clap::Parser;
use std::path::PathBuf;

/// repolens - resilient GitHub content access with a server-side proxy endpoint
#[derive(Parser, Debug)]
#[command(name = "repolens", version, about, long_about = None)]
pub struct Args {
    /// Config file (defaults to <config dir>/repolens/config.toml)
    #[arg(long, env = "REPOLENS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Check every configured proxy once, print their health as JSON and exit
    #[arg(long)]
    pub check: bool,
}
