use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about = "Rebuild stale targets, one dependency level at a time", long_about = None)]
pub struct Cli {
    #[arg(
        short = 'f',
        long = "file",
        value_name = "PATH",
        help = "Build description file (default: Makefile)"
    )]
    pub file: Option<PathBuf>,
}
