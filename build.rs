// build.rs

use clap::CommandFactory;
use clap_mangen::Man;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

// Same argument definitions as the binary
#[allow(dead_code)]
#[path = "src/cli/args.rs"]
mod args;

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/cli/args.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?);
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir)?;

    let man = Man::new(args::Cli::command());
    let mut buffer = Vec::new();
    man.render(&mut buffer)?;

    let man_path = man_dir.join("rustpack.1");
    fs::write(&man_path, buffer)?;

    println!("cargo:warning=Man page generated at {}", man_path.display());
    Ok(())
}
