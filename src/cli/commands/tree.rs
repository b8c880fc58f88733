use crate::cli::Output;
use crate::session::ProjectFile;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct TreeArgs {
    /// Project file written by `sitesieve run --project`
    pub project: PathBuf,
}

pub fn execute(args: TreeArgs, output: &Output) -> Result<()> {
    let tree = ProjectFile::load(&args.project)?.lineage()?;
    output.header(&format!("Lineage of {}", args.project.display()));
    // The tree itself is the command's result and is printed even in quiet mode
    print!("{}", tree.render());
    Ok(())
}
