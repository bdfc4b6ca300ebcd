//! `modcache archives` command.

use clap::Args;
use modcache_runtime::{engine, ArchiveCache};

use crate::output;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct ArchivesArgs {
    /// Only show archive paths (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    global: &GlobalArgs,
    args: ArchivesArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.sync_config()?;
    let cache = ArchiveCache::new(config.archive_dir.clone(), engine::from_config(&config)?);
    let entries = cache.list().await?;

    if args.quiet {
        for entry in &entries {
            println!("{}", entry.path.display());
        }
        return Ok(());
    }

    let mut table = output::new_table(&["NAME", "TAGS", "SIZE", "MODIFIED"]);
    for entry in &entries {
        let tags = if entry.repo_tags.is_empty() {
            "-".to_string()
        } else {
            entry.repo_tags.join(", ")
        };
        table.add_row(vec![
            entry.name.clone(),
            tags,
            output::format_bytes(entry.size_bytes),
            entry
                .modified
                .as_ref()
                .map(output::format_ago)
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    Ok(())
}
