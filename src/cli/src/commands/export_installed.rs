//! `modcache export-installed` command.

use clap::Args;
use modcache_core::model::SyncSummary;
use modcache_runtime::SyncDriver;

use crate::output;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct ExportInstalledArgs {
    /// Only print the summary line
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    global: &GlobalArgs,
    args: ExportInstalledArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.sync_config()?;
    let driver = SyncDriver::from_config(&config)?;

    let reports = driver.export_installed().await?;

    if !args.quiet {
        println!("{}", output::report_table(&reports));
    }
    println!("{}", output::summary_line(&SyncSummary::from_reports(&reports)));

    super::check_strict(global, &reports)
}
