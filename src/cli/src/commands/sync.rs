//! `modcache load` and `modcache export` commands.

use clap::Args;
use modcache_core::model::{SyncMode, SyncSummary};
use modcache_runtime::SyncDriver;

use crate::output;

use super::GlobalArgs;

#[derive(Args, Debug, Default)]
pub struct SyncArgs {
    /// Only print the summary line
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    global: &GlobalArgs,
    mode: SyncMode,
    args: SyncArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.sync_config()?;
    let records = global.load_manifest(&config).await?;
    let driver = SyncDriver::from_config(&config)?;

    let reports = driver.run(mode, records).await;

    if !args.quiet {
        println!("{}", output::report_table(&reports));
    }
    println!("{}", output::summary_line(&SyncSummary::from_reports(&reports)));

    super::check_strict(global, &reports)
}
