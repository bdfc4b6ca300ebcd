//! `modcache plan` command.

use clap::Args;
use modcache_runtime::{PlanEntry, SyncDriver};

use crate::output;

use super::GlobalArgs;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Include the module template URL for repository modules
    #[arg(long)]
    pub templates: bool,
}

pub async fn execute(global: &GlobalArgs, args: PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = global.sync_config()?;
    let records = global.load_manifest(&config).await?;
    let driver = SyncDriver::from_config(&config)?;

    let plan = driver.plan(records).await;

    let mut headers = vec!["MODULE", "IMAGE", "ACTION"];
    if args.templates {
        headers.push("TEMPLATE");
    }
    let mut table = output::new_table(&headers);
    for entry in &plan {
        let mut row = vec![
            entry.report.module_id.clone(),
            entry.report.image.clone().unwrap_or_else(|| "-".to_string()),
            action_label(entry),
        ];
        if args.templates {
            row.push(entry.template_url.clone().unwrap_or_default());
        }
        table.add_row(row);
    }
    println!("{table}");

    let reports: Vec<_> = plan.into_iter().map(|entry| entry.report).collect();
    super::check_strict(global, &reports)
}

fn action_label(entry: &PlanEntry) -> String {
    match (&entry.action, &entry.report.detail) {
        (Some(action), _) => action.to_string(),
        (None, Some(detail)) => format!("{}: {detail}", entry.report.outcome),
        (None, None) => entry.report.outcome.to_string(),
    }
}
