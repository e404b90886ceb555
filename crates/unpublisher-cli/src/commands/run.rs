use anyhow::Result;

use unpublisher_core::scheduler::FiringOutcome;
use unpublisher_core::AppConfig;

use super::Admin;

pub async fn run(config: &AppConfig, token: Option<String>, policy_id: &str) -> Result<()> {
    let admin = Admin::connect(config, token).await?;

    match admin.run(policy_id).await? {
        FiringOutcome::Fired { run } => {
            println!(
                "Run {} of '{}': {} ({} candidates, {} queued in {} chunks)",
                run.id,
                policy_id,
                run.status,
                run.candidate_count,
                run.dispatched_count,
                run.chunks_committed
            );
            if let Some(error) = run.error {
                println!("  {}", error);
            }
        }
        FiringOutcome::Busy => println!("Policy '{}' is already running.", policy_id),
        FiringOutcome::NotDue { .. } => println!("Policy '{}' did not fire.", policy_id),
    }

    Ok(())
}
