use anyhow::Result;

use unpublisher_core::AppConfig;

use super::{format_time, Admin};

pub async fn run(config: &AppConfig, token: Option<String>) -> Result<()> {
    let admin = Admin::connect(config, token).await?;
    let policies = admin.list().await?;

    if policies.is_empty() {
        println!("No policies configured.");
        return Ok(());
    }

    println!("Policies ({}):\n", policies.len());

    for policy in &policies {
        let state = if policy.enabled { "enabled" } else { "disabled" };
        let filter = policy
            .content_filter
            .as_ref()
            .map(|f| format!(" where {} = {}", f.key, f.value))
            .unwrap_or_default();

        println!(
            "  {} [{}] - {} {} older than {}{}",
            policy.policy_id, state, policy.recurrence, policy.content_type, policy.retention, filter
        );
        if let Some(since) = policy.since_date {
            println!("    Since: {}", since);
        }
        println!("    Last run: {}", format_time(policy.last_run_at));
        println!("    Next due: {}", format_time(policy.next_due_at));
        println!();
    }

    Ok(())
}
