use anyhow::Result;

use unpublisher_core::AppConfig;

use super::{format_time, Admin};

pub async fn run(config: &AppConfig, token: Option<String>, policy_id: &str) -> Result<()> {
    let admin = Admin::connect(config, token).await?;
    let status = admin.status(policy_id).await?;

    println!("{} ({})", status.policy_id, if status.enabled { "enabled" } else { "disabled" });
    println!("  Recurrence: {}", status.recurrence);
    println!("  Retention:  {}", status.retention);
    if let Some(since) = status.since_date {
        println!("  Since:      {}", since);
    }
    println!("  Last run:   {}", format_time(status.last_run_at));
    println!("  Next due:   {}", format_time(status.next_due_at));
    println!("  Queued:     {}", status.queue_depth);

    if !status.exclusions.is_empty() {
        let ids: Vec<String> = status.exclusions.iter().map(ToString::to_string).collect();
        println!("  Excluded:   {}", ids.join(", "));
    }

    if let Some(run) = &status.last_run {
        println!(
            "  Last job:   {} - {} candidates, {} dispatched (cutoff {})",
            run.status, run.candidate_count, run.dispatched_count, run.cutoff_date
        );
        if let Some(error) = &run.error {
            println!("              {}", error);
        }
    }

    println!("\nLog:");
    for line in &status.log {
        println!("  {}", line);
    }

    Ok(())
}
