use anyhow::Result;

use unpublisher_core::policy::ConfigureRequest;
use unpublisher_core::AppConfig;

use super::{format_time, Admin};

pub async fn run(
    config: &AppConfig,
    token: Option<String>,
    policy_id: &str,
    enable: bool,
    disable: bool,
    since: Option<String>,
    recurrence: Option<String>,
) -> Result<()> {
    let admin = Admin::connect(config, token).await?;

    let enabled = if enable {
        true
    } else if disable {
        false
    } else {
        admin.status(policy_id).await?.enabled
    };

    let request = ConfigureRequest {
        enabled,
        since_date: since,
        recurrence,
    };
    let policy = admin.configure(policy_id, &request).await?;

    println!(
        "Policy '{}' is {} ({}).",
        policy.policy_id,
        if policy.enabled { "enabled" } else { "disabled" },
        policy.recurrence
    );
    if policy.enabled {
        println!("  Next due: {}", format_time(policy.next_due_at));
    }

    Ok(())
}
