use anyhow::Result;

use unpublisher_core::AppConfig;

use super::Admin;

pub async fn run(config: &AppConfig, token: Option<String>, policy_id: &str) -> Result<()> {
    let admin = Admin::connect(config, token).await?;
    let cleared = admin.clear_log(policy_id).await?;

    println!("Cleared {} log entries of '{}'.", cleared, policy_id);
    Ok(())
}
