use std::collections::BTreeSet;

use anyhow::Result;

use unpublisher_core::AppConfig;

use super::Admin;

pub async fn run(
    config: &AppConfig,
    token: Option<String>,
    policy_id: &str,
    ids: Vec<i64>,
) -> Result<()> {
    let admin = Admin::connect(config, token).await?;
    let exclusions: BTreeSet<i64> = ids.into_iter().collect();
    let policy = admin.update_exclusions(policy_id, &exclusions).await?;

    if policy.exclusion_list.is_empty() {
        println!("Policy '{}' has no exclusions.", policy.policy_id);
    } else {
        let ids: Vec<String> = policy.exclusion_list.iter().map(ToString::to_string).collect();
        println!("Policy '{}' excludes: {}", policy.policy_id, ids.join(", "));
    }
    Ok(())
}
