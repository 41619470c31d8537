use crate::commands::{load_config, open_database, runtime, CommandResult};
use consult_core::workflow::WorkflowPolicy;
use consult_db::repositories::{AdvisorRepository, SqlAdvisorRepository};

/// Checks everything the server needs before it binds: config, workflow policy, database and
/// schema. The server itself runs as `consult-server`.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(result) => return result,
    };

    let policy = match WorkflowPolicy::from_config(&config.workflow) {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure("start", "config_validation", error.to_string(), 2);
        }
    };

    let runtime = match runtime("start") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let active = SqlAdvisorRepository::new(pool.clone())
            .list_active()
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8))?
            .len();
        pool.close().await;
        Ok::<usize, (&'static str, String, u8)>(active)
    });

    match result {
        Ok(active) => CommandResult::success(
            "start",
            format!(
                "preflight passed: gateway={}, fan_out={}, offer_ttl_minutes={}, active_advisors={active}",
                config.payment.gateway.as_str(),
                policy.fan_out,
                policy.offer_ttl.num_minutes(),
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}
