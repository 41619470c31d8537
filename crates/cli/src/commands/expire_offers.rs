use crate::commands::{load_config, open_database, runtime, CommandResult};
use consult_core::workflow::{ConsultationEngine, WorkflowPolicy};
use consult_db::repositories::SqlConsultationRepository;
use consult_db::service::{expire_stale_offers, now};

pub fn run() -> CommandResult {
    let config = match load_config("expire-offers") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let engine = match WorkflowPolicy::from_config(&config.workflow) {
        Ok(policy) => ConsultationEngine::new(policy),
        Err(error) => {
            return CommandResult::failure(
                "expire-offers",
                "config_validation",
                error.to_string(),
                2,
            );
        }
    };
    let runtime = match runtime("expire-offers") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let repo = SqlConsultationRepository::new(pool.clone());
        let summary = expire_stale_offers(&repo, &engine, now())
            .await
            .map_err(|error| ("expiry_sweep", error.to_string(), 7u8));
        pool.close().await;
        summary
    });

    match result {
        Ok(summary) => CommandResult::success(
            "expire-offers",
            format!(
                "expired {} stale offers ({} skipped, ttl {} minutes)",
                summary.expired,
                summary.skipped,
                config.workflow.offer_ttl_minutes
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire-offers", error_class, message, exit_code)
        }
    }
}
