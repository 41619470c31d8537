use crate::commands::{load_config, open_database, runtime, CommandResult, StepError};
use consult_db::{AdvisorSeedDataset, AdvisorSeedInfo};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = AdvisorSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = AdvisorSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<Vec<AdvisorSeedInfo>, StepError> = if verification.all_present {
            Ok(seed_result.advisors_seeded)
        } else {
            let failed = failed_checks(&verification.checks);
            Err(("seed_verification", verification_message(&failed), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(advisors) => {
            let lines: Vec<String> = advisors
                .iter()
                .map(|advisor| {
                    let state = if advisor.active { "active" } else { "inactive" };
                    format!("  - {}: {} ({state})", advisor.advisor_id, advisor.display_name)
                })
                .collect();
            let message =
                format!("advisor roster loaded ({} advisors):\n{}", advisors.len(), lines.join("\n"));
            CommandResult::success("seed", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn failed_checks(checks: &[(&'static str, bool)]) -> Vec<&'static str> {
    checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect()
}

fn verification_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed.join(", "))
    }
}
