use consult_core::config::{AppConfig, LoadOptions, PaymentGatewayKind};
use consult_core::workflow::WorkflowPolicy;
use consult_db::{connect, migrations, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_workflow_policy(&config));
            checks.push(check_payment_gateway(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in
                ["workflow_policy", "payment_gateway_readiness", "database_connectivity", "schema_version"]
            {
                checks.push(skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str, details: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: details.to_string() }
}

fn check_workflow_policy(config: &AppConfig) -> DoctorCheck {
    match WorkflowPolicy::from_config(&config.workflow) {
        Ok(policy) => DoctorCheck {
            name: "workflow_policy",
            status: CheckStatus::Pass,
            details: format!(
                "fan_out={}, offer_ttl_minutes={}, advisor_share_pct={}",
                policy.fan_out,
                policy.offer_ttl.num_minutes(),
                config.workflow.advisor_share_pct
            ),
        },
        Err(error) => DoctorCheck {
            name: "workflow_policy",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_payment_gateway(config: &AppConfig) -> DoctorCheck {
    match config.payment.gateway {
        PaymentGatewayKind::Manual => DoctorCheck {
            name: "payment_gateway_readiness",
            status: CheckStatus::Pass,
            details: "manual gateway holds funds locally".to_string(),
        },
        PaymentGatewayKind::Http => {
            let ready = config.payment.endpoint.is_some() && config.payment.api_key.is_some();
            DoctorCheck {
                name: "payment_gateway_readiness",
                status: if ready { CheckStatus::Pass } else { CheckStatus::Fail },
                details: match &config.payment.endpoint {
                    Some(endpoint) if ready => format!("http gateway at `{endpoint}`"),
                    _ => "http gateway needs payment.endpoint and payment.api_key".to_string(),
                },
            }
        }
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("schema_version", "skipped because the database was not reached"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped("schema_version", "skipped because the database was not reached"),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };
        let schema = check_schema_version(&pool).await;
        pool.close().await;
        vec![connectivity, schema]
    })
}

async fn check_schema_version(pool: &DbPool) -> DoctorCheck {
    let expected = migrations::known_versions();

    match migrations::applied_versions(pool).await {
        Ok(Some(applied)) if applied >= expected => DoctorCheck {
            name: "schema_version",
            status: CheckStatus::Pass,
            details: format!("{applied} of {expected} migrations applied"),
        },
        Ok(Some(applied)) => DoctorCheck {
            name: "schema_version",
            status: CheckStatus::Fail,
            details: format!("{applied} of {expected} migrations applied; run `consult migrate`"),
        },
        Ok(None) => DoctorCheck {
            name: "schema_version",
            status: CheckStatus::Fail,
            details: "no migration history found; run `consult migrate`".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "schema_version",
            status: CheckStatus::Fail,
            details: format!("failed to read migration history: {error}"),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
