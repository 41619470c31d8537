use std::sync::Arc;
use std::time::Duration;

use consult_core::config::{AppConfig, ConfigError, LoadOptions, PaymentConfig, PaymentGatewayKind};
use consult_core::errors::ApplicationError;
use consult_core::gateway::{GatewayError, ManualGateway, PaymentGateway};
use consult_core::workflow::{ConsultationEngine, WorkflowPolicy};
use consult_db::repositories::{SqlAdvisorRepository, SqlConsultationRepository};
use consult_db::{connect, migrations, ConsultationService, DbPool};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::gateway::HttpPaymentGateway;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<ConsultationService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("workflow policy rejected: {0}")]
    Workflow(#[source] ApplicationError),
    #[error("payment gateway setup failed: {0}")]
    Gateway(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        request_id = "-",
        "starting application bootstrap"
    );

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        request_id = "-",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        request_id = "-",
        "database migrations applied"
    );

    let policy = WorkflowPolicy::from_config(&config.workflow).map_err(BootstrapError::Workflow)?;
    let gateway = payment_gateway(&config.payment)?;
    info!(
        event_name = "system.bootstrap.gateway_ready",
        correlation_id = "bootstrap",
        request_id = "-",
        gateway = gateway.name(),
        "payment gateway configured"
    );

    let service = Arc::new(ConsultationService::new(
        Arc::new(SqlConsultationRepository::new(db_pool.clone())),
        Arc::new(SqlAdvisorRepository::new(db_pool.clone())),
        gateway,
        Arc::new(TracingAuditSink),
        ConsultationEngine::new(policy),
    ));

    Ok(Application { config, db_pool, service })
}

fn payment_gateway(config: &PaymentConfig) -> Result<Arc<dyn PaymentGateway>, BootstrapError> {
    match config.gateway {
        PaymentGatewayKind::Manual => Ok(Arc::new(ManualGateway)),
        PaymentGatewayKind::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                BootstrapError::Gateway("payment.endpoint is not configured".to_string())
            })?;
            let api_key = config.api_key.clone().ok_or_else(|| {
                BootstrapError::Gateway("payment.api_key is not configured".to_string())
            })?;
            let gateway =
                HttpPaymentGateway::new(endpoint, api_key, Duration::from_secs(config.timeout_secs))
                    .map_err(|error: GatewayError| BootstrapError::Gateway(error.to_string()))?;
            Ok(Arc::new(gateway))
        }
    }
}
