use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use consult_core::audit::InMemoryAuditSink;
use consult_core::domain::actor::{Actor, ActorRole, CallContext};
use consult_core::domain::advisor::AdvisorId;
use consult_core::domain::assignment::{AssignmentDecision, AssignmentStatus};
use consult_core::domain::order::OrderStatus;
use consult_core::domain::request::{RequestStatus, UserId};
use consult_core::errors::ApplicationError;
use consult_core::gateway::ManualGateway;
use consult_core::workflow::{ConsultationEngine, NewRequest, PaymentOutcome};
use consult_db::repositories::{SqlAdvisorRepository, SqlConsultationRepository};
use consult_db::{connect_with_settings, migrations, AdvisorSeedDataset, ConsultationService};

type LifecycleTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

async fn sqlite_service() -> LifecycleTestResult<ConsultationService> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    AdvisorSeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;

    Ok(ConsultationService::new(
        Arc::new(SqlConsultationRepository::new(pool.clone())),
        Arc::new(SqlAdvisorRepository::new(pool)),
        Arc::new(ManualGateway),
        Arc::new(InMemoryAuditSink::default()),
        ConsultationEngine::default(),
    ))
}

fn ctx(id: &str, role: ActorRole) -> CallContext {
    CallContext::new(Actor::new(id, role), format!("corr-{id}"))
}

fn dec(value: &str) -> LifecycleTestResult<Decimal> {
    Decimal::from_str(value).map_err(|error| format!("decimal {value}: {error}"))
}

fn new_request(amount: &str, discount: Option<&str>) -> LifecycleTestResult<NewRequest> {
    Ok(NewRequest {
        user_id: UserId("user-001".to_string()),
        summary: "Need advice on a commercial lease renewal".to_string(),
        amount: dec(amount)?,
        currency: Some("KWD".to_string()),
        discount: discount.map(dec).transpose()?,
        attachments: Vec::new(),
    })
}

#[tokio::test]
async fn paid_consultation_runs_from_submission_to_rating() -> LifecycleTestResult {
    let service = sqlite_service().await?;
    let user = ctx("user-001", ActorRole::User);
    let system = ctx("payments", ActorRole::System);

    let (request, offers) = service
        .create_request(&user, new_request("120.000", Some("20.000"))?)
        .await
        .map_err(|error| format!("create: {error}"))?;
    require_eq!(request.status, RequestStatus::PendingAdvisor);
    require_eq!(offers.len(), 3);
    require_eq!(offers[0].advisor_id, AdvisorId("adv-seed-001".to_string()));

    let advisor = ctx("adv-seed-001", ActorRole::Advisor);
    let listed = service
        .list_offers(&advisor, &AdvisorId("adv-seed-001".to_string()))
        .await
        .map_err(|error| format!("list offers: {error}"))?;
    require_eq!(listed.len(), 1);

    let (accepted, request) = service
        .advisor_respond(&advisor, &offers[0].id, AssignmentDecision::Accept, None)
        .await
        .map_err(|error| format!("accept: {error}"))?;
    require_eq!(accepted.status, AssignmentStatus::Accepted);
    require_eq!(request.status, RequestStatus::Accepted);

    let late = service
        .advisor_respond(
            &ctx("adv-seed-002", ActorRole::Advisor),
            &offers[1].id,
            AssignmentDecision::Accept,
            None,
        )
        .await;
    require!(matches!(late, Err(ApplicationError::Conflict(_))), "late accept: {late:?}");

    let (order, request) = service
        .reserve_payment(&user, &request.id)
        .await
        .map_err(|error| format!("reserve: {error}"))?;
    require_eq!(request.status, RequestStatus::PaymentReserved);
    require_eq!(order.net_amount, dec("100.000")?);
    require_eq!(order.gateway_reference, format!("manual-{}", order.id.0));

    let (order, request) = service
        .confirm_payment(&system, &order.id, PaymentOutcome::Succeeded { payment_id: None })
        .await
        .map_err(|error| format!("confirm: {error}"))?;
    require_eq!(order.status, OrderStatus::Paid);
    require_eq!(request.status, RequestStatus::Paid);

    let request = service
        .start_session(&advisor, &request.id)
        .await
        .map_err(|error| format!("start: {error}"))?;
    require_eq!(request.status, RequestStatus::InProgress);

    let (request, settlement) = service
        .complete_and_release(&advisor, &request.id)
        .await
        .map_err(|error| format!("release: {error}"))?;
    require_eq!(request.status, RequestStatus::Released);
    require_eq!(settlement.advisor_share, dec("70.000")?);
    require_eq!(settlement.platform_fee, dec("30.000")?);

    let request = service
        .rate_request(&user, &request.id, 5, Some("Clear and practical".to_string()))
        .await
        .map_err(|error| format!("rate: {error}"))?;
    require_eq!(request.status, RequestStatus::Rated);
    require_eq!(request.rating, Some(5));

    let detail = service
        .get_request(&user, &request.id)
        .await
        .map_err(|error| format!("detail: {error}"))?;
    let path: Vec<_> = detail.transitions.iter().map(|t| t.to_status).collect();
    require_eq!(
        path,
        vec![
            RequestStatus::Submitted,
            RequestStatus::PendingAdvisor,
            RequestStatus::Accepted,
            RequestStatus::PaymentReserved,
            RequestStatus::Paid,
            RequestStatus::InProgress,
            RequestStatus::Completed,
            RequestStatus::Released,
            RequestStatus::Rated,
        ]
    );
    require!(detail.settlement.is_some());

    Ok(())
}

#[tokio::test]
async fn failed_payment_can_be_retried() -> LifecycleTestResult {
    let service = sqlite_service().await?;
    let user = ctx("user-001", ActorRole::User);
    let system = ctx("payments", ActorRole::System);

    let (request, offers) = service
        .create_request(&user, new_request("40.000", None)?)
        .await
        .map_err(|error| format!("create: {error}"))?;
    service
        .advisor_respond(
            &ctx(&offers[1].advisor_id.0, ActorRole::Advisor),
            &offers[1].id,
            AssignmentDecision::Accept,
            None,
        )
        .await
        .map_err(|error| format!("accept: {error}"))?;

    let (first, _) = service
        .reserve_payment(&user, &request.id)
        .await
        .map_err(|error| format!("reserve: {error}"))?;
    let duplicate = service.reserve_payment(&user, &request.id).await;
    require!(duplicate.is_err(), "second reservation while one is pending must fail");

    let (failed, request) = service
        .confirm_payment(
            &system,
            &first.id,
            PaymentOutcome::Failed { reason: "card declined".to_string() },
        )
        .await
        .map_err(|error| format!("confirm failure: {error}"))?;
    require_eq!(failed.status, OrderStatus::Failed);
    require_eq!(request.status, RequestStatus::Accepted);

    let (second, request) = service
        .reserve_payment(&user, &request.id)
        .await
        .map_err(|error| format!("retry: {error}"))?;
    require!(second.id != first.id);
    require_eq!(request.status, RequestStatus::PaymentReserved);

    Ok(())
}

#[tokio::test]
async fn declined_request_is_promoted_then_closed() -> LifecycleTestResult {
    let service = sqlite_service().await?;
    let user = ctx("user-001", ActorRole::User);

    let (request, offers) = service
        .create_request(&user, new_request("15.500", None)?)
        .await
        .map_err(|error| format!("create: {error}"))?;
    for offer in &offers {
        service
            .advisor_respond(
                &ctx(&offer.advisor_id.0, ActorRole::Advisor),
                &offer.id,
                AssignmentDecision::Decline,
                Some("  fully booked  ".to_string()),
            )
            .await
            .map_err(|error| format!("decline: {error}"))?;
    }

    let promoted = service.promote_next_candidate(&user, &request.id).await;
    require!(
        matches!(promoted, Err(ApplicationError::State(_))),
        "every active seed advisor was already offered: {promoted:?}"
    );

    let closed = service
        .close_request(&user, &request.id, Some("found help elsewhere".to_string()))
        .await
        .map_err(|error| format!("close: {error}"))?;
    require_eq!(closed.status, RequestStatus::Closed);
    require_eq!(closed.close_reason.as_deref(), Some("found help elsewhere"));

    let detail = service
        .get_request(&user, &request.id)
        .await
        .map_err(|error| format!("detail: {error}"))?;
    require!(detail
        .assignments
        .iter()
        .all(|a| a.status == AssignmentStatus::Declined
            && a.decline_reason.as_deref() == Some("fully booked")));

    let again = service.close_request(&user, &request.id, None).await;
    require!(matches!(again, Err(ApplicationError::State(_))));

    Ok(())
}

#[tokio::test]
async fn superseded_advisor_loses_access_and_request_is_paid_once() -> LifecycleTestResult {
    let service = sqlite_service().await?;
    let user = ctx("user-001", ActorRole::User);
    let winner = ctx("adv-seed-001", ActorRole::Advisor);
    let sibling = ctx("adv-seed-002", ActorRole::Advisor);

    let (request, offers) = service
        .create_request(&user, new_request("40.000", None)?)
        .await
        .map_err(|error| format!("create: {error}"))?;
    service
        .get_request(&sibling, &request.id)
        .await
        .map_err(|error| format!("sibling detail while pending: {error}"))?;

    service
        .advisor_respond(&winner, &offers[0].id, AssignmentDecision::Accept, None)
        .await
        .map_err(|error| format!("accept: {error}"))?;

    let hidden = service.get_request(&sibling, &request.id).await;
    require!(
        matches!(hidden, Err(ApplicationError::NotFound { .. })),
        "superseded advisor must not read the request: {hidden:?}"
    );

    let detail = service
        .get_request(&winner, &request.id)
        .await
        .map_err(|error| format!("winner detail: {error}"))?;
    require!(detail
        .transitions
        .iter()
        .all(|t| t.reason.is_none() || t.actor == "advisor:adv-seed-001"));

    service
        .reserve_payment(&user, &request.id)
        .await
        .map_err(|error| format!("reserve: {error}"))?;
    let twice = service.reserve_payment(&user, &request.id).await;
    require!(matches!(twice, Err(ApplicationError::State(_))), "second reserve: {twice:?}");

    Ok(())
}
