//! Consultation lifecycle orchestration.
//!
//! Loads the rows an operation needs, asks [`ConsultationEngine`] for a changeset, calls the
//! payment gateway where one is involved, and hands the changeset to the store. Every outcome
//! is logged with the caller's correlation id and mirrored to the audit sink.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};

use consult_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use consult_core::domain::actor::{ActorRole, CallContext};
use consult_core::domain::advisor::AdvisorId;
use consult_core::domain::assignment::{AssignmentDecision, AssignmentId, RequestAssignment};
use consult_core::domain::order::{Order, OrderId};
use consult_core::domain::request::{ConsultationRequest, RequestId, UserId};
use consult_core::domain::settlement::Settlement;
use consult_core::domain::transition::RequestTransition;
use consult_core::errors::ApplicationError;
use consult_core::gateway::PaymentGateway;
use consult_core::workflow::{Changeset, ConsultationEngine, NewRequest, PaymentOutcome};

use crate::repositories::{AdvisorRepository, ConsultationRepository, RepositoryError};

/// A request with everything the caller is allowed to see about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDetail {
    pub request: ConsultationRequest,
    pub assignments: Vec<RequestAssignment>,
    pub orders: Vec<Order>,
    pub settlement: Option<Settlement>,
    pub transitions: Vec<RequestTransition>,
}

/// An open offer together with the request it is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offer {
    pub assignment: RequestAssignment,
    pub request: ConsultationRequest,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpirySummary {
    pub expired: usize,
    /// Offers answered or expired by someone else between the scan and the write.
    pub skipped: usize,
}

pub struct ConsultationService {
    requests: Arc<dyn ConsultationRepository>,
    advisors: Arc<dyn AdvisorRepository>,
    gateway: Arc<dyn PaymentGateway>,
    audit: Arc<dyn AuditSink>,
    engine: ConsultationEngine,
}

impl ConsultationService {
    pub fn new(
        requests: Arc<dyn ConsultationRepository>,
        advisors: Arc<dyn AdvisorRepository>,
        gateway: Arc<dyn PaymentGateway>,
        audit: Arc<dyn AuditSink>,
        engine: ConsultationEngine,
    ) -> Self {
        Self { requests, advisors, gateway, audit, engine }
    }

    pub fn engine(&self) -> &ConsultationEngine {
        &self.engine
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub async fn create_request(
        &self,
        ctx: &CallContext,
        input: NewRequest,
    ) -> Result<(ConsultationRequest, Vec<RequestAssignment>), ApplicationError> {
        let result = async {
            let advisors = self.advisors.list_active().await?;
            let changeset = self.engine.create_request(&ctx.actor, input, &advisors, now())?;
            let request = created_request(&changeset)?;
            let assignments = changeset.assignments_after().cloned().collect::<Vec<_>>();
            self.requests.apply(changeset).await?;
            Ok::<_, ApplicationError>((request, assignments))
        }
        .await;

        let request_id = result.as_ref().ok().map(|(request, _)| request.id.clone());
        self.observe(ctx, "consultation.created", request_id.as_ref(), result)
    }

    pub async fn advisor_respond(
        &self,
        ctx: &CallContext,
        assignment_id: &AssignmentId,
        decision: AssignmentDecision,
        reason: Option<String>,
    ) -> Result<(RequestAssignment, ConsultationRequest), ApplicationError> {
        let result = async {
            let assignment = self
                .requests
                .find_assignment(assignment_id)
                .await?
                .ok_or_else(|| ApplicationError::not_found("assignment", assignment_id.0.clone()))?;
            let request = self.load_request(&assignment.request_id).await?;

            let changeset =
                self.engine.respond(&ctx.actor, &request, &assignment, decision, reason, now())?;
            let updated = changeset.assignments_after().next().cloned().unwrap_or(assignment);
            let request = changeset.request_after().cloned().unwrap_or(request);
            self.requests.apply(changeset).await?;
            Ok::<_, ApplicationError>((updated, request))
        }
        .await;

        let request_id = result.as_ref().ok().map(|(assignment, _)| assignment.request_id.clone());
        self.observe(ctx, "assignment.responded", request_id.as_ref(), result)
    }

    /// Reserves funds for an accepted request. The gateway is called before anything is
    /// written; if the write then loses a race the reservation is left for the gateway to void.
    pub async fn reserve_payment(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<(Order, ConsultationRequest), ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let orders = self.requests.list_orders(request_id).await?;
            let pending = self.engine.prepare_reservation(&ctx.actor, &request, &orders)?;

            let reservation = self
                .gateway
                .reserve(pending.reservation.clone())
                .await
                .map_err(|error| ApplicationError::Upstream(error.to_string()))?;
            info!(
                event_name = "payment.gateway.reserved",
                correlation_id = %ctx.correlation_id,
                request_id = %request_id.0,
                order_id = %pending.order_id.0,
                gateway = %self.gateway.name(),
                reference = %reservation.reference,
                "payment gateway accepted reservation"
            );

            let changeset = self.engine.record_reservation(
                &ctx.actor,
                &request,
                pending,
                self.gateway.name(),
                reservation,
                now(),
            )?;
            let order = changeset.orders_after().next().cloned().ok_or_else(|| {
                ApplicationError::Persistence("reservation produced no order".to_string())
            })?;
            let request = changeset.request_after().cloned().unwrap_or(request);
            self.requests.apply(changeset).await?;
            Ok::<_, ApplicationError>((order, request))
        }
        .await;

        self.observe(ctx, "payment.reserved", Some(request_id), result)
    }

    pub async fn confirm_payment(
        &self,
        ctx: &CallContext,
        order_id: &OrderId,
        outcome: PaymentOutcome,
    ) -> Result<(Order, ConsultationRequest), ApplicationError> {
        let result = async {
            let order = self
                .requests
                .find_order(order_id)
                .await?
                .ok_or_else(|| ApplicationError::not_found("order", order_id.0.clone()))?;
            let request = self.load_request(&order.request_id).await?;

            let changeset =
                self.engine.confirm_payment(&ctx.actor, &request, &order, outcome, now())?;
            let order = changeset.orders_after().next().cloned().unwrap_or(order);
            let request = changeset.request_after().cloned().unwrap_or(request);
            self.requests.apply(changeset).await?;
            Ok::<_, ApplicationError>((order, request))
        }
        .await;

        let request_id = result.as_ref().ok().map(|(order, _)| order.request_id.clone());
        self.observe(ctx, "payment.confirmed", request_id.as_ref(), result)
    }

    pub async fn start_session(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<ConsultationRequest, ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let changeset = self.engine.start_session(&ctx.actor, &request, now())?;
            self.commit_request(changeset, request).await
        }
        .await;

        self.observe(ctx, "session.started", Some(request_id), result)
    }

    pub async fn complete_and_release(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<(ConsultationRequest, Settlement), ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let orders = self.requests.list_orders(request_id).await?;
            let changeset =
                self.engine.complete_and_release(&ctx.actor, &request, &orders, now())?;
            let settlement = changeset.settlement.clone().ok_or_else(|| {
                ApplicationError::Persistence("release produced no settlement".to_string())
            })?;
            let request = self.commit_request(changeset, request).await?;
            Ok::<_, ApplicationError>((request, settlement))
        }
        .await;

        self.observe(ctx, "session.released", Some(request_id), result)
    }

    pub async fn promote_next_candidate(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<RequestAssignment, ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let assignments = self.requests.list_assignments(request_id).await?;
            let advisors = self.advisors.list_active().await?;
            let changeset = self.engine.promote_next_candidate(
                &ctx.actor,
                &request,
                &assignments,
                &advisors,
                now(),
            )?;
            let offer = changeset.assignments_after().next().cloned().ok_or_else(|| {
                ApplicationError::Persistence("promotion produced no offer".to_string())
            })?;
            self.requests.apply(changeset).await?;
            Ok::<_, ApplicationError>(offer)
        }
        .await;

        self.observe(ctx, "assignment.promoted", Some(request_id), result)
    }

    pub async fn close_request(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
        reason: Option<String>,
    ) -> Result<ConsultationRequest, ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let assignments = self.requests.list_assignments(request_id).await?;
            let orders = self.requests.list_orders(request_id).await?;
            let changeset =
                self.engine.close(&ctx.actor, &request, &assignments, &orders, reason, now())?;
            self.commit_request(changeset, request).await
        }
        .await;

        self.observe(ctx, "consultation.closed", Some(request_id), result)
    }

    pub async fn rate_request(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<ConsultationRequest, ApplicationError> {
        let result = async {
            let request = self.load_request(request_id).await?;
            let changeset = self.engine.rate(&ctx.actor, &request, rating, comment, now())?;
            self.commit_request(changeset, request).await
        }
        .await;

        self.observe(ctx, "consultation.rated", Some(request_id), result)
    }

    /// Operator-triggered sweep over offers older than the configured TTL.
    pub async fn expire_stale_offers(
        &self,
        ctx: &CallContext,
    ) -> Result<ExpirySummary, ApplicationError> {
        let result = if ctx.actor.is_privileged() {
            expire_stale_offers(self.requests.as_ref(), &self.engine, now()).await
        } else {
            Err(ApplicationError::Forbidden("offer expiry is restricted to operators".to_string()))
        };

        self.observe(ctx, "assignment.expired", None, result)
    }

    pub async fn list_requests(
        &self,
        ctx: &CallContext,
        user_id: &UserId,
    ) -> Result<Vec<ConsultationRequest>, ApplicationError> {
        self.engine.ensure_can_list_requests(&ctx.actor, user_id)?;
        Ok(self.requests.list_requests_for_user(user_id).await?)
    }

    /// Requests the caller may not see are reported as missing.
    pub async fn get_request(
        &self,
        ctx: &CallContext,
        request_id: &RequestId,
    ) -> Result<RequestDetail, ApplicationError> {
        let request = self.load_request(request_id).await?;
        let assignments = self.requests.list_assignments(request_id).await?;
        if !self.engine.can_view(&ctx.actor, &request, &assignments) {
            return Err(ApplicationError::not_found("request", request_id.0.clone()));
        }

        let owner_view =
            ctx.actor.is_privileged() || ctx.actor.is(ActorRole::User, &request.user_id.0);
        let orders = if owner_view { self.requests.list_orders(request_id).await? } else { Vec::new() };
        let settlement = self.requests.find_settlement(request_id).await?;
        let transitions = self.engine.visible_transitions(
            &ctx.actor,
            &request,
            self.requests.list_transitions(request_id).await?,
        );
        let assignments = self.engine.visible_assignments(&ctx.actor, &request, &assignments);

        Ok(RequestDetail { request, assignments, orders, settlement, transitions })
    }

    pub async fn list_offers(
        &self,
        ctx: &CallContext,
        advisor_id: &AdvisorId,
    ) -> Result<Vec<Offer>, ApplicationError> {
        self.engine.ensure_can_list_offers(&ctx.actor, advisor_id)?;

        let assignments = self.requests.list_open_offers(advisor_id).await?;
        let mut offers = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            if let Some(request) = self.requests.find_request(&assignment.request_id).await? {
                offers.push(Offer { assignment, request });
            }
        }
        Ok(offers)
    }

    async fn load_request(
        &self,
        request_id: &RequestId,
    ) -> Result<ConsultationRequest, ApplicationError> {
        self.requests
            .find_request(request_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("request", request_id.0.clone()))
    }

    async fn commit_request(
        &self,
        changeset: Changeset,
        fallback: ConsultationRequest,
    ) -> Result<ConsultationRequest, ApplicationError> {
        let request = changeset.request_after().cloned().unwrap_or(fallback);
        self.requests.apply(changeset).await?;
        Ok(request)
    }

    fn observe<T>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        request_id: Option<&RequestId>,
        result: Result<T, ApplicationError>,
    ) -> Result<T, ApplicationError> {
        let category = if operation.starts_with("payment.") {
            AuditCategory::Payment
        } else {
            AuditCategory::Workflow
        };
        let request_label = request_id.map(|id| id.0.as_str()).unwrap_or("-");

        match &result {
            Ok(_) => {
                info!(
                    event_name = operation,
                    correlation_id = %ctx.correlation_id,
                    request_id = %request_label,
                    actor = %ctx.actor.label(),
                    "consultation operation applied"
                );
                self.audit.emit(AuditEvent::new(
                    request_id.cloned(),
                    ctx.correlation_id.clone(),
                    operation,
                    category,
                    ctx.actor.label(),
                    AuditOutcome::Success,
                ));
            }
            Err(error) => {
                let outcome = match error {
                    ApplicationError::Persistence(_)
                    | ApplicationError::Upstream(_)
                    | ApplicationError::Configuration(_) => AuditOutcome::Failed,
                    _ => AuditOutcome::Rejected,
                };
                warn!(
                    event_name = operation,
                    correlation_id = %ctx.correlation_id,
                    request_id = %request_label,
                    actor = %ctx.actor.label(),
                    error = %error,
                    "consultation operation refused"
                );
                self.audit.emit(
                    AuditEvent::new(
                        request_id.cloned(),
                        ctx.correlation_id.clone(),
                        operation,
                        category,
                        ctx.actor.label(),
                        outcome,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }

        result
    }
}

/// Expires every offer whose TTL has elapsed at `now`. Offers that changed between the scan
/// and the write are counted as skipped rather than failing the sweep.
pub async fn expire_stale_offers(
    repo: &dyn ConsultationRepository,
    engine: &ConsultationEngine,
    now: DateTime<Utc>,
) -> Result<ExpirySummary, ApplicationError> {
    let cutoff = now - engine.policy().offer_ttl;
    let candidates = repo.list_offered_until(cutoff).await?;
    let mut summary = ExpirySummary::default();

    for assignment in engine.stale_offers(&candidates, now) {
        let changeset = engine.expire_offer(assignment, now)?;
        match repo.apply(changeset).await {
            Ok(()) => summary.expired += 1,
            Err(RepositoryError::Conflict(_)) => summary.skipped += 1,
            Err(error) => return Err(error.into()),
        }
    }

    Ok(summary)
}

/// Wall-clock time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn created_request(changeset: &Changeset) -> Result<ConsultationRequest, ApplicationError> {
    changeset
        .request_after()
        .cloned()
        .ok_or_else(|| ApplicationError::Persistence("create produced no request".to_string()))
}
