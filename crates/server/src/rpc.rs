//! JSON RPC transport for the consultation workflow.
//!
//! Mutations are `POST /trpc/{procedure}` with a `{"id", "json"}` body; queries are
//! `GET /trpc/{procedure}?input=<{"json": ...}>`. Replies carry either `result.data` or an
//! `error` object whose `data` block names the wire code, HTTP status and correlation id.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use consult_core::domain::actor::CallContext;
use consult_core::domain::advisor::AdvisorId;
use consult_core::domain::assignment::{AssignmentDecision, AssignmentId, RequestAssignment};
use consult_core::domain::order::{Order, OrderId};
use consult_core::domain::request::{ConsultationRequest, FileRef, RequestId, UserId};
use consult_core::domain::settlement::Settlement;
use consult_core::domain::transition::RequestTransition;
use consult_core::errors::{ApplicationError, InterfaceError};
use consult_core::workflow::{NewRequest, PaymentOutcome};
use consult_db::{ConsultationService, ExpirySummary, Offer, RequestDetail};

use crate::auth;

#[derive(Clone)]
pub struct RpcState {
    service: Arc<ConsultationService>,
    shared_secret: Option<SecretString>,
}

pub fn router(service: Arc<ConsultationService>, shared_secret: Option<SecretString>) -> Router {
    Router::new()
        .route("/trpc/{procedure}", get(query).post(mutation))
        .with_state(RpcState { service, shared_secret })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ProcedureKind {
    Query,
    Mutation,
}

impl ProcedureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Query => "GET",
            Self::Mutation => "POST",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Procedure {
    Create,
    AdvisorRespond,
    ReservePayment,
    ConfirmPayment,
    StartSession,
    CompleteAndRelease,
    PromoteNextCandidate,
    Close,
    Rate,
    ExpireOffers,
    List,
    Get,
    ListOffers,
}

impl Procedure {
    const ALL: [Procedure; 13] = [
        Self::Create,
        Self::AdvisorRespond,
        Self::ReservePayment,
        Self::ConfirmPayment,
        Self::StartSession,
        Self::CompleteAndRelease,
        Self::PromoteNextCandidate,
        Self::Close,
        Self::Rate,
        Self::ExpireOffers,
        Self::List,
        Self::Get,
        Self::ListOffers,
    ];

    fn path(self) -> &'static str {
        match self {
            Self::Create => "consultations.create",
            Self::AdvisorRespond => "consultations.advisorRespond",
            Self::ReservePayment => "consultations.reservePayment",
            Self::ConfirmPayment => "consultations.confirmPayment",
            Self::StartSession => "consultations.startSession",
            Self::CompleteAndRelease => "consultations.completeAndRelease",
            Self::PromoteNextCandidate => "consultations.promoteNextCandidate",
            Self::Close => "consultations.close",
            Self::Rate => "consultations.rate",
            Self::ExpireOffers => "consultations.expireOffers",
            Self::List => "consultations.list",
            Self::Get => "consultations.get",
            Self::ListOffers => "consultations.listOffers",
        }
    }

    fn parse(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|procedure| procedure.path() == path)
    }

    fn kind(self) -> ProcedureKind {
        match self {
            Self::List | Self::Get | Self::ListOffers => ProcedureKind::Query,
            _ => ProcedureKind::Mutation,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    input: Option<String>,
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    json: Value,
}

async fn query(
    State(state): State<RpcState>,
    Path(path): Path<String>,
    Query(params): Query<QueryParams>,
    headers: HeaderMap,
) -> Response {
    let id = params.id.map(Value::String).unwrap_or(Value::Null);
    let input = match params.input.as_deref() {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str::<Envelope>(raw)
            .map(|envelope| envelope.json)
            .map_err(|error| format!("input is not a valid envelope: {error}")),
    };
    handle(&state, ProcedureKind::Query, &path, id, input, &headers).await
}

async fn mutation(
    State(state): State<RpcState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (id, input) = if body.is_empty() {
        (Value::Null, Ok(Value::Null))
    } else {
        match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => (envelope.id, Ok(envelope.json)),
            Err(error) => (Value::Null, Err(format!("body is not a valid envelope: {error}"))),
        }
    };
    handle(&state, ProcedureKind::Mutation, &path, id, input, &headers).await
}

async fn handle(
    state: &RpcState,
    verb: ProcedureKind,
    path: &str,
    id: Value,
    input: Result<Value, String>,
    headers: &HeaderMap,
) -> Response {
    let started = Instant::now();
    let correlation_id = auth::correlation_id(headers);

    let Some(procedure) = Procedure::parse(path) else {
        let error = InterfaceError::NotFound {
            message: format!("no procedure named `{path}`"),
            correlation_id,
        };
        return failure(id, path, verb, error);
    };
    let kind = procedure.kind();
    if kind != verb {
        let error = InterfaceError::MethodNotSupported {
            message: format!(
                "`{path}` is a {} and must be called with {}",
                kind.as_str(),
                kind.method()
            ),
            correlation_id,
        };
        return failure(id, path, kind, error);
    }

    let ctx = match auth::authenticate(headers, state.shared_secret.as_ref(), correlation_id) {
        Ok(ctx) => ctx,
        Err(error) => return failure(id, path, kind, error),
    };

    let result = match input {
        Ok(input) => dispatch(&state.service, &ctx, procedure, input).await,
        Err(message) => Err(ApplicationError::Validation(message)),
    };

    match result {
        Ok(data) => {
            info!(
                event_name = "rpc.call.completed",
                correlation_id = %ctx.correlation_id,
                procedure = path,
                actor = %ctx.actor.label(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "rpc call completed"
            );
            (StatusCode::OK, Json(SuccessEnvelope { id, result: RpcResult { data } }))
                .into_response()
        }
        Err(error) => failure(id, path, kind, error.into_interface(ctx.correlation_id)),
    }
}

async fn dispatch(
    service: &ConsultationService,
    ctx: &CallContext,
    procedure: Procedure,
    input: Value,
) -> Result<RpcOutput, ApplicationError> {
    match procedure {
        Procedure::Create => {
            let input: CreateInput = decode(input)?;
            let new_request = NewRequest {
                user_id: UserId(input.user_id.unwrap_or_else(|| ctx.actor.id.clone())),
                summary: input.summary,
                amount: input.amount,
                currency: input.currency,
                discount: input.discount,
                attachments: input.attachments.into_iter().map(FileRef).collect(),
            };
            let (request, assignments) = service.create_request(ctx, new_request).await?;
            Ok(RpcOutput::Created(CreatedView {
                id: request.id.0,
                status: request.status.as_str(),
                assignments: assignments.iter().map(AssignmentView::from).collect(),
            }))
        }
        Procedure::AdvisorRespond => {
            let input: RespondInput = decode(input)?;
            let assignment_id = AssignmentId(input.assignment_id);
            let (assignment, request) =
                service.advisor_respond(ctx, &assignment_id, input.decision, input.reason).await?;
            Ok(RpcOutput::Responded(RespondedView {
                assignment_id: assignment.id.0,
                status: assignment.status.as_str(),
                request_status: request.status.as_str(),
            }))
        }
        Procedure::ReservePayment => {
            let input: RequestInput = decode(input)?;
            let (order, request) =
                service.reserve_payment(ctx, &RequestId(input.request_id)).await?;
            Ok(RpcOutput::Payment(PaymentView::new(order, &request)))
        }
        Procedure::ConfirmPayment => {
            let input: ConfirmInput = decode(input)?;
            let outcome = match input.outcome {
                ConfirmOutcome::Succeeded => {
                    PaymentOutcome::Succeeded { payment_id: input.payment_id }
                }
                ConfirmOutcome::Failed => PaymentOutcome::Failed {
                    reason: input.reason.ok_or_else(|| {
                        ApplicationError::Validation(
                            "reason is required for a failed payment".to_string(),
                        )
                    })?,
                },
            };
            let (order, request) =
                service.confirm_payment(ctx, &OrderId(input.order_id), outcome).await?;
            Ok(RpcOutput::Payment(PaymentView::new(order, &request)))
        }
        Procedure::StartSession => {
            let input: RequestInput = decode(input)?;
            let request = service.start_session(ctx, &RequestId(input.request_id)).await?;
            Ok(RpcOutput::Request(RequestView::from(&request)))
        }
        Procedure::CompleteAndRelease => {
            let input: RequestInput = decode(input)?;
            let (request, settlement) =
                service.complete_and_release(ctx, &RequestId(input.request_id)).await?;
            Ok(RpcOutput::Released(ReleasedView {
                request: RequestView::from(&request),
                settlement: SettlementView::from(&settlement),
            }))
        }
        Procedure::PromoteNextCandidate => {
            let input: RequestInput = decode(input)?;
            let assignment =
                service.promote_next_candidate(ctx, &RequestId(input.request_id)).await?;
            Ok(RpcOutput::Assignment(AssignmentView::from(&assignment)))
        }
        Procedure::Close => {
            let input: CloseInput = decode(input)?;
            let request =
                service.close_request(ctx, &RequestId(input.request_id), input.reason).await?;
            Ok(RpcOutput::Request(RequestView::from(&request)))
        }
        Procedure::Rate => {
            let input: RateInput = decode(input)?;
            let request = service
                .rate_request(ctx, &RequestId(input.request_id), input.rating, input.comment)
                .await?;
            Ok(RpcOutput::Request(RequestView::from(&request)))
        }
        Procedure::ExpireOffers => {
            let summary = service.expire_stale_offers(ctx).await?;
            Ok(RpcOutput::Expiry(ExpiryView::from(summary)))
        }
        Procedure::List => {
            let input: ListInput = decode(input)?;
            let user_id = UserId(input.user_id.unwrap_or_else(|| ctx.actor.id.clone()));
            let requests = service.list_requests(ctx, &user_id).await?;
            Ok(RpcOutput::Requests(requests.iter().map(RequestView::from).collect()))
        }
        Procedure::Get => {
            let input: RequestInput = decode(input)?;
            let detail = service.get_request(ctx, &RequestId(input.request_id)).await?;
            Ok(RpcOutput::Detail(DetailView::from(detail)))
        }
        Procedure::ListOffers => {
            let input: OffersInput = decode(input)?;
            let advisor_id = AdvisorId(input.advisor_id.unwrap_or_else(|| ctx.actor.id.clone()));
            let offers = service.list_offers(ctx, &advisor_id).await?;
            Ok(RpcOutput::Offers(offers.into_iter().map(OfferView::from).collect()))
        }
    }
}

fn decode<T: DeserializeOwned>(input: Value) -> Result<T, ApplicationError> {
    let input = if input.is_null() { Value::Object(Default::default()) } else { input };
    serde_json::from_value(input)
        .map_err(|error| ApplicationError::Validation(format!("invalid input: {error}")))
}

fn failure(id: Value, path: &str, kind: ProcedureKind, error: InterfaceError) -> Response {
    warn!(
        event_name = "rpc.call.failed",
        correlation_id = %error.correlation_id(),
        procedure = path,
        code = error.code(),
        error = %error,
        "rpc call failed"
    );

    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = if error.exposes_detail() {
        error.message().to_string()
    } else {
        error.user_message().to_string()
    };
    let envelope = ErrorEnvelope {
        id,
        error: RpcError {
            message,
            code: error.rpc_code(),
            data: RpcErrorData {
                code: error.code(),
                http_status: error.http_status(),
                path: path.to_string(),
                kind: kind.as_str(),
                correlation_id: error.correlation_id().to_string(),
            },
        },
    };
    (status, Json(envelope)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInput {
    user_id: Option<String>,
    summary: String,
    amount: Decimal,
    currency: Option<String>,
    discount: Option<Decimal>,
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondInput {
    assignment_id: String,
    decision: AssignmentDecision,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestInput {
    request_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ConfirmOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmInput {
    order_id: String,
    outcome: ConfirmOutcome,
    payment_id: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseInput {
    request_id: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateInput {
    request_id: String,
    rating: u8,
    comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListInput {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OffersInput {
    advisor_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SuccessEnvelope {
    id: Value,
    result: RpcResult,
}

#[derive(Debug, Serialize)]
struct RpcResult {
    data: RpcOutput,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    id: Value,
    error: RpcError,
}

#[derive(Debug, Serialize)]
struct RpcError {
    message: String,
    code: i32,
    data: RpcErrorData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorData {
    code: &'static str,
    http_status: u16,
    path: String,
    kind: &'static str,
    correlation_id: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RpcOutput {
    Created(CreatedView),
    Responded(RespondedView),
    Payment(PaymentView),
    Request(RequestView),
    Released(ReleasedView),
    Assignment(AssignmentView),
    Expiry(ExpiryView),
    Requests(Vec<RequestView>),
    Detail(DetailView),
    Offers(Vec<OfferView>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestView {
    id: String,
    user_id: String,
    status: &'static str,
    gross_amount: Decimal,
    discount: Decimal,
    net_amount: Decimal,
    currency: String,
    summary: String,
    attachments: Vec<String>,
    advisor_id: Option<String>,
    rating: Option<u8>,
    rating_comment: Option<String>,
    close_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&ConsultationRequest> for RequestView {
    fn from(request: &ConsultationRequest) -> Self {
        Self {
            id: request.id.0.clone(),
            user_id: request.user_id.0.clone(),
            status: request.status.as_str(),
            gross_amount: request.gross_amount,
            discount: request.discount,
            net_amount: request.net_amount,
            currency: request.currency.clone(),
            summary: request.summary.clone(),
            attachments: request.attachments.iter().map(|file| file.0.clone()).collect(),
            advisor_id: request.advisor_id.as_ref().map(|id| id.0.clone()),
            rating: request.rating,
            rating_comment: request.rating_comment.clone(),
            close_reason: request.close_reason.clone(),
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentView {
    id: String,
    request_id: String,
    advisor_id: String,
    rank: u32,
    status: &'static str,
    offered_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    decline_reason: Option<String>,
}

impl From<&RequestAssignment> for AssignmentView {
    fn from(assignment: &RequestAssignment) -> Self {
        Self {
            id: assignment.id.0.clone(),
            request_id: assignment.request_id.0.clone(),
            advisor_id: assignment.advisor_id.0.clone(),
            rank: assignment.rank,
            status: assignment.status.as_str(),
            offered_at: assignment.offered_at,
            responded_at: assignment.responded_at,
            decline_reason: assignment.decline_reason.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderView {
    id: String,
    status: &'static str,
    gross_amount: Decimal,
    net_amount: Decimal,
    currency: String,
    gateway: String,
    gateway_reference: String,
    payment_id: Option<String>,
    payment_url: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.0.clone(),
            status: order.status.as_str(),
            gross_amount: order.gross_amount,
            net_amount: order.net_amount,
            currency: order.currency.clone(),
            gateway: order.gateway.clone(),
            gateway_reference: order.gateway_reference.clone(),
            payment_id: order.gateway_payment_id.clone(),
            payment_url: order.payment_url.clone(),
            failure_reason: order.failure_reason.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SettlementView {
    id: String,
    order_id: String,
    advisor_id: String,
    gross: Decimal,
    advisor_share: Decimal,
    platform_fee: Decimal,
    currency: String,
    released_at: DateTime<Utc>,
}

impl From<&Settlement> for SettlementView {
    fn from(settlement: &Settlement) -> Self {
        Self {
            id: settlement.id.0.clone(),
            order_id: settlement.order_id.0.clone(),
            advisor_id: settlement.advisor_id.0.clone(),
            gross: settlement.gross,
            advisor_share: settlement.advisor_share,
            platform_fee: settlement.platform_fee,
            currency: settlement.currency.clone(),
            released_at: settlement.released_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransitionView {
    from_status: Option<&'static str>,
    to_status: &'static str,
    actor: String,
    reason: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl From<&RequestTransition> for TransitionView {
    fn from(transition: &RequestTransition) -> Self {
        Self {
            from_status: transition.from_status.map(|status| status.as_str()),
            to_status: transition.to_status.as_str(),
            actor: transition.actor.clone(),
            reason: transition.reason.clone(),
            occurred_at: transition.occurred_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatedView {
    id: String,
    status: &'static str,
    assignments: Vec<AssignmentView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RespondedView {
    assignment_id: String,
    status: &'static str,
    request_status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentView {
    order_id: String,
    status: &'static str,
    request_status: &'static str,
    payment_url: Option<String>,
}

impl PaymentView {
    fn new(order: Order, request: &ConsultationRequest) -> Self {
        Self {
            order_id: order.id.0,
            status: order.status.as_str(),
            request_status: request.status.as_str(),
            payment_url: order.payment_url,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReleasedView {
    request: RequestView,
    settlement: SettlementView,
}

#[derive(Debug, Serialize)]
struct ExpiryView {
    expired: usize,
    skipped: usize,
}

impl From<ExpirySummary> for ExpiryView {
    fn from(summary: ExpirySummary) -> Self {
        Self { expired: summary.expired, skipped: summary.skipped }
    }
}

#[derive(Debug, Serialize)]
struct DetailView {
    request: RequestView,
    assignments: Vec<AssignmentView>,
    orders: Vec<OrderView>,
    settlement: Option<SettlementView>,
    transitions: Vec<TransitionView>,
}

impl From<RequestDetail> for DetailView {
    fn from(detail: RequestDetail) -> Self {
        Self {
            request: RequestView::from(&detail.request),
            assignments: detail.assignments.iter().map(AssignmentView::from).collect(),
            orders: detail.orders.iter().map(OrderView::from).collect(),
            settlement: detail.settlement.as_ref().map(SettlementView::from),
            transitions: detail.transitions.iter().map(TransitionView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OfferView {
    assignment: AssignmentView,
    request: RequestView,
}

impl From<Offer> for OfferView {
    fn from(offer: Offer) -> Self {
        Self {
            assignment: AssignmentView::from(&offer.assignment),
            request: RequestView::from(&offer.request),
        }
    }
}
