use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use consult_core::domain::advisor::AdvisorId;
use consult_core::domain::assignment::{
    AssignmentId, AssignmentStatus, RequestAssignment,
};
use consult_core::domain::order::{Order, OrderId, OrderStatus};
use consult_core::domain::request::{
    ConsultationRequest, FileRef, RequestId, RequestStatus, UserId,
};
use consult_core::domain::settlement::{Settlement, SettlementId};
use consult_core::domain::transition::{RequestTransition, TransitionId};
use consult_core::workflow::{AssignmentWrite, Changeset, OrderWrite, RequestWrite};

use super::{
    format_timestamp, parse_decimal, parse_optional_timestamp, parse_timestamp, parse_u32,
    ConsultationRepository, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, user_id, status, gross_amount, discount, net_amount, currency, \
     summary, advisor_id, rating, rating_comment, close_reason, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, request_id, advisor_id, rank, status, offered_at, responded_at, decline_reason";

const ORDER_COLUMNS: &str = "id, request_id, gross_amount, net_amount, currency, status, gateway, \
     gateway_reference, gateway_payment_id, payment_url, failure_reason, created_at, updated_at";

const SETTLEMENT_COLUMNS: &str = "id, request_id, order_id, advisor_id, gross, advisor_share, \
     platform_fee, currency, released_at";

pub struct SqlConsultationRepository {
    pool: DbPool,
}

impl SqlConsultationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_attachments(&self, request_id: &str) -> Result<Vec<FileRef>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT file_ref FROM request_attachments WHERE request_id = ? ORDER BY position",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(FileRef(row.try_get("file_ref")?)))
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(RepositoryError::from)
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<ConsultationRequest, RepositoryError> {
        let id: String = row.try_get("id")?;
        let attachments = self.load_attachments(&id).await?;
        request_from_row(row, attachments)
    }
}

#[async_trait]
impl ConsultationRepository for SqlConsultationRepository {
    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ConsultationRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM consultation_requests WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.hydrate(row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list_requests_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConsultationRequest>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM consultation_requests
             WHERE user_id = ?
             ORDER BY created_at DESC, id ASC"
        ))
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            requests.push(self.hydrate(row).await?);
        }
        Ok(requests)
    }

    async fn find_assignment(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<RequestAssignment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM request_assignments WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(assignment_from_row).transpose()
    }

    async fn list_assignments(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM request_assignments
             WHERE request_id = ?
             ORDER BY rank ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn list_open_offers(
        &self,
        advisor_id: &AdvisorId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT a.id, a.request_id, a.advisor_id, a.rank, a.status, a.offered_at,
                    a.responded_at, a.decline_reason
             FROM request_assignments a
             JOIN consultation_requests r ON r.id = a.request_id
             WHERE a.advisor_id = ? AND a.status = ? AND r.status = ?
             ORDER BY a.offered_at ASC, a.id ASC",
        )
        .bind(&advisor_id.0)
        .bind(AssignmentStatus::Offered.as_str())
        .bind(RequestStatus::PendingAdvisor.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn list_offered_until(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM request_assignments
             WHERE status = ? AND offered_at <= ?
             ORDER BY offered_at ASC, id ASC"
        ))
        .bind(AssignmentStatus::Offered.as_str())
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(order_from_row).transpose()
    }

    async fn list_orders(&self, request_id: &RequestId) -> Result<Vec<Order>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE request_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(order_from_row).collect()
    }

    async fn find_settlement(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<Settlement>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE request_id = ?"
        ))
        .bind(&request_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(settlement_from_row).transpose()
    }

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, from_status, to_status, actor, reason, occurred_at
             FROM request_transitions
             WHERE request_id = ?
             ORDER BY sequence ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }

    async fn apply(&self, changeset: Changeset) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if let Some(write) = &changeset.request {
            match write {
                RequestWrite::Insert(request) => insert_request(&mut *tx, request).await?,
                RequestWrite::Update { request, expected } => {
                    update_request(&mut *tx, request, *expected).await?
                }
            }
        }

        for write in &changeset.assignments {
            match write {
                AssignmentWrite::Insert(assignment) => {
                    insert_assignment(&mut *tx, assignment).await?
                }
                AssignmentWrite::Update { assignment, expected } => {
                    update_assignment(&mut *tx, assignment, *expected).await?
                }
            }
        }

        for write in &changeset.orders {
            match write {
                OrderWrite::Insert(order) => insert_order(&mut *tx, order).await?,
                OrderWrite::Update { order, expected } => {
                    update_order(&mut *tx, order, *expected).await?
                }
            }
        }

        if let Some(settlement) = &changeset.settlement {
            insert_settlement(&mut *tx, settlement).await?;
        }

        for transition in &changeset.transitions {
            insert_transition(&mut *tx, transition).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn write_error(error: sqlx::Error, what: &str) -> RepositoryError {
    if let sqlx::Error::Database(database_error) = &error {
        if database_error.is_unique_violation() {
            return RepositoryError::Conflict(format!("{what} violates a uniqueness rule"));
        }
    }
    RepositoryError::Database(error)
}

fn guard(rows_affected: u64, entity: &str, id: &str, expected: &str) -> Result<(), RepositoryError> {
    if rows_affected == 0 {
        return Err(RepositoryError::Conflict(format!(
            "{entity} {id} is no longer {expected}"
        )));
    }
    Ok(())
}

async fn insert_request(
    conn: &mut SqliteConnection,
    request: &ConsultationRequest,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO consultation_requests ({REQUEST_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&request.id.0)
    .bind(&request.user_id.0)
    .bind(request.status.as_str())
    .bind(request.gross_amount.to_string())
    .bind(request.discount.to_string())
    .bind(request.net_amount.to_string())
    .bind(&request.currency)
    .bind(&request.summary)
    .bind(request.advisor_id.as_ref().map(|advisor| advisor.0.as_str()))
    .bind(request.rating.map(i64::from))
    .bind(request.rating_comment.as_deref())
    .bind(request.close_reason.as_deref())
    .bind(format_timestamp(request.created_at))
    .bind(format_timestamp(request.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "request"))?;

    for (position, file) in request.attachments.iter().enumerate() {
        sqlx::query(
            "INSERT INTO request_attachments (request_id, position, file_ref) VALUES (?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(position as i64)
        .bind(&file.0)
        .execute(&mut *conn)
        .await
        .map_err(|error| write_error(error, "attachment"))?;
    }

    Ok(())
}

async fn update_request(
    conn: &mut SqliteConnection,
    request: &ConsultationRequest,
    expected: RequestStatus,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE consultation_requests
         SET status = ?, advisor_id = ?, rating = ?, rating_comment = ?, close_reason = ?,
             updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(request.status.as_str())
    .bind(request.advisor_id.as_ref().map(|advisor| advisor.0.as_str()))
    .bind(request.rating.map(i64::from))
    .bind(request.rating_comment.as_deref())
    .bind(request.close_reason.as_deref())
    .bind(format_timestamp(request.updated_at))
    .bind(&request.id.0)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "request"))?;

    guard(result.rows_affected(), "request", &request.id.0, expected.as_str())
}

async fn insert_assignment(
    conn: &mut SqliteConnection,
    assignment: &RequestAssignment,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO request_assignments ({ASSIGNMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&assignment.id.0)
    .bind(&assignment.request_id.0)
    .bind(&assignment.advisor_id.0)
    .bind(i64::from(assignment.rank))
    .bind(assignment.status.as_str())
    .bind(format_timestamp(assignment.offered_at))
    .bind(assignment.responded_at.map(format_timestamp))
    .bind(assignment.decline_reason.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "assignment"))?;

    Ok(())
}

async fn update_assignment(
    conn: &mut SqliteConnection,
    assignment: &RequestAssignment,
    expected: AssignmentStatus,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE request_assignments
         SET status = ?, responded_at = ?, decline_reason = ?
         WHERE id = ? AND status = ?",
    )
    .bind(assignment.status.as_str())
    .bind(assignment.responded_at.map(format_timestamp))
    .bind(assignment.decline_reason.as_deref())
    .bind(&assignment.id.0)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "assignment"))?;

    guard(result.rows_affected(), "assignment", &assignment.id.0, expected.as_str())
}

async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&order.id.0)
    .bind(&order.request_id.0)
    .bind(order.gross_amount.to_string())
    .bind(order.net_amount.to_string())
    .bind(&order.currency)
    .bind(order.status.as_str())
    .bind(&order.gateway)
    .bind(&order.gateway_reference)
    .bind(order.gateway_payment_id.as_deref())
    .bind(order.payment_url.as_deref())
    .bind(order.failure_reason.as_deref())
    .bind(format_timestamp(order.created_at))
    .bind(format_timestamp(order.updated_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "order"))?;

    Ok(())
}

async fn update_order(
    conn: &mut SqliteConnection,
    order: &Order,
    expected: OrderStatus,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE orders
         SET status = ?, gateway_payment_id = ?, failure_reason = ?, updated_at = ?
         WHERE id = ? AND status = ?",
    )
    .bind(order.status.as_str())
    .bind(order.gateway_payment_id.as_deref())
    .bind(order.failure_reason.as_deref())
    .bind(format_timestamp(order.updated_at))
    .bind(&order.id.0)
    .bind(expected.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "order"))?;

    guard(result.rows_affected(), "order", &order.id.0, expected.as_str())
}

async fn insert_settlement(
    conn: &mut SqliteConnection,
    settlement: &Settlement,
) -> Result<(), RepositoryError> {
    sqlx::query(&format!(
        "INSERT INTO settlements ({SETTLEMENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&settlement.id.0)
    .bind(&settlement.request_id.0)
    .bind(&settlement.order_id.0)
    .bind(&settlement.advisor_id.0)
    .bind(settlement.gross.to_string())
    .bind(settlement.advisor_share.to_string())
    .bind(settlement.platform_fee.to_string())
    .bind(&settlement.currency)
    .bind(format_timestamp(settlement.released_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "settlement"))?;

    Ok(())
}

async fn insert_transition(
    conn: &mut SqliteConnection,
    transition: &RequestTransition,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO request_transitions
            (id, request_id, from_status, to_status, actor, reason, occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transition.id.0)
    .bind(&transition.request_id.0)
    .bind(transition.from_status.map(|status| status.as_str()))
    .bind(transition.to_status.as_str())
    .bind(&transition.actor)
    .bind(transition.reason.as_deref())
    .bind(format_timestamp(transition.occurred_at))
    .execute(&mut *conn)
    .await
    .map_err(|error| write_error(error, "transition"))?;

    Ok(())
}

fn parse_request_status(value: String) -> Result<RequestStatus, RepositoryError> {
    RequestStatus::parse(&value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{value}`")))
}

fn request_from_row(
    row: SqliteRow,
    attachments: Vec<FileRef>,
) -> Result<ConsultationRequest, RepositoryError> {
    let rating = row
        .try_get::<Option<i64>, _>("rating")?
        .map(|value| {
            u8::try_from(value)
                .map_err(|_| RepositoryError::Decode(format!("invalid rating `{value}`")))
        })
        .transpose()?;

    Ok(ConsultationRequest {
        id: RequestId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        status: parse_request_status(row.try_get("status")?)?,
        gross_amount: parse_decimal("gross_amount", row.try_get("gross_amount")?)?,
        discount: parse_decimal("discount", row.try_get("discount")?)?,
        net_amount: parse_decimal("net_amount", row.try_get("net_amount")?)?,
        currency: row.try_get("currency")?,
        summary: row.try_get("summary")?,
        attachments,
        advisor_id: row.try_get::<Option<String>, _>("advisor_id")?.map(AdvisorId),
        rating,
        rating_comment: row.try_get("rating_comment")?,
        close_reason: row.try_get("close_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn assignment_from_row(row: SqliteRow) -> Result<RequestAssignment, RepositoryError> {
    let status: String = row.try_get("status")?;

    Ok(RequestAssignment {
        id: AssignmentId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        advisor_id: AdvisorId(row.try_get("advisor_id")?),
        rank: parse_u32("rank", row.try_get("rank")?)?,
        status: AssignmentStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown assignment status `{status}`"))
        })?,
        offered_at: parse_timestamp("offered_at", row.try_get("offered_at")?)?,
        responded_at: parse_optional_timestamp("responded_at", row.try_get("responded_at")?)?,
        decline_reason: row.try_get("decline_reason")?,
    })
}

fn order_from_row(row: SqliteRow) -> Result<Order, RepositoryError> {
    let status: String = row.try_get("status")?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        gross_amount: parse_decimal("gross_amount", row.try_get("gross_amount")?)?,
        net_amount: parse_decimal("net_amount", row.try_get("net_amount")?)?,
        currency: row.try_get("currency")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status}`")))?,
        gateway: row.try_get("gateway")?,
        gateway_reference: row.try_get("gateway_reference")?,
        gateway_payment_id: row.try_get("gateway_payment_id")?,
        payment_url: row.try_get("payment_url")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn settlement_from_row(row: SqliteRow) -> Result<Settlement, RepositoryError> {
    Ok(Settlement {
        id: SettlementId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        order_id: OrderId(row.try_get("order_id")?),
        advisor_id: AdvisorId(row.try_get("advisor_id")?),
        gross: parse_decimal("gross", row.try_get("gross")?)?,
        advisor_share: parse_decimal("advisor_share", row.try_get("advisor_share")?)?,
        platform_fee: parse_decimal("platform_fee", row.try_get("platform_fee")?)?,
        currency: row.try_get("currency")?,
        released_at: parse_timestamp("released_at", row.try_get("released_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<RequestTransition, RepositoryError> {
    Ok(RequestTransition {
        id: TransitionId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        from_status: row
            .try_get::<Option<String>, _>("from_status")?
            .map(parse_request_status)
            .transpose()?,
        to_status: parse_request_status(row.try_get("to_status")?)?,
        actor: row.try_get("actor")?,
        reason: row.try_get("reason")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use consult_core::domain::actor::{Actor, ActorRole};
    use consult_core::domain::advisor::{Advisor, AdvisorId, AdvisorStatus};
    use consult_core::domain::assignment::{AssignmentDecision, AssignmentStatus};
    use consult_core::domain::order::OrderStatus;
    use consult_core::domain::request::{FileRef, RequestStatus, UserId};
    use consult_core::gateway::{GatewayReservation, ReservationHold};
    use consult_core::workflow::{Changeset, ConsultationEngine, NewRequest, OrderWrite};

    use super::SqlConsultationRepository;
    use crate::repositories::{
        AdvisorRepository, ConsultationRepository, RepositoryError, SqlAdvisorRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).single().expect("valid timestamp")
    }

    async fn seed_advisors(pool: &DbPool) -> Vec<Advisor> {
        let repo = SqlAdvisorRepository::new(pool.clone());
        for (id, rating) in [("ADV-A", 48), ("ADV-B", 45), ("ADV-C", 40)] {
            repo.save(Advisor {
                id: AdvisorId(id.to_string()),
                display_name: format!("Advisor {id}"),
                email: format!("{}@example.com", id.to_ascii_lowercase()),
                status: AdvisorStatus::Active,
                rating: Some(Decimal::new(rating, 1)),
                created_at: at(0),
            })
            .await
            .expect("seed advisor");
        }
        repo.list_active().await.expect("list advisors")
    }

    fn new_request() -> NewRequest {
        NewRequest {
            user_id: UserId("U-1".to_string()),
            summary: "Reviewing a lease agreement".to_string(),
            amount: Decimal::new(100_000, 3),
            currency: Some("KWD".to_string()),
            discount: Some(Decimal::new(10_000, 3)),
            attachments: vec![FileRef("files/lease.pdf".to_string())],
        }
    }

    #[tokio::test]
    async fn created_request_reads_back_with_offers_and_transitions() {
        let pool = setup_pool().await;
        let advisors = seed_advisors(&pool).await;
        let repo = SqlConsultationRepository::new(pool);
        let engine = ConsultationEngine::default();
        let user = Actor::new("U-1", ActorRole::User);

        let changeset =
            engine.create_request(&user, new_request(), &advisors, at(1)).expect("create");
        let expected = changeset.request_after().cloned().expect("request write");
        repo.apply(changeset).await.expect("apply create");

        let stored = repo.find_request(&expected.id).await.expect("find").expect("exists");
        assert_eq!(stored, expected);
        assert_eq!(stored.net_amount, Decimal::new(90_000, 3));

        let assignments = repo.list_assignments(&expected.id).await.expect("assignments");
        let ranked: Vec<_> = assignments.iter().map(|a| (a.rank, a.advisor_id.0.as_str())).collect();
        assert_eq!(ranked, vec![(1, "ADV-A"), (2, "ADV-B"), (3, "ADV-C")]);

        let transitions = repo.list_transitions(&expected.id).await.expect("transitions");
        let statuses: Vec<_> =
            transitions.iter().map(|t| (t.from_status, t.to_status)).collect();
        assert_eq!(
            statuses,
            vec![
                (None, RequestStatus::Submitted),
                (Some(RequestStatus::Submitted), RequestStatus::PendingAdvisor),
            ]
        );

        let listed = repo.list_requests_for_user(&UserId("U-1".to_string())).await.expect("list");
        assert_eq!(listed, vec![expected]);
    }

    #[tokio::test]
    async fn concurrent_accepts_leave_exactly_one_winner() {
        let pool = setup_pool().await;
        let advisors = seed_advisors(&pool).await;
        let repo = SqlConsultationRepository::new(pool);
        let engine = ConsultationEngine::default();
        let user = Actor::new("U-1", ActorRole::User);

        let changeset =
            engine.create_request(&user, new_request(), &advisors, at(1)).expect("create");
        let request = changeset.request_after().cloned().expect("request write");
        repo.apply(changeset).await.expect("apply create");
        let assignments = repo.list_assignments(&request.id).await.expect("assignments");

        let first = engine
            .respond(
                &Actor::new("ADV-A", ActorRole::Advisor),
                &request,
                &assignments[0],
                AssignmentDecision::Accept,
                None,
                at(2),
            )
            .expect("first accept");
        let second = engine
            .respond(
                &Actor::new("ADV-B", ActorRole::Advisor),
                &request,
                &assignments[1],
                AssignmentDecision::Accept,
                None,
                at(2),
            )
            .expect("second accept validated against the same snapshot");

        repo.apply(first).await.expect("first accept wins");
        let error = repo.apply(second).await.expect_err("second accept must conflict");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let stored = repo.find_request(&request.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.advisor_id, Some(AdvisorId("ADV-A".to_string())));

        let assignments = repo.list_assignments(&request.id).await.expect("assignments");
        assert_eq!(assignments[1].status, AssignmentStatus::Offered);
        assert_eq!(repo.list_transitions(&request.id).await.expect("transitions").len(), 3);

        let open = repo.list_open_offers(&AdvisorId("ADV-B".to_string())).await.expect("offers");
        assert!(open.is_empty(), "offers on accepted requests are no longer open");
    }

    #[tokio::test]
    async fn second_reservation_from_the_same_snapshot_conflicts() {
        let pool = setup_pool().await;
        let advisors = seed_advisors(&pool).await;
        let repo = SqlConsultationRepository::new(pool);
        let engine = ConsultationEngine::default();
        let user = Actor::new("U-1", ActorRole::User);

        let changeset =
            engine.create_request(&user, new_request(), &advisors, at(1)).expect("create");
        let request = changeset.request_after().cloned().expect("request write");
        repo.apply(changeset).await.expect("apply create");
        let assignments = repo.list_assignments(&request.id).await.expect("assignments");
        let accept = engine
            .respond(
                &Actor::new("ADV-A", ActorRole::Advisor),
                &request,
                &assignments[0],
                AssignmentDecision::Accept,
                None,
                at(2),
            )
            .expect("accept");
        let accepted = accept.request_after().cloned().expect("request write");
        repo.apply(accept).await.expect("apply accept");

        let reserve = |reference: &str| {
            let pending = engine.prepare_reservation(&user, &accepted, &[]).expect("reservable");
            engine
                .record_reservation(
                    &user,
                    &accepted,
                    pending,
                    "manual",
                    GatewayReservation {
                        reference: reference.to_string(),
                        payment_id: None,
                        payment_url: None,
                        hold: ReservationHold::Held,
                    },
                    at(3),
                )
                .expect("reservation recorded")
        };
        let first = reserve("manual-1");
        let second = reserve("manual-2");
        let second_order = second.orders_after().next().cloned().expect("order insert");

        repo.apply(first).await.expect("first reservation");
        let error = repo.apply(second).await.expect_err("request already left accepted");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let bare = Changeset::new(accepted.id.clone()).with_order(OrderWrite::Insert(second_order));
        let error = repo.apply(bare).await.expect_err("one live order per request");
        assert!(matches!(error, RepositoryError::Conflict(_)), "got {error:?}");

        let orders = repo.list_orders(&accepted.id).await.expect("orders");
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Pending);
        assert_eq!(orders[0].gateway_reference, "manual-1");
    }

    #[tokio::test]
    async fn offered_until_includes_offers_at_the_cutoff() {
        let pool = setup_pool().await;
        let advisors = seed_advisors(&pool).await;
        let repo = SqlConsultationRepository::new(pool);
        let engine = ConsultationEngine::default();
        let user = Actor::new("U-1", ActorRole::User);

        let changeset =
            engine.create_request(&user, new_request(), &advisors, at(1)).expect("create");
        repo.apply(changeset).await.expect("apply create");

        let none = repo.list_offered_until(at(1) - Duration::seconds(1)).await.expect("query");
        assert!(none.is_empty());

        let stale = repo.list_offered_until(at(1)).await.expect("query");
        assert_eq!(stale.len(), 3);
        assert!(stale.iter().all(|a| a.status == AssignmentStatus::Offered));
    }
}
