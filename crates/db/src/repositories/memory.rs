use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use consult_core::domain::advisor::{Advisor, AdvisorId};
use consult_core::domain::assignment::{AssignmentId, AssignmentStatus, RequestAssignment};
use consult_core::domain::order::{Order, OrderId};
use consult_core::domain::request::{ConsultationRequest, RequestId, RequestStatus, UserId};
use consult_core::domain::settlement::Settlement;
use consult_core::domain::transition::RequestTransition;
use consult_core::workflow::{AssignmentWrite, Changeset, OrderWrite, RequestWrite};

use super::{AdvisorRepository, ConsultationRepository, RepositoryError};

#[derive(Clone, Default)]
struct ConsultationState {
    requests: HashMap<String, ConsultationRequest>,
    assignments: HashMap<String, RequestAssignment>,
    orders: HashMap<String, Order>,
    settlements: HashMap<String, Settlement>,
    transitions: Vec<RequestTransition>,
}

impl ConsultationState {
    fn write_request(&mut self, write: &RequestWrite) -> Result<(), RepositoryError> {
        match write {
            RequestWrite::Insert(request) => {
                if self.requests.contains_key(&request.id.0) {
                    return Err(conflict("request", &request.id.0, "new"));
                }
                self.requests.insert(request.id.0.clone(), request.clone());
            }
            RequestWrite::Update { request, expected } => {
                let stored = self
                    .requests
                    .get_mut(&request.id.0)
                    .filter(|stored| stored.status == *expected)
                    .ok_or_else(|| conflict("request", &request.id.0, expected.as_str()))?;
                *stored = request.clone();
            }
        }
        Ok(())
    }

    fn write_assignment(&mut self, write: &AssignmentWrite) -> Result<(), RepositoryError> {
        let assignment = match write {
            AssignmentWrite::Insert(assignment) => {
                let duplicate = self.assignments.values().any(|existing| {
                    existing.id == assignment.id
                        || (existing.request_id == assignment.request_id
                            && (existing.advisor_id == assignment.advisor_id
                                || existing.rank == assignment.rank))
                });
                if duplicate {
                    return Err(RepositoryError::Conflict(format!(
                        "assignment {} duplicates an existing offer",
                        assignment.id.0
                    )));
                }
                assignment
            }
            AssignmentWrite::Update { assignment, expected } => {
                let current = self.assignments.get(&assignment.id.0).map(|stored| stored.status);
                if current != Some(*expected) {
                    return Err(conflict("assignment", &assignment.id.0, expected.as_str()));
                }
                assignment
            }
        };

        if assignment.status == AssignmentStatus::Accepted {
            let already_accepted = self.assignments.values().any(|existing| {
                existing.request_id == assignment.request_id
                    && existing.id != assignment.id
                    && existing.status == AssignmentStatus::Accepted
            });
            if already_accepted {
                return Err(RepositoryError::Conflict(format!(
                    "request {} already has an accepted advisor",
                    assignment.request_id.0
                )));
            }
        }

        self.assignments.insert(assignment.id.0.clone(), assignment.clone());
        Ok(())
    }

    fn write_order(&mut self, write: &OrderWrite) -> Result<(), RepositoryError> {
        let order = match write {
            OrderWrite::Insert(order) => {
                if self.orders.contains_key(&order.id.0) {
                    return Err(conflict("order", &order.id.0, "new"));
                }
                order
            }
            OrderWrite::Update { order, expected } => {
                let current = self.orders.get(&order.id.0).map(|stored| stored.status);
                if current != Some(*expected) {
                    return Err(conflict("order", &order.id.0, expected.as_str()));
                }
                order
            }
        };

        if order.status.is_active() {
            let other_active = self.orders.values().any(|existing| {
                existing.request_id == order.request_id
                    && existing.id != order.id
                    && existing.status.is_active()
            });
            if other_active {
                return Err(RepositoryError::Conflict(format!(
                    "request {} already has an active order",
                    order.request_id.0
                )));
            }
        }

        self.orders.insert(order.id.0.clone(), order.clone());
        Ok(())
    }

    fn write_settlement(&mut self, settlement: &Settlement) -> Result<(), RepositoryError> {
        if self.settlements.contains_key(&settlement.request_id.0) {
            return Err(RepositoryError::Conflict(format!(
                "request {} was already settled",
                settlement.request_id.0
            )));
        }
        self.settlements.insert(settlement.request_id.0.clone(), settlement.clone());
        Ok(())
    }
}

fn conflict(entity: &str, id: &str, expected: &str) -> RepositoryError {
    RepositoryError::Conflict(format!("{entity} {id} is no longer {expected}"))
}

/// Same contract as the SQLite store: a changeset lands whole or not at all.
#[derive(Default)]
pub struct InMemoryConsultationRepository {
    state: RwLock<ConsultationState>,
}

#[async_trait::async_trait]
impl ConsultationRepository for InMemoryConsultationRepository {
    async fn find_request(
        &self,
        id: &RequestId,
    ) -> Result<Option<ConsultationRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list_requests_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConsultationRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut requests: Vec<_> =
            state.requests.values().filter(|request| &request.user_id == user_id).cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(requests)
    }

    async fn find_assignment(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<RequestAssignment>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.assignments.get(&id.0).cloned())
    }

    async fn list_assignments(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let state = self.state.read().await;
        let mut assignments: Vec<_> = state
            .assignments
            .values()
            .filter(|assignment| &assignment.request_id == request_id)
            .cloned()
            .collect();
        assignments.sort_by_key(|assignment| assignment.rank);
        Ok(assignments)
    }

    async fn list_open_offers(
        &self,
        advisor_id: &AdvisorId,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let state = self.state.read().await;
        let mut offers: Vec<_> = state
            .assignments
            .values()
            .filter(|assignment| {
                &assignment.advisor_id == advisor_id
                    && assignment.status == AssignmentStatus::Offered
                    && state
                        .requests
                        .get(&assignment.request_id.0)
                        .is_some_and(|request| request.status == RequestStatus::PendingAdvisor)
            })
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.offered_at.cmp(&b.offered_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(offers)
    }

    async fn list_offered_until(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<RequestAssignment>, RepositoryError> {
        let state = self.state.read().await;
        let mut offers: Vec<_> = state
            .assignments
            .values()
            .filter(|assignment| {
                assignment.status == AssignmentStatus::Offered && assignment.offered_at <= cutoff
            })
            .cloned()
            .collect();
        offers.sort_by(|a, b| a.offered_at.cmp(&b.offered_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(offers)
    }

    async fn find_order(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id.0).cloned())
    }

    async fn list_orders(&self, request_id: &RequestId) -> Result<Vec<Order>, RepositoryError> {
        let state = self.state.read().await;
        let mut orders: Vec<_> =
            state.orders.values().filter(|order| &order.request_id == request_id).cloned().collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        Ok(orders)
    }

    async fn find_settlement(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<Settlement>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.settlements.get(&request_id.0).cloned())
    }

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .transitions
            .iter()
            .filter(|transition| &transition.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn apply(&self, changeset: Changeset) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();

        if let Some(write) = &changeset.request {
            next.write_request(write)?;
        }
        for write in &changeset.assignments {
            next.write_assignment(write)?;
        }
        for write in &changeset.orders {
            next.write_order(write)?;
        }
        if let Some(settlement) = &changeset.settlement {
            next.write_settlement(settlement)?;
        }
        next.transitions.extend(changeset.transitions);

        *state = next;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAdvisorRepository {
    advisors: RwLock<HashMap<String, Advisor>>,
}

#[async_trait::async_trait]
impl AdvisorRepository for InMemoryAdvisorRepository {
    async fn find_by_id(&self, id: &AdvisorId) -> Result<Option<Advisor>, RepositoryError> {
        let advisors = self.advisors.read().await;
        Ok(advisors.get(&id.0).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError> {
        let advisors = self.advisors.read().await;
        let mut active: Vec<_> =
            advisors.values().filter(|advisor| advisor.is_active()).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError> {
        let mut advisors = self.advisors.write().await;
        let email_taken = advisors
            .values()
            .any(|existing| existing.id != advisor.id && existing.email == advisor.email);
        if email_taken {
            return Err(RepositoryError::Conflict(format!(
                "advisor email {} is already registered",
                advisor.email
            )));
        }
        advisors.insert(advisor.id.0.clone(), advisor);
        Ok(())
    }
}
