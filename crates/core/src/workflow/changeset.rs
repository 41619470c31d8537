use crate::domain::assignment::{AssignmentStatus, RequestAssignment};
use crate::domain::order::{Order, OrderStatus};
use crate::domain::request::{ConsultationRequest, RequestId, RequestStatus};
use crate::domain::settlement::Settlement;
use crate::domain::transition::RequestTransition;

/// Row writes for a request. Updates only apply while the stored status equals `expected`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestWrite {
    Insert(ConsultationRequest),
    Update { request: ConsultationRequest, expected: RequestStatus },
}

impl RequestWrite {
    pub fn request(&self) -> &ConsultationRequest {
        match self {
            Self::Insert(request) | Self::Update { request, .. } => request,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignmentWrite {
    Insert(RequestAssignment),
    Update { assignment: RequestAssignment, expected: AssignmentStatus },
}

impl AssignmentWrite {
    pub fn assignment(&self) -> &RequestAssignment {
        match self {
            Self::Insert(assignment) | Self::Update { assignment, .. } => assignment,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderWrite {
    Insert(Order),
    Update { order: Order, expected: OrderStatus },
}

impl OrderWrite {
    pub fn order(&self) -> &Order {
        match self {
            Self::Insert(order) | Self::Update { order, .. } => order,
        }
    }
}

/// Everything one workflow operation writes. A store applies it all or nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Changeset {
    pub request_id: RequestId,
    pub request: Option<RequestWrite>,
    pub assignments: Vec<AssignmentWrite>,
    pub orders: Vec<OrderWrite>,
    pub settlement: Option<Settlement>,
    pub transitions: Vec<RequestTransition>,
}

impl Changeset {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            request: None,
            assignments: Vec::new(),
            orders: Vec::new(),
            settlement: None,
            transitions: Vec::new(),
        }
    }

    pub fn with_request(mut self, write: RequestWrite) -> Self {
        self.request = Some(write);
        self
    }

    pub fn with_assignment(mut self, write: AssignmentWrite) -> Self {
        self.assignments.push(write);
        self
    }

    pub fn with_order(mut self, write: OrderWrite) -> Self {
        self.orders.push(write);
        self
    }

    pub fn with_settlement(mut self, settlement: Settlement) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn with_transition(mut self, transition: RequestTransition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.request.is_none()
            && self.assignments.is_empty()
            && self.orders.is_empty()
            && self.settlement.is_none()
            && self.transitions.is_empty()
    }

    /// Request state after the changeset is applied, when the changeset writes it.
    pub fn request_after(&self) -> Option<&ConsultationRequest> {
        self.request.as_ref().map(RequestWrite::request)
    }

    pub fn assignments_after(&self) -> impl Iterator<Item = &RequestAssignment> {
        self.assignments.iter().map(AssignmentWrite::assignment)
    }

    pub fn orders_after(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().map(OrderWrite::order)
    }
}
