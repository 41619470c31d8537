pub mod changeset;
pub mod engine;

pub use changeset::{AssignmentWrite, Changeset, OrderWrite, RequestWrite};
pub use engine::{
    ConsultationEngine, NewRequest, PaymentOutcome, PendingReservation, WorkflowPolicy,
};
