pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gateway;
pub mod payout;
pub mod ranking;
pub mod workflow;

pub use domain::actor::{Actor, ActorRole, CallContext};
pub use domain::advisor::{Advisor, AdvisorId, AdvisorStatus};
pub use domain::assignment::{AssignmentDecision, AssignmentId, AssignmentStatus, RequestAssignment};
pub use domain::order::{Order, OrderId, OrderStatus};
pub use domain::request::{ConsultationRequest, RequestId, RequestStatus, UserId};
pub use domain::settlement::Settlement;
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use gateway::{ManualGateway, PaymentGateway};
pub use workflow::{Changeset, ConsultationEngine};
