pub mod actor;
pub mod advisor;
pub mod assignment;
pub mod order;
pub mod request;
pub mod settlement;
pub mod transition;

pub use actor::{Actor, ActorRole, CallContext};
pub use advisor::{Advisor, AdvisorId, AdvisorStatus};
pub use assignment::{AssignmentDecision, AssignmentId, AssignmentStatus, RequestAssignment};
pub use order::{Order, OrderId, OrderStatus};
pub use request::{ConsultationRequest, FileRef, RequestEvent, RequestId, RequestStatus, UserId};
pub use settlement::{Settlement, SettlementId};
pub use transition::{RequestTransition, TransitionId};
