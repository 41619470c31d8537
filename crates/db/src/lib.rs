pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{AdvisorSeedDataset, AdvisorSeedInfo, SeedResult, VerificationResult};
pub use service::{expire_stale_offers, ConsultationService, ExpirySummary, Offer, RequestDetail};
