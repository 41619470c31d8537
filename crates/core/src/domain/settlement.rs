use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;
use crate::domain::order::OrderId;
use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettlementId(pub String);

/// Funds released to an advisor once a session is completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: SettlementId,
    pub request_id: RequestId,
    pub order_id: OrderId,
    pub advisor_id: AdvisorId,
    pub gross: Decimal,
    pub advisor_share: Decimal,
    pub platform_fee: Decimal,
    pub currency: String,
    pub released_at: DateTime<Utc>,
}
