use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::warn;

use consult_core::gateway::{
    GatewayError, GatewayReservation, PaymentGateway, ReservationHold, ReservationRequest,
};

/// Reserves funds through an external payments service.
pub struct HttpPaymentGateway {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationResponse {
    reference: String,
    payment_id: Option<String>,
    payment_url: Option<String>,
    status: String,
}

impl HttpPaymentGateway {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GatewayError::Unavailable(error.to_string()))?;
        Ok(Self { client, endpoint: endpoint.into(), api_key })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn reserve(
        &self,
        request: ReservationRequest,
    ) -> Result<GatewayReservation, GatewayError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| GatewayError::Unavailable(error.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                event_name = "payment.gateway.rejected",
                request_id = %request.request_id.0,
                order_id = %request.order_id.0,
                status = %status,
                "payment gateway rejected reservation"
            );
            return Err(GatewayError::Rejected(rejection_message(status, &body)));
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("payment gateway returned {status}")));
        }

        let payload: ReservationResponse = response
            .json()
            .await
            .map_err(|error| GatewayError::InvalidResponse(error.to_string()))?;
        if payload.reference.trim().is_empty() {
            return Err(GatewayError::InvalidResponse("empty reservation reference".to_string()));
        }

        let hold = match payload.status.as_str() {
            "held" => ReservationHold::Held,
            "awaiting_customer" | "pending" => ReservationHold::AwaitingCustomer,
            other => {
                return Err(GatewayError::InvalidResponse(format!(
                    "unknown reservation status `{other}`"
                )))
            }
        };
        if hold == ReservationHold::AwaitingCustomer && payload.payment_url.is_none() {
            return Err(GatewayError::InvalidResponse(
                "reservation awaiting customer without payment url".to_string(),
            ));
        }

        Ok(GatewayReservation {
            reference: payload.reference,
            payment_id: payload.payment_id,
            payment_url: payload.payment_url,
            hold,
        })
    }
}

fn rejection_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde_json::{json, Value};

    use consult_core::domain::order::OrderId;
    use consult_core::domain::request::{RequestId, UserId};
    use consult_core::gateway::{GatewayError, PaymentGateway, ReservationHold, ReservationRequest};

    use super::HttpPaymentGateway;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{address}/reservations")
    }

    fn reservation(amount: Decimal) -> ReservationRequest {
        ReservationRequest {
            order_id: OrderId("ORD-1".to_string()),
            request_id: RequestId("REQ-1".to_string()),
            user_id: UserId("U-1".to_string()),
            amount,
            currency: "KWD".to_string(),
            description: "Consultation REQ-1".to_string(),
        }
    }

    fn gateway(endpoint: String) -> HttpPaymentGateway {
        HttpPaymentGateway::new(endpoint, SecretString::from("pk-test"), Duration::from_secs(5))
            .expect("client")
    }

    #[tokio::test]
    async fn reservation_sends_bearer_key_and_reads_payment_url() {
        let endpoint = serve(Router::new().route(
            "/reservations",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    == Some("Bearer pk-test");
                if !authorized {
                    return (StatusCode::UNAUTHORIZED, Json(json!({})));
                }
                (
                    StatusCode::OK,
                    Json(json!({
                        "reference": format!("ref-{}", body["order_id"].as_str().unwrap_or("")),
                        "paymentId": "pay-9",
                        "paymentUrl": "https://pay.example/9",
                        "status": "awaiting_customer",
                    })),
                )
            }),
        ))
        .await;

        let reservation =
            gateway(endpoint).reserve(reservation(Decimal::new(100, 0))).await.expect("reserved");

        assert_eq!(reservation.reference, "ref-ORD-1");
        assert_eq!(reservation.payment_id.as_deref(), Some("pay-9"));
        assert_eq!(reservation.payment_url.as_deref(), Some("https://pay.example/9"));
        assert_eq!(reservation.hold, ReservationHold::AwaitingCustomer);
    }

    #[tokio::test]
    async fn client_errors_are_rejections_and_server_errors_are_unavailable() {
        let endpoint = serve(
            Router::new()
                .route("/reservations", post(|| async { (StatusCode::PAYMENT_REQUIRED, "card declined") }))
                .route("/broken", post(|| async { StatusCode::BAD_GATEWAY })),
        )
        .await;
        let broken = endpoint.replace("/reservations", "/broken");

        let rejected = gateway(endpoint).reserve(reservation(Decimal::ONE)).await;
        assert!(matches!(rejected, Err(GatewayError::Rejected(ref message)) if message.contains("card declined")));

        let unavailable = gateway(broken).reserve(reservation(Decimal::ONE)).await;
        assert!(matches!(unavailable, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn unknown_status_is_an_invalid_response() {
        let endpoint = serve(Router::new().route(
            "/reservations",
            post(|| async { Json(json!({ "reference": "ref-1", "status": "teleported" })) }),
        ))
        .await;

        let error = gateway(endpoint).reserve(reservation(Decimal::ONE)).await.expect_err("invalid");

        assert!(matches!(error, GatewayError::InvalidResponse(_)));
    }
}
