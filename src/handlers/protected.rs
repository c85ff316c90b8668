use axum::{Extension, Json};
use serde::Serialize;

use crate::state::AcceptedPayment;

#[derive(Serialize)]
pub struct InvocationResponse {
    pub status: &'static str,
    pub payment: AcceptedPayment,
}

pub async fn protected_handler(
    Extension(payment): Extension<AcceptedPayment>,
) -> Json<InvocationResponse> {
    Json(InvocationResponse {
        status: "Access granted!",
        payment,
    })
}
