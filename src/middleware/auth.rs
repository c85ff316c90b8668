use crate::{
    payment::headers::{HeaderError, PaymentHeaders},
    state::DaemonState,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};

/// Refuses the request unless its payment header set carries a valid claim or free-call
/// token. Accepted payments are attached as an `AcceptedPayment` extension.
pub async fn auth_middleware(
    state: DaemonState,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let payment = PaymentHeaders::from_header_map(request.headers()).map_err(|e| {
        tracing::debug!(error = %e, "rejected payment headers");
        match e {
            HeaderError::Missing(_) => StatusCode::UNAUTHORIZED,
            HeaderError::Malformed(_) => StatusCode::BAD_REQUEST,
        }
    })?;

    let accepted = match &payment {
        PaymentHeaders::Escrow(escrow) => state.accept_escrow_payment(escrow).await,
        PaymentHeaders::FreeCall(free_call) => state.accept_free_call(free_call).await,
    }
    .map_err(|e| {
        tracing::warn!(error = %e, "payment refused");
        StatusCode::from(e)
    })?;

    request.extensions_mut().insert(accepted);
    Ok(next.run(request).await)
}
