//! Client-side engine for Multi-Party Escrow payment channels: channel ledger operations,
//! signed claims and free-call tokens, and the daemon-side checks that accept them.

pub mod config;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod payment;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;

use axum::{routing::post, Router};
use tower_http::trace::TraceLayer;

pub use ledger::{ChannelClient, EscrowLedger};
pub use payment::{sign_claim, sign_free_call_token, verify_claim, ClaimTracker, PaymentHeaders};
pub use state::{DaemonConfig, DaemonState};
pub use types::{MpeError, NetworkConfig, PaymentAuthorization, PaymentChannel};

use crate::{handlers::protected_handler, middleware::auth_middleware};

/// Router for a paid service endpoint: every request to `/invoke` must carry an
/// acceptable payment header set.
pub fn create_protected_router(state: DaemonState) -> Router {
    Router::new()
        .route("/invoke", post(protected_handler))
        .layer(axum::middleware::from_fn(move |req, next| {
            let state = state.clone();
            auth_middleware(state, req, next)
        }))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::{memory::InMemoryEscrow, OpenChannelRequest},
        payment::headers::SIGNATURE_HEADER,
    };
    use axum::{
        body::Body,
        http::{self, HeaderMap, HeaderValue, Request, StatusCode},
    };
    use ethers::{
        signers::{LocalWallet, Signer},
        types::{Address, H256, U256},
    };
    use std::{str::FromStr, sync::Arc};
    use tower::util::ServiceExt;

    const PRICE: u64 = 1_000_000;

    // Helper function to create a test wallet with a known private key
    fn create_test_wallet() -> LocalWallet {
        LocalWallet::from_str("1234567890123456789012345678901234567890123456789012345678901234")
            .unwrap()
    }

    struct TestService {
        app: Router,
        escrow: InMemoryEscrow,
        wallet: LocalWallet,
        free_call_signer: LocalWallet,
        channel_id: U256,
    }

    async fn create_test_service(channel_value: u64, expiration: u64) -> TestService {
        let wallet = create_test_wallet();
        let free_call_signer = LocalWallet::new(&mut rand::thread_rng());
        let recipient = Address::random();
        let group_id = H256::repeat_byte(0x42);

        let escrow = InMemoryEscrow::new(wallet.address(), Address::random());
        escrow.mint(wallet.address(), U256::from(channel_value)).await;
        escrow.approve(U256::from(channel_value)).await.unwrap();
        let opened = escrow
            .deposit_and_open_channel(&OpenChannelRequest {
                signer: wallet.address(),
                recipient,
                group_id,
                amount: U256::from(channel_value),
                expiration,
            })
            .await
            .unwrap();

        let state = DaemonState::new(
            Arc::new(escrow.connect_as(recipient)),
            DaemonConfig {
                recipient,
                group_id,
                price_per_call: U256::from(PRICE),
                organization_id: "snet".into(),
                service_id: "example-service".into(),
                free_call_signer: Some(free_call_signer.address()),
                free_calls_per_user: 2,
                free_call_block_tolerance: 5,
            },
        );

        TestService {
            app: create_protected_router(state),
            escrow,
            wallet,
            free_call_signer,
            channel_id: opened.channel_id,
        }
    }

    async fn create_signed_headers(service: &TestService, nonce: u64, amount: u64) -> HeaderMap {
        let auth = sign_claim(
            &service.wallet,
            service.escrow.escrow_address(),
            service.channel_id,
            U256::from(nonce),
            U256::from(amount),
        )
        .await
        .unwrap();
        PaymentHeaders::from(&auth).to_header_map().unwrap()
    }

    async fn send_test_request(app: Router, headers: HeaderMap) -> axum::response::Response {
        let request = Request::builder()
            .method(http::Method::POST)
            .uri("/invoke")
            .body(Body::from("test data"))
            .unwrap();

        let request = {
            let (mut parts, body) = request.into_parts();
            parts.headers = headers;
            Request::from_parts(parts, body)
        };

        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_valid_request() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let headers = create_signed_headers(&service, 0, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "Access granted!");
        assert_eq!(json["payment"]["type"], "escrow");
    }

    #[tokio::test]
    async fn test_invalid_signature() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let mut headers = create_signed_headers(&service, 0, PRICE).await;

        // Replace the signature with an invalid one
        let invalid_sig = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 65]);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&invalid_sig).unwrap());

        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_claim_from_other_signer() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let stranger = LocalWallet::new(&mut rand::thread_rng());
        let auth = sign_claim(
            &stranger,
            service.escrow.escrow_address(),
            service.channel_id,
            U256::zero(),
            U256::from(PRICE),
        )
        .await
        .unwrap();
        let headers = PaymentHeaders::from(&auth).to_header_map().unwrap();

        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_headers() {
        let service = create_test_service(10 * PRICE, 1_000).await;

        for header_name in [
            "snet-payment-type",
            "snet-payment-channel-id",
            "snet-payment-channel-nonce",
            "snet-payment-channel-amount",
            "snet-payment-channel-signature-bin",
        ] {
            let mut headers = create_signed_headers(&service, 0, PRICE).await;
            headers.remove(header_name);

            let response = send_test_request(service.app.clone(), headers).await;
            assert_eq!(
                response.status(),
                StatusCode::UNAUTHORIZED,
                "Request missing {} should be unauthorized",
                header_name
            );
        }

        // Test malformed headers
        let mut headers = create_signed_headers(&service, 0, PRICE).await;
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("not base64!"));

        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(
            response.status(),
            StatusCode::BAD_REQUEST,
            "Request with malformed signature should be bad request"
        );
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let service = create_test_service(PRICE / 2, 1_000).await;
        let headers = create_signed_headers(&service, 0, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;

        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_cumulative_amount_must_grow() {
        let service = create_test_service(10 * PRICE, 1_000).await;

        let headers = create_signed_headers(&service, 0, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::OK, "First claim should succeed");

        // Replaying the same cumulative amount pays nothing for the second call
        let headers = create_signed_headers(&service, 0, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(
            response.status(),
            StatusCode::PAYMENT_REQUIRED,
            "Replayed claim should fail"
        );

        let headers = create_signed_headers(&service, 0, 2 * PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(
            response.status(),
            StatusCode::OK,
            "Increased cumulative amount should succeed"
        );
    }

    #[tokio::test]
    async fn test_stale_nonce_and_unknown_channel() {
        let service = create_test_service(10 * PRICE, 1_000).await;

        let headers = create_signed_headers(&service, 1, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let auth = sign_claim(
            &service.wallet,
            service.escrow.escrow_address(),
            service.channel_id + 1,
            U256::zero(),
            U256::from(PRICE),
        )
        .await
        .unwrap();
        let headers = PaymentHeaders::from(&auth).to_header_map().unwrap();
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_expired_channel() {
        let service = create_test_service(10 * PRICE, 100).await;
        service.escrow.advance_blocks(100).await;

        let headers = create_signed_headers(&service, 0, PRICE).await;
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_free_calls_are_budgeted() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let block = service.escrow.current_block().await.unwrap();
        let token = sign_free_call_token(
            &service.free_call_signer,
            "user@example.com",
            "snet",
            "example-service",
            block,
        )
        .await
        .unwrap();
        let headers = PaymentHeaders::from(&token).to_header_map().unwrap();

        for _ in 0..2 {
            let response = send_test_request(service.app.clone(), headers.clone()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = send_test_request(service.app.clone(), headers.clone()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_free_call_token_from_channel_signer_is_refused() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let token = sign_free_call_token(&service.wallet, "user@example.com", "snet", "example-service", 0)
            .await
            .unwrap();
        let headers = PaymentHeaders::from(&token).to_header_map().unwrap();

        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stale_free_call_token() {
        let service = create_test_service(10 * PRICE, 1_000).await;
        let token = sign_free_call_token(&service.free_call_signer, "user@example.com", "snet", "example-service", 0)
            .await
            .unwrap();
        service.escrow.advance_blocks(6).await;

        let headers = PaymentHeaders::from(&token).to_header_map().unwrap();
        let response = send_test_request(service.app.clone(), headers).await;
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
