//! Offline signature checks a daemon runs before doing any paid work.
//!
//! Every function here returns `false`/`None` on malformed input instead of failing, so request
//! validation has a single non-throwing path.

use ethers::types::{Address, RecoveryMessage, Signature, U256};
use std::str::FromStr;

use crate::{
    types::{FreeCallToken, PaymentAuthorization},
    utils::crypto::{create_claim_message, create_free_call_message, message_digest},
};

fn recover(message: &[u8], signature: &[u8]) -> Option<Address> {
    let signature = Signature::try_from(signature).ok()?;
    let digest = message_digest(message);
    signature
        .recover(RecoveryMessage::Data(digest.as_bytes().to_vec()))
        .ok()
}

fn matches_expected(recovered: Option<Address>, expected_signer: &str) -> bool {
    // Address parsing ignores letter case, so checksummed and lowercase forms compare equal.
    match (recovered, Address::from_str(expected_signer.trim())) {
        (Some(recovered), Ok(expected)) => recovered == expected,
        _ => false,
    }
}

pub fn recover_claim_signer(
    mpe_address: Address,
    channel_id: U256,
    nonce: U256,
    amount: U256,
    signature: &[u8],
) -> Option<Address> {
    recover(&create_claim_message(mpe_address, channel_id, nonce, amount), signature)
}

pub fn verify_claim(
    mpe_address: Address,
    channel_id: U256,
    nonce: U256,
    amount: U256,
    signature: &[u8],
    expected_signer: &str,
) -> bool {
    let recovered = recover_claim_signer(mpe_address, channel_id, nonce, amount, signature);
    let valid = matches_expected(recovered, expected_signer);
    if !valid {
        tracing::debug!(%channel_id, %nonce, %amount, ?recovered, "claim signature rejected");
    }
    valid
}

pub fn verify_authorization(authorization: &PaymentAuthorization, expected_signer: &str) -> bool {
    verify_claim(
        authorization.mpe_address,
        authorization.channel_id,
        authorization.nonce,
        authorization.amount,
        &authorization.signature,
        expected_signer,
    )
}

pub fn recover_free_call_signer(token: &FreeCallToken) -> Option<Address> {
    let message = create_free_call_message(
        &token.user_address,
        &token.organization_id,
        &token.service_id,
        token.current_block,
    );
    recover(&message, &token.signature)
}

pub fn verify_free_call_token(token: &FreeCallToken, expected_signer: &str) -> bool {
    matches_expected(recover_free_call_signer(token), expected_signer)
}
