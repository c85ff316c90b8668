use ethers::{
    signers::Signer,
    types::{Address, U256},
};

use crate::{
    types::{FreeCallToken, MpeError, PaymentAuthorization},
    utils::crypto::{create_claim_message, create_free_call_message, message_digest},
};

/// Signs the claim `(mpe_address, channel_id, nonce, amount)` with the channel's signer key.
///
/// The digest is signed as an Ethereum personal message, which is what the escrow contract
/// recovers against when the recipient submits the claim.
pub async fn sign_claim<S: Signer>(
    signer: &S,
    mpe_address: Address,
    channel_id: U256,
    nonce: U256,
    amount: U256,
) -> Result<PaymentAuthorization, MpeError> {
    let message = create_claim_message(mpe_address, channel_id, nonce, amount);
    let digest = message_digest(&message);
    let signature = signer
        .sign_message(digest.as_bytes())
        .await
        .map_err(|e| MpeError::Signing(e.to_string()))?;

    tracing::debug!(%channel_id, %nonce, %amount, "signed channel claim");

    Ok(PaymentAuthorization {
        mpe_address,
        channel_id,
        nonce,
        amount,
        signature: signature.to_vec(),
    })
}

pub async fn sign_free_call_token<S: Signer>(
    signer: &S,
    user_address: &str,
    organization_id: &str,
    service_id: &str,
    current_block: u64,
) -> Result<FreeCallToken, MpeError> {
    let message = create_free_call_message(user_address, organization_id, service_id, current_block);
    let digest = message_digest(&message);
    let signature = signer
        .sign_message(digest.as_bytes())
        .await
        .map_err(|e| MpeError::Signing(e.to_string()))?;

    tracing::debug!(user = user_address, organization_id, service_id, current_block, "signed free-call token");

    Ok(FreeCallToken {
        user_address: user_address.to_string(),
        organization_id: organization_id.to_string(),
        service_id: service_id.to_string(),
        current_block,
        signature: signature.to_vec(),
    })
}
