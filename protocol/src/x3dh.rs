//! The X3DH handshake (§4.3): derives the Double Ratchet's initial root key `rk₀` from a
//! claimed [`PreKeyBundle`]. Unlike a raw DH, the four (or three, if no OTPK was available)
//! DH outputs are concatenated behind a domain-separation prefix and run through HKDF, so the
//! derived key cannot be confused with any of its inputs or with a two-party DH alone.

use crate::constants::{
    AES256_SECRET_LENGTH, X3DH_DOMAIN_SEPARATION_BYTE, X3DH_DOMAIN_SEPARATION_LENGTH, X3DH_INFO,
    X3DH_SALT,
};
use crate::errors::X3DHError;
use crate::prekey::PreKeyBundle;
use crate::primitives::{hkdf_expand, IdentityKeyPair, PrivateKey, PublicKey};

/// What the initiator (Alice) produces: the derived root key plus everything the responder
/// needs to reproduce the same DH outputs without an interactive round trip.
pub struct InitialMessage {
    pub identity_key: crate::primitives::IdentityPublicKey,
    pub ephemeral_key: PublicKey,
    pub signed_prekey_id: u32,
    pub one_time_prekey_id: Option<u32>,
    pub root_key: [u8; AES256_SECRET_LENGTH],
}

/// Runs X3DH as the initiator against a freshly claimed `bundle` belonging to `identity_key`'s
/// peer. `identity_key` is the initiator's own long-term identity keypair.
///
/// DH order is fixed: `DH1 = IK_A · SPK_B`, `DH2 = EK_A · IK_B`, `DH3 = EK_A · SPK_B`, and,
/// when the bundle carried a one-time pre-key, `DH4 = EK_A · OPK_B`. Concatenation order is
/// `DH1 ‖ DH2 ‖ DH3 [‖ DH4]`, matching the responder's derivation in
/// [`process_initial_message`].
///
/// Returns the [`InitialMessage`] to publish plus the initiator's ephemeral private key — the
/// caller needs it to seed [`crate::ratchet::Ratchet::init_initiator`], since the ratchet's
/// starting keypair *is* the X3DH ephemeral, not a freshly generated one.
pub fn initiate(
    identity_key: &IdentityKeyPair,
    bundle: &PreKeyBundle,
) -> Result<(InitialMessage, PrivateKey), X3DHError> {
    bundle.verify()?;

    let ika_priv = identity_key.to_x25519_private();
    let ikb_pub = bundle.identity_key.to_x25519_public()?;
    let spkb_pub = bundle.signed_prekey.clone();
    let eka_priv = PrivateKey::generate();
    let eka_pub = PublicKey::from(&eka_priv);

    let dh1 = ika_priv.diffie_hellman(&spkb_pub);
    let dh2 = eka_priv.diffie_hellman(&ikb_pub);
    let dh3 = eka_priv.diffie_hellman(&spkb_pub);
    let dh4 = match &bundle.one_time_prekey {
        Some((_, opkb_pub)) => Some(eka_priv.diffie_hellman(opkb_pub)),
        None => None,
    };

    let root_key = derive_root_key(dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes(), dh4.as_ref().map(|s| s.as_bytes()))?;

    let message = InitialMessage {
        identity_key: identity_key.verifying_key(),
        ephemeral_key: eka_pub,
        signed_prekey_id: bundle.signed_prekey_id,
        one_time_prekey_id: bundle.one_time_prekey.as_ref().map(|(id, _)| *id),
        root_key,
    };
    Ok((message, eka_priv))
}

/// Runs X3DH as the responder (Bob), given the initiator's [`InitialMessage`] and the
/// responder's own long-term material. `signed_prekey_private` and `one_time_prekey_private`
/// must correspond to the ids named in `message` — the caller is responsible for looking up
/// (and, for the one-time pre-key, atomically consuming) the matching private keys before
/// calling this function.
pub fn process_initial_message(
    identity_key: &IdentityKeyPair,
    signed_prekey_private: &PrivateKey,
    one_time_prekey_private: Option<&PrivateKey>,
    message: &InitialMessage,
) -> Result<[u8; AES256_SECRET_LENGTH], X3DHError> {
    let ikb_priv = identity_key.to_x25519_private();
    let ika_pub = message.identity_key.to_x25519_public()?;
    let eka_pub = message.ephemeral_key.clone();

    let dh1 = signed_prekey_private.diffie_hellman(&ika_pub);
    let dh2 = ikb_priv.diffie_hellman(&eka_pub);
    let dh3 = signed_prekey_private.diffie_hellman(&eka_pub);
    let dh4 = match (one_time_prekey_private, &message.one_time_prekey_id) {
        (Some(opkb_priv), Some(_)) => Some(opkb_priv.diffie_hellman(&eka_pub)),
        (None, Some(_)) => return Err(X3DHError::InvalidInitialMessage),
        _ => None,
    };

    derive_root_key(dh1.as_bytes(), dh2.as_bytes(), dh3.as_bytes(), dh4.as_ref().map(|s| s.as_bytes()))
}

fn derive_root_key(
    dh1: &[u8; AES256_SECRET_LENGTH],
    dh2: &[u8; AES256_SECRET_LENGTH],
    dh3: &[u8; AES256_SECRET_LENGTH],
    dh4: Option<&[u8; AES256_SECRET_LENGTH]>,
) -> Result<[u8; AES256_SECRET_LENGTH], X3DHError> {
    let mut ikm = Vec::with_capacity(
        X3DH_DOMAIN_SEPARATION_LENGTH + AES256_SECRET_LENGTH * 4,
    );
    ikm.extend_from_slice(&[X3DH_DOMAIN_SEPARATION_BYTE; X3DH_DOMAIN_SEPARATION_LENGTH]);
    ikm.extend_from_slice(dh1);
    ikm.extend_from_slice(dh2);
    ikm.extend_from_slice(dh3);
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4);
    }

    let mut root_key = [0u8; AES256_SECRET_LENGTH];
    hkdf_expand(Some(X3DH_SALT.as_bytes()), &ikm, X3DH_INFO.as_bytes(), &mut root_key)?;
    Ok(root_key)
}
