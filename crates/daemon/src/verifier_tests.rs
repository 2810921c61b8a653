// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

use super::*;
use chrono::TimeZone;
use ed25519_dalek::{Signer, SigningKey};
use plexd_core::FakeClock;
use std::time::Duration;

fn keypair(seed: u8) -> (SigningKey, String) {
    let signing = SigningKey::from_bytes(&[seed; 32]);
    let public = BASE64.encode(signing.verifying_key().to_bytes());
    (signing, public)
}

fn signed(signing: &SigningKey, event_id: &str) -> SignedEnvelope {
    let mut envelope = SignedEnvelope {
        event_type: "state_updated".into(),
        event_id: event_id.into(),
        issued_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        payload: br#"{"metadata":{}}"#.to_vec(),
        signature: String::new(),
    };
    envelope.signature = BASE64.encode(signing.sign(&envelope.signed_bytes()).to_bytes());
    envelope
}

#[test]
fn accepts_envelope_signed_by_current_key() {
    let (signing, public) = keypair(1);
    let verifier = SignatureVerifier::new(&public).unwrap();
    assert!(verifier.verify(&signed(&signing, "e1")).is_ok());
}

#[test]
fn rejects_envelope_signed_by_unknown_key() {
    let (_, public) = keypair(1);
    let (other, _) = keypair(2);
    let verifier = SignatureVerifier::new(&public).unwrap();
    assert!(matches!(verifier.verify(&signed(&other, "e1")), Err(VerifyError::Rejected)));
}

#[test]
fn rejects_tampered_payload() {
    let (signing, public) = keypair(1);
    let verifier = SignatureVerifier::new(&public).unwrap();
    let mut envelope = signed(&signing, "e1");
    envelope.payload = br#"{"metadata":{"evil":"yes"}}"#.to_vec();
    assert!(matches!(verifier.verify(&envelope), Err(VerifyError::Rejected)));
}

#[test]
fn previous_key_accepts_within_transition_window() {
    let (old_signing, old_public) = keypair(1);
    let (new_signing, new_public) = keypair(2);
    let clock = FakeClock::new();
    clock.set_utc(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    let verifier = SignatureVerifier::with_clock(&old_public, clock.clone()).unwrap();

    let expires = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
    verifier.set_keys(&new_public, Some(&old_public), Some(expires)).unwrap();

    assert!(verifier.verify(&signed(&new_signing, "new")).is_ok());
    assert!(verifier.verify(&signed(&old_signing, "old")).is_ok());
}

#[test]
fn previous_key_rejected_after_transition_expires() {
    let (old_signing, old_public) = keypair(1);
    let (_, new_public) = keypair(2);
    let clock = FakeClock::new();
    clock.set_utc(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    let verifier = SignatureVerifier::with_clock(&old_public, clock.clone()).unwrap();

    let expires = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
    verifier.set_keys(&new_public, Some(&old_public), Some(expires)).unwrap();

    clock.advance(Duration::from_secs(2 * 24 * 60 * 60));
    assert!(matches!(
        verifier.verify(&signed(&old_signing, "old")),
        Err(VerifyError::Rejected)
    ));
}

#[test]
fn previous_key_without_window_is_never_accepted() {
    let (old_signing, old_public) = keypair(1);
    let (_, new_public) = keypair(2);
    let verifier = SignatureVerifier::new(&old_public).unwrap();
    verifier.set_keys(&new_public, Some(&old_public), None).unwrap();

    assert!(verifier.verify(&signed(&old_signing, "old")).is_err());
}

#[test]
fn empty_current_key_is_rejected() {
    let (_, public) = keypair(1);
    let verifier = SignatureVerifier::new(&public).unwrap();
    assert!(matches!(
        verifier.set_keys("", Some(&public), None),
        Err(VerifyError::EmptyCurrent)
    ));
}

#[test]
fn malformed_key_material_is_rejected() {
    assert!(matches!(SignatureVerifier::new("@@@"), Err(VerifyError::InvalidKey(_))));
    assert!(matches!(
        SignatureVerifier::new(&BASE64.encode([1u8; 16])),
        Err(VerifyError::InvalidKey(_))
    ));
}

#[test]
fn malformed_signature_encoding_is_distinguished_from_rejection() {
    let (signing, public) = keypair(1);
    let verifier = SignatureVerifier::new(&public).unwrap();
    let mut envelope = signed(&signing, "e1");
    envelope.signature = "!!not base64!!".into();
    assert!(matches!(verifier.verify(&envelope), Err(VerifyError::BadSignatureEncoding)));
}
