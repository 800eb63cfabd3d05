// Unit tests for session credential issue and verification

use attendance_gate::auth::session::{SessionCodec, DEFAULT_SESSION_TTL_SECS};
use attendance_gate::core::crypto::SigningSecret;
use attendance_gate::core::errors::AppError;
use attendance_gate::core::models::{SessionUser, UserId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, TimeZone, Utc};

use crate::common::*;

fn alice() -> SessionUser {
    SessionUser {
        id: UserId::new(),
        email: "alice@example.com".to_string(),
    }
}

#[test]
fn test_valid_within_three_days() {
    let codec = test_codec();
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let user = alice();
    let issued = codec.issue_at(&user, t0).unwrap();

    let almost_three_days = t0 + Duration::days(2) + Duration::hours(23);
    let claims = codec.verify_at(&issued.token, almost_three_days).unwrap();
    assert_eq!(claims.user, user);
    assert_eq!(claims.expires_at - claims.issued_at, DEFAULT_SESSION_TTL_SECS);
}

#[test]
fn test_rejected_after_three_days() {
    let codec = test_codec();
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let issued = codec.issue_at(&alice(), t0).unwrap();

    let past_expiry = t0 + Duration::days(3) + Duration::hours(1);
    let result = codec.verify_at(&issued.token, past_expiry);
    assert!(matches!(result, Err(AppError::InvalidCredential(_))));
}

#[test]
fn test_expiry_second_is_inclusive() {
    let codec = test_codec();
    let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let issued = codec.issue_at(&alice(), t0).unwrap();

    assert!(codec.verify_at(&issued.token, issued.expires_at).is_ok());
    assert!(codec
        .verify_at(&issued.token, issued.expires_at + Duration::seconds(1))
        .is_err());
}

#[test]
fn test_tampered_payload_rejected() {
    let codec = test_codec();
    let issued = codec.issue(&alice()).unwrap();

    let parts: Vec<&str> = issued.token.split('.').collect();
    assert_eq!(parts.len(), 3);
    let forged_claims = serde_json::json!({
        "user": { "id": UserId::new(), "email": "mallory@example.com" },
        "iat": issued.claims.issued_at,
        "exp": issued.claims.expires_at,
    });
    let forged_payload = URL_SAFE_NO_PAD.encode(forged_claims.to_string());
    let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

    assert!(matches!(codec.verify(&forged), Err(AppError::InvalidCredential(_))));
}

#[test]
fn test_wrong_secret_rejected() {
    let issued = test_codec().issue(&alice()).unwrap();
    let other = SessionCodec::new(
        &SigningSecret::new("another-secret-that-is-long-enough-for-hs256"),
        DEFAULT_SESSION_TTL_SECS,
    )
    .unwrap();

    assert!(other.verify(&issued.token).is_err());
}

#[test]
fn test_garbage_rejected() {
    let codec = test_codec();
    assert!(codec.verify("").is_err());
    assert!(codec.verify("not-a-token").is_err());
    assert!(codec.verify("a.b.c").is_err());
}

#[test]
fn test_short_secret_refused() {
    let result = SessionCodec::new(&SigningSecret::new("short"), DEFAULT_SESSION_TTL_SECS);
    assert!(result.is_err());
}
