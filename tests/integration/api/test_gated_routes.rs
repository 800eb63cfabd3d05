// Gated /api routes: 401 for anonymous callers, 403 without a row or below the tier

use axum::http::StatusCode;
use serde_json::json;

use crate::common::*;

fn setup() -> (TestApp, Scenario) {
    let app = TestApp::new();
    let s = scenario(&app.db);
    (app, s)
}

fn event_uri(s: &Scenario, suffix: &str) -> String {
    format!("/api/groups/{}/events/{}{}", s.group.id, s.event.id, suffix)
}

#[tokio::test]
async fn test_anonymous_gets_401() {
    let (app, s) = setup();
    for uri in [
        format!("/api/groups/{}", s.group.id),
        format!("/api/groups/{}/events", s.group.id),
        event_uri(&s, ""),
        event_uri(&s, "/manage/attendances"),
    ] {
        let (status, _, body) = send(&app.router, request("GET", &uri, None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(body["error"], "Authentication required");
    }
}

#[tokio::test]
async fn test_invalid_cookie_is_anonymous() {
    let (app, s) = setup();
    let uri = event_uri(&s, "");
    let (status, _, _) = send(&app.router, request("GET", &uri, Some("session=nope"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_outsider_gets_403() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.outsider);
    let (status, _, _) = send(&app.router, request("GET", &event_uri(&s, ""), Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_attendee_sees_event_and_own_row() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.attendee);

    let (status, _, body) = send(&app.router, request("GET", &event_uri(&s, ""), Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "ATTENDEE");
    assert_eq!(body["event"]["id"], s.event.id.to_string());
    assert_eq!(body["attendance"]["status"], "UNANSWERED");
    assert!(body["attendance"].get("secret").is_none());

    let (status, _, _) = send(
        &app.router,
        request("GET", &event_uri(&s, "/manage/attendances"), Some(&cookie), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_attendee_updates_own_attendance() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.attendee);

    let (status, _, body) = send(
        &app.router,
        request(
            "PATCH",
            &event_uri(&s, "/attendance"),
            Some(&cookie),
            Some(json!({ "status": "ABSENCE", "comment": "travelling" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ABSENCE");

    let stored = app.db.attendance(s.event.id, s.attendee.id).unwrap();
    assert_eq!(stored.comment.as_deref(), Some("travelling"));
    assert_eq!(stored.secret, s.attendee_secret);
}

#[tokio::test]
async fn test_own_update_after_deadline_rejected() {
    let (app, s) = setup();
    app.db
        .set_registration_end(s.event.id, Some(chrono::Utc::now() - chrono::Duration::minutes(1)));
    let cookie = app.cookie_for(&s.attendee);

    let (status, _, _) = send(
        &app.router,
        request(
            "PATCH",
            &event_uri(&s, "/attendance"),
            Some(&cookie),
            Some(json!({ "status": "PRESENCE" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_event_admin_lists_attendances() {
    let (app, s) = setup();
    app.db.add_attendance(s.event.id, s.event_admin.id, "event-admin-secret");
    let cookie = app.cookie_for(&s.event_admin);

    let (status, _, body) = send(
        &app.router,
        request("GET", &event_uri(&s, "/manage/attendances"), Some(&cookie), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attendances"].as_array().unwrap().len(), 2);

    let (status, _, _) = send(
        &app.router,
        request("GET", &format!("/api/groups/{}", s.group.id), Some(&cookie), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_event_owner_without_row_gets_403() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.owner);

    for uri in [event_uri(&s, ""), event_uri(&s, "/manage/attendances")] {
        let (status, _, body) = send(&app.router, request("GET", &uri, Some(&cookie), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
        assert!(body.get("attendances").is_none());
    }
}

#[tokio::test]
async fn test_group_admin_sees_group() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.group_admin);

    let (status, _, body) = send(
        &app.router,
        request("GET", &format!("/api/groups/{}", s.group.id), Some(&cookie), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tier"], "ADMIN");

    let (status, _, body) = send(
        &app.router,
        request("GET", &format!("/api/groups/{}/events", s.group.id), Some(&cookie), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_group_is_403_not_404() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.owner);
    let uri = format!("/api/groups/{}", attendance_gate::core::models::GroupId::new());

    let (status, _, _) = send(&app.router, request("GET", &uri, Some(&cookie), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invitations_create_rows_and_send_links() {
    let (app, s) = setup();
    app.db.add_attendance(s.event.id, s.owner.id, "owner-secret");
    let cookie = app.cookie_for(&s.owner);

    let (status, _, body) = send(
        &app.router,
        request(
            "POST",
            &event_uri(&s, "/manage/invitations"),
            Some(&cookie),
            Some(json!({ "emails": ["New.Member@Example.com", "attendee@example.com"] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["invited"], 2);

    let member = app.db.user_by_email("new.member@example.com").expect("invitee upserted");
    let row = app.db.attendance(s.event.id, member.id).expect("attendance created");
    assert_eq!(row.status, attendance_gate::core::models::AttendanceStatus::Unanswered);

    // Re-inviting keeps the secret already mailed out
    let existing = app.db.attendance(s.event.id, s.attendee.id).unwrap();
    assert_eq!(existing.secret, s.attendee_secret);

    let mails = app.mailer.wait_for(2).await;
    assert_eq!(mails.len(), 2);
    let to_member = mails
        .iter()
        .find(|m| m.to == vec!["new.member@example.com".to_string()])
        .unwrap();
    assert!(to_member.text.contains(&format!("/respond/attend?token={}", row.secret)));
    assert!(to_member.text.contains(&format!("/respond/status/{}", row.secret)));
}

#[tokio::test]
async fn test_invitations_require_admin() {
    let (app, s) = setup();
    let cookie = app.cookie_for(&s.attendee);

    let (status, _, _) = send(
        &app.router,
        request(
            "POST",
            &event_uri(&s, "/manage/invitations"),
            Some(&cookie),
            Some(json!({ "emails": ["friend@example.com"] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.db.user_by_email("friend@example.com").is_none());
}

#[tokio::test]
async fn test_empty_invitation_rejected() {
    let (app, s) = setup();
    app.db.add_attendance(s.event.id, s.owner.id, "owner-secret");
    let cookie = app.cookie_for(&s.owner);

    let (status, _, _) = send(
        &app.router,
        request(
            "POST",
            &event_uri(&s, "/manage/invitations"),
            Some(&cookie),
            Some(json!({ "emails": [] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
