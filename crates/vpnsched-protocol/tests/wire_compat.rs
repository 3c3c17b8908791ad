// Verify the wire format matches what the control service expects.

use vpnsched_protocol::frames::{EventFrame, Frame, ReqFrame, ResFrame};
use vpnsched_protocol::methods;
use vpnsched_protocol::payloads::{
    PermissionPayload, ProfileIdParams, ProfilePayload, StatusPayload,
};

#[test]
fn request_line_layout() {
    let params = serde_json::to_value(ProfileIdParams {
        id: "uuid-1".to_string(),
    })
    .unwrap();
    let req = ReqFrame::new(methods::PROFILE_START, Some(params));
    assert_eq!(req.id.len(), 36);

    let line = Frame::Req(req).to_line().unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);
    assert!(line.starts_with(r#"{"type":"req""#));
    assert!(line.contains(r#""method":"profile.start""#));
    assert!(line.contains(r#""params":{"id":"uuid-1"}"#));
}

#[test]
fn request_without_params_omits_field() {
    let line = Frame::Req(ReqFrame::new(methods::VPN_DISCONNECT, None))
        .to_line()
        .unwrap();
    assert!(!line.contains("params"));
}

#[test]
fn request_ids_are_unique() {
    let a = ReqFrame::new(methods::PROFILES_LIST, None);
    let b = ReqFrame::new(methods::PROFILES_LIST, None);
    assert_ne!(a.id, b.id);
}

#[test]
fn ok_response_carries_profiles() {
    let line = r#"{"type":"res","id":"r1","ok":true,"payload":[{"id":"u1","name":"work"}]}"#;
    let Frame::Res(res) = Frame::from_line(line).unwrap() else {
        panic!("expected a response frame");
    };
    assert_eq!(res.id, "r1");
    assert!(res.failure_reason().is_none());

    let profiles: Vec<ProfilePayload> = serde_json::from_value(res.payload.unwrap()).unwrap();
    assert_eq!(profiles[0].name, "work");
}

#[test]
fn error_response_layout() {
    let res = ResFrame::err("r2", "REMOTE_ERROR", "no such profile");
    assert_eq!(
        res.failure_reason().as_deref(),
        Some("REMOTE_ERROR: no such profile")
    );

    let line = Frame::Res(res).to_line().unwrap();
    assert!(line.contains(r#""ok":false"#));
    assert!(line.contains(r#""code":"REMOTE_ERROR""#));
    // payload must be absent on error
    assert!(!line.contains(r#""payload""#));
}

#[test]
fn error_response_without_shape_still_fails() {
    let line = r#"{"type":"res","id":"r3","ok":false}"#;
    let Frame::Res(res) = Frame::from_line(line).unwrap() else {
        panic!("expected a response frame");
    };
    assert_eq!(res.failure_reason().as_deref(), Some("unknown error"));
}

#[test]
fn unknown_frame_type_is_rejected() {
    assert!(Frame::from_line(r#"{"type":"ping"}"#).is_err());
    assert!(Frame::from_line("not json").is_err());
}

#[test]
fn permission_payload_token_optional() {
    let granted: PermissionPayload = serde_json::from_str("{}").unwrap();
    assert!(granted.token.is_none());
    assert_eq!(serde_json::to_string(&granted).unwrap(), "{}");

    let needed: PermissionPayload = serde_json::from_str(r#"{"token":"t-1"}"#).unwrap();
    assert_eq!(needed.token.as_deref(), Some("t-1"));
}

#[test]
fn status_event_parsing() {
    let ev = EventFrame::new(
        methods::EVENT_STATUS,
        StatusPayload {
            profile_id: Some("u1".to_string()),
            state: "CONNECTED".to_string(),
            message: "SUCCESS".to_string(),
        },
    );
    let line = Frame::Event(ev).to_line().unwrap();
    assert!(line.contains(r#""type":"event""#));
    assert!(line.contains(r#""event":"status""#));

    let Frame::Event(parsed) = Frame::from_line(&line).unwrap() else {
        panic!("expected an event frame");
    };
    let status: StatusPayload = serde_json::from_value(parsed.payload.unwrap()).unwrap();
    assert_eq!(status.state, "CONNECTED");

    // Minimal payload from older services.
    let minimal: StatusPayload = serde_json::from_str(r#"{"state":"NOPROCESS"}"#).unwrap();
    assert!(minimal.profile_id.is_none());
    assert!(minimal.message.is_empty());
}
