//! Unit tests for `AppError` display and fatality classification.

use agent_console::AppError;

#[test]
fn display_prefixes_identify_the_failure() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Spawn("x".into()), "spawn failure: x"),
        (AppError::Handshake("x".into()), "handshake failure: x"),
        (AppError::Protocol("x".into()), "protocol violation: x"),
        (AppError::Timeout("x".into()), "timeout: x"),
        (AppError::TransportBusy("x".into()), "transport busy: x"),
        (AppError::TransportClosed("x".into()), "transport closed: x"),
        (AppError::AgentInternal("x".into()), "agent error: x"),
        (AppError::SessionClosed, "session closed"),
        (AppError::InvalidState("x".into()), "invalid state: x"),
        (AppError::NotFound("x".into()), "not found: x"),
        (AppError::PathViolation("x".into()), "path violation: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn agent_messages_are_surfaced_verbatim() {
    let err = AppError::AgentInternal("Authentication required".into());
    assert!(err.to_string().ends_with("Authentication required"));
}

#[test]
fn session_fatal_errors() {
    assert!(AppError::Spawn("missing".into()).is_session_fatal());
    assert!(AppError::Handshake("refused".into()).is_session_fatal());
    assert!(AppError::TransportClosed("eof".into()).is_session_fatal());
    assert!(AppError::SessionClosed.is_session_fatal());
}

#[test]
fn scoped_errors_are_not_fatal() {
    for err in [
        AppError::Timeout("request".into()),
        AppError::TransportBusy("full".into()),
        AppError::AgentInternal("boom".into()),
        AppError::InvalidState("busy".into()),
        AppError::NotFound("perm".into()),
        AppError::PathViolation("..".into()),
        AppError::Protocol("junk".into()),
    ] {
        assert!(!err.is_session_fatal(), "{err}");
    }
}

#[test]
fn io_errors_convert() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref m) if m.contains("denied")));
}

#[test]
fn toml_errors_convert_to_config() {
    let parse = toml::from_str::<toml::Value>("= nope").expect_err("invalid toml");
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}
