//! Unit tests for error display and conversions.

use canvas_spawn::AppError;

#[test]
fn display_prefixes_category() {
    assert_eq!(AppError::Ipc("bind failed".into()).to_string(), "ipc: bind failed");
    assert_eq!(AppError::Pane("gone".into()).to_string(), "pane: gone");
    assert_eq!(
        AppError::Connect("no endpoint".into()).to_string(),
        "connect: no endpoint"
    );
    assert_eq!(AppError::NotFound("pane %1".into()).to_string(), "not found: pane %1");
}

#[test]
fn io_error_converts_to_io_variant() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("disk full")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse: Result<toml::Value, _> = toml::from_str("= broken");
    let err: AppError = parse.expect_err("must fail").into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
