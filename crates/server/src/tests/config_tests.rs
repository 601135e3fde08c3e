use std::{collections::HashMap, fs};

use super::{load_settings_from, normalize_database_url, Settings};

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite:data\\chat.db"),
        "sqlite://data/chat.db"
    );
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn defaults_apply_without_file_or_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings =
        load_settings_from(&dir.path().join("missing.toml"), HashMap::new()).expect("settings");
    assert_eq!(settings.server_bind, "127.0.0.1:8443");
    assert_eq!(settings.max_body_bytes, 10 * 1024 * 1024);
    assert!(settings.frontend_url.is_none());
}

#[test]
fn environment_overrides_file_and_app_prefix_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("server.toml");
    fs::write(
        &file,
        concat!(
            "server_bind = \"0.0.0.0:9000\"\n",
            "database_url = \"./file.db\"\n",
            "frontend_url = \"http://localhost:5173/\"\n",
        ),
    )
    .expect("write config");

    let settings = load_settings_from(&file, HashMap::new()).expect("settings");
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.database_url, "sqlite://./file.db");
    assert_eq!(settings.frontend_url.as_deref(), Some("http://localhost:5173"));

    let settings = load_settings_from(
        &file,
        vars(&[
            ("SERVER_BIND", "127.0.0.1:7000"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("APP__SERVER_BIND", "127.0.0.1:7001"),
            ("APP__MAX_BODY_BYTES", "1024"),
        ]),
    )
    .expect("settings");
    assert_eq!(settings.server_bind, "127.0.0.1:7001");
    assert_eq!(settings.database_url, "sqlite::memory:");
    assert_eq!(settings.max_body_bytes, 1024);
}
