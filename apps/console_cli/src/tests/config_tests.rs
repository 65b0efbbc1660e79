use super::{load_settings_from, Settings};

use std::{
    collections::HashMap,
    env, fs,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn temp_settings_file(label: &str, contents: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("console_cli_{label}_{suffix}.toml"));
    fs::write(&path, contents).expect("write settings");
    path
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn missing_file_and_env_yield_defaults() {
    let settings = load_settings_from(&PathBuf::from("/nonexistent/console.toml"), env_from(&[]))
        .expect("defaults");
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.page_size, 20);
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
}

#[test]
fn file_values_fill_over_defaults() {
    let path = temp_settings_file("file_values", "api_base_url = \"https://console.example.com/api\"\npoll_interval_ms = 500\n");
    let settings = load_settings_from(&path, env_from(&[])).expect("load");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.api_base_url, "https://console.example.com/api");
    assert_eq!(settings.poll_interval(), Duration::from_millis(500));
    assert_eq!(settings.loading_grace_ms, Settings::default().loading_grace_ms);
}

#[test]
fn environment_overrides_file_and_app_prefix_wins() {
    let path = temp_settings_file("env_overrides", "page_size = 50\nrequest_timeout_ms = 1000\n");
    let settings = load_settings_from(
        &path,
        env_from(&[
            ("CONSOLE_PAGE_SIZE", "75"),
            ("APP__PAGE_SIZE", "100"),
            ("CONSOLE_API_BASE_URL", "http://10.0.0.5/api"),
        ]),
    )
    .expect("load");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.page_size, 100);
    assert_eq!(settings.request_timeout_ms, 1000);
    assert_eq!(settings.api_base_url, "http://10.0.0.5/api");
}

#[test]
fn malformed_inputs_are_reported() {
    let error = load_settings_from(
        &PathBuf::from("/nonexistent/console.toml"),
        env_from(&[("CONSOLE_POLL_INTERVAL_MS", "soon")]),
    )
    .unwrap_err();
    assert!(error.to_string().contains("poll_interval_ms"));

    let path = temp_settings_file("malformed", "page_size = \"many\"\n");
    let error = load_settings_from(&path, env_from(&[])).unwrap_err();
    fs::remove_file(&path).expect("cleanup");
    assert!(error.to_string().contains("invalid settings file"));
}

#[test]
fn list_config_carries_loading_grace() {
    let settings = Settings {
        loading_grace_ms: 50,
        ..Settings::default()
    };
    let config = settings.list_config("clusters");
    assert_eq!(config.name, "clusters");
    assert_eq!(config.loading_grace, Duration::from_millis(50));
    assert!(config.search_error_as_empty.is_some());
}
