use std::io::Write;
use std::time::Duration;

use toolbridge_config::{ServersConfig, TransportConfig};

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_yaml_file_in_declared_order() {
    let file = write_temp(
        ".yaml",
        r#"
mcpServers:
  zeta:
    command: npx
    args: ["-y", "@modelcontextprotocol/server-everything"]
  github:
    type: sse
    url: http://localhost:8080/sse
    headers:
      Authorization: Bearer token123
    timeout: 2.5
"#,
    );

    let config = ServersConfig::from_file(file.path()).unwrap();
    let names: Vec<&str> = config.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["zeta", "github"]);

    let github = config.iter().find(|s| s.name == "github").unwrap();
    assert_eq!(github.timeout(), Duration::from_millis(2500));
    match &github.transport {
        TransportConfig::Network(network) => {
            assert_eq!(network.headers["Authorization"], "Bearer token123");
        }
        other => panic!("expected network transport, got {:?}", other),
    }
}

#[test]
fn loads_json_file_and_substitutes_env() {
    std::env::set_var("TOOLBRIDGE_FILE_TEST_KEY", "from-env");
    let file = write_temp(
        ".json",
        r#"{"search": {"url": "https://search.example.com/sse",
                        "headers": {"X-Api-Key": "${TOOLBRIDGE_FILE_TEST_KEY}"}}}"#,
    );

    let config = ServersConfig::from_file(file.path()).unwrap();
    match &config.iter().next().unwrap().transport {
        TransportConfig::Network(network) => {
            assert_eq!(network.headers["X-Api-Key"], "from-env");
        }
        other => panic!("expected network transport, got {:?}", other),
    }
    std::env::remove_var("TOOLBRIDGE_FILE_TEST_KEY");
}

#[test]
fn missing_file_is_a_config_error() {
    let err = ServersConfig::from_file("/nonexistent/toolbridge/servers.json").unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}
