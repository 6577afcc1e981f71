use super::*;
use crate::error::GantryError;
use std::collections::HashMap;

fn no_vars() -> HashMap<String, String> {
    HashMap::new()
}

const SIMPLE: &str = r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "8080:80"
    depends_on:
      - db
  db:
    image: postgres:16
"#;

#[test]
fn test_validate_simple_stack() {
    let stack = StackValidator::validate(SIMPLE, &no_vars()).unwrap();
    assert_eq!(stack.start_order, vec!["db", "web"]);
    assert_eq!(stack.stop_order, vec!["web", "db"]);
    assert_eq!(stack.waves, vec![vec!["db"], vec!["web"]]);
}

#[test]
fn test_validate_is_idempotent() {
    let first = StackValidator::validate(SIMPLE, &no_vars()).unwrap();
    for _ in 0..3 {
        let again = StackValidator::validate(SIMPLE, &no_vars()).unwrap();
        assert_eq!(again.start_order, first.start_order);
        assert_eq!(again.stop_order, first.stop_order);
        assert_eq!(again.waves, first.waves);
    }
}

#[test]
fn test_safety_scan_rejects_executable_tags() {
    let text = r#"
services:
  web:
    image: !!python/object/apply:os.system ["id"]
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    assert!(matches!(err, GantryError::UnsafeCompose { .. }));
}

#[test]
fn test_empty_services_rejected() {
    let err = StackValidator::validate("services: {}\n", &no_vars()).unwrap_err();
    assert!(matches!(err, GantryError::ComposeParse { .. }));
}

#[test]
fn test_missing_image_rejected() {
    let text = r#"
services:
  web:
    ports:
      - "80:80"
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    match err {
        GantryError::ComposeParse { reason } => assert!(reason.contains("web")),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_build_directive_rejected_with_guidance() {
    let text = r#"
services:
  web:
    build: .
    image: myapp:dev
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    match err {
        GantryError::BuildNotSupported { service } => assert_eq!(service, "web"),
        other => panic!("expected build rejection, got {:?}", other),
    }
}

#[test]
fn test_variable_substitution() {
    let text = r#"
services:
  web:
    image: nginx:${TAG}
    environment:
      MODE: ${MODE:-production}
"#;
    let mut vars = HashMap::new();
    vars.insert("TAG".to_string(), "1.27".to_string());

    let stack = StackValidator::validate(text, &vars).unwrap();
    let web = &stack.compose.services["web"];
    assert_eq!(web.image.as_deref(), Some("nginx:1.27"));
    assert_eq!(web.environment.to_map().get("MODE"), Some(&"production".to_string()));
}

#[test]
fn test_missing_variable_named_in_error() {
    let text = "services:\n  web:\n    image: nginx:${TAG}\n";
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    match err {
        GantryError::MissingVariable { name } => assert_eq!(name, "TAG"),
        other => panic!("expected missing variable, got {:?}", other),
    }
}

#[test]
fn test_variable_value_beats_default() {
    let mut vars = HashMap::new();
    vars.insert("MODE".to_string(), "debug".to_string());
    let out =
        StackValidator::substitute_variables("mode=${MODE:-production}", &vars).unwrap();
    assert_eq!(out, "mode=debug");
}

#[test]
fn test_invalid_port_rejected() {
    for bad in ["80", "0:80", "99999:80", "80:80/icmp", "a:b"] {
        let text = format!(
            "services:\n  web:\n    image: nginx:1.27\n    ports:\n      - \"{}\"\n",
            bad
        );
        let err = StackValidator::validate(&text, &no_vars()).unwrap_err();
        assert!(
            matches!(err, GantryError::InvalidPort { .. }),
            "expected InvalidPort for {:?}, got {:?}",
            bad,
            err
        );
    }
}

#[test]
fn test_port_mapping_forms() {
    let simple = parse_port_mapping("8080:80").unwrap();
    assert_eq!(simple.host_ip, None);
    assert_eq!(simple.host_port, 8080);
    assert_eq!(simple.container_port, 80);
    assert_eq!(simple.protocol, crate::types::Protocol::Tcp);

    let full = parse_port_mapping("127.0.0.1:5353:53/udp").unwrap();
    assert_eq!(full.host_ip.as_deref(), Some("127.0.0.1"));
    assert_eq!(full.host_port, 5353);
    assert_eq!(full.container_port, 53);
    assert_eq!(full.protocol, crate::types::Protocol::Udp);
}

#[test]
fn test_self_dependency_rejected() {
    let text = r#"
services:
  web:
    image: nginx:1.27
    depends_on:
      - web
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    assert!(matches!(err, GantryError::SelfDependency { .. }));
}

#[test]
fn test_unknown_dependency_rejected() {
    let text = r#"
services:
  web:
    image: nginx:1.27
    depends_on:
      - ghost
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    assert!(matches!(err, GantryError::MissingDependency { .. }));
}

#[test]
fn test_cycle_reported_with_path() {
    let text = r#"
services:
  a:
    image: img:1
    depends_on: [b]
  b:
    image: img:1
    depends_on: [c]
  c:
    image: img:1
    depends_on: [a]
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    match err {
        GantryError::DependencyCycle { path } => assert_eq!(path, "a -> b -> c -> a"),
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn test_network_mode_conflicts_with_networks() {
    let text = r#"
services:
  web:
    image: nginx:1.27
    network_mode: host
    networks:
      - backend
networks:
  backend:
"#;
    let err = StackValidator::validate(text, &no_vars()).unwrap_err();
    assert!(matches!(err, GantryError::ConflictingNetworkConfig { .. }));
}

#[test]
fn test_long_depends_on_syntax() {
    let text = r#"
services:
  web:
    image: nginx:1.27
    depends_on:
      db:
        condition: service_healthy
  db:
    image: postgres:16
"#;
    let stack = StackValidator::validate(text, &no_vars()).unwrap();
    assert_eq!(stack.start_order, vec!["db", "web"]);
}
