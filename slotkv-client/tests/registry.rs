mod common;

use std::sync::Arc;

use slotkv_client::{Client, ClientError, LockOptions, Registry, RegistryConfig, RespValue};

use common::{eventually, node_options, start_node};

fn document(addr: &str) -> String {
    format!(
        r#"
        [[redis]]
        key = "demo, cache"
        default = true
        address = ["{addr}"]
        init_conns = 1
        max_conns = 4
        read_timeout = "2s"

        [[redis]]
        key = "sessions"
        address = ["{addr}"]
        select = 2
        "#
    )
}

#[test]
fn bootstrap_registers_aliases_and_default() {
    let node = start_node();
    let config = RegistryConfig::from_toml_str(&document(&node.addr())).expect("config");
    let registry = Registry::from_config(&config).expect("registry");

    assert_eq!(registry.names(), vec!["cache", "demo", "sessions"]);
    let demo = registry.get("demo").expect("demo");
    let cache = registry.get("cache").expect("cache");
    assert!(Arc::ptr_eq(&demo, &cache));
    assert!(Arc::ptr_eq(&demo, &registry.default_client().expect("default")));

    let sessions = registry.get("sessions").expect("sessions");
    sessions.exec("SET", b"sid", &[b"abc"]).expect("set");
    assert_eq!(node.with_store(|store| store.get(2, b"sid")), Some(b"abc".to_vec()));
    assert_eq!(
        demo.exec("GET", b"sid", &[]).expect("get"),
        RespValue::Bulk(None)
    );
}

#[test]
fn taken_names_fail_before_dialing() {
    let node = start_node();
    let registry = Registry::new();
    let mut options = node_options(node.addr());
    options.init_conns = 1;
    registry.setup("primary", options.clone(), true).expect("setup");
    assert!(eventually(&node, |node| node.accepted() == 1));

    let err = registry.setup("backup, primary", options.clone(), false).unwrap_err();
    assert!(matches!(err, ClientError::DuplicateName(name) if name == "primary"));
    let err = registry.setup("twin, twin", options, false).unwrap_err();
    assert!(matches!(err, ClientError::DuplicateName(_)));

    assert_eq!(registry.names(), vec!["primary"]);
    assert_eq!(node.accepted(), 1);
}

#[test]
fn mutex_resolves_clients_by_name() {
    let node = start_node();
    let config = RegistryConfig::from_toml_str(&document(&node.addr())).expect("config");
    let registry = Registry::from_config(&config).expect("registry");

    let by_name = LockOptions {
        client: Some("sessions".to_string()),
        tries: 1,
        ..LockOptions::default()
    };
    let mutex = registry.mutex("nightly", &by_name).expect("mutex");
    mutex.lock().expect("lock");
    assert!(node.with_store(|store| store.contains(2, b"nightly")));
    assert!(mutex.unlock().expect("unlock"));

    let by_default = registry
        .mutex("nightly", &LockOptions { tries: 1, ..LockOptions::default() })
        .expect("default mutex");
    by_default.lock().expect("lock");
    assert!(node.with_store(|store| store.contains(0, b"nightly")));

    let missing = LockOptions {
        client: Some("nope".to_string()),
        ..LockOptions::default()
    };
    assert!(matches!(
        registry.mutex("nightly", &missing),
        Err(ClientError::ClientNotFound(_))
    ));
}

#[test]
fn close_all_empties_the_registry() {
    let node = start_node();
    let config = RegistryConfig::from_toml_str(&document(&node.addr())).expect("config");
    let registry = Registry::from_config(&config).expect("registry");
    let demo = registry.get("demo").expect("demo");

    registry.close_all();
    assert!(registry.names().is_empty());
    assert!(registry.default_client().is_none());
    assert!(matches!(
        demo.exec("GET", b"k", &[]),
        Err(ClientError::PoolClosed)
    ));
    assert!(eventually(&node, |node| node.active_connections() == 0));
}

#[test]
fn bootstrap_failure_closes_built_clients() {
    let node = start_node();
    let doc = format!(
        r#"
        [[redis]]
        key = "ok"
        address = ["{}"]
        init_conns = 1

        [[redis]]
        key = "ok"
        address = ["{}"]
        "#,
        node.addr(),
        node.addr()
    );
    let config = RegistryConfig::from_toml_str(&doc).expect("config");
    let err = Registry::from_config(&config).unwrap_err();
    assert!(matches!(err, ClientError::DuplicateName(_)));
    assert!(eventually(&node, |node| node.active_connections() == 0));
}
