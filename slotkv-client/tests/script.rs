mod common;

use slotkv_client::{Client, ClientError, Pool, RespValue, Script};
use slotkv_testkit::{Reply, Store};

use common::{node_options, start_node};

const GET_SCRIPT: &str = "return redis.call('GET', KEYS[1])";

fn get_handler(store: &mut Store, db: usize, keys: &[Vec<u8>], _args: &[Vec<u8>]) -> Reply {
    Reply::Bulk(store.get(db, &keys[0]))
}

#[test]
fn evalsha_falls_back_to_eval_once() {
    let node = start_node();
    node.register_script(GET_SCRIPT, get_handler);
    let pool = Pool::new(node.addr(), node_options(node.addr())).expect("pool");
    pool.exec("SET", b"color", &[b"blue"]).expect("set");

    let script = Script::new(GET_SCRIPT);
    let reply = pool.eval(&script, &[b"color"], &[]).expect("first eval");
    assert_eq!(reply, RespValue::Bulk(Some(b"blue".to_vec())));
    assert_eq!(node.command_count("EVALSHA"), 1);
    assert_eq!(node.command_count("EVAL"), 1);

    // The digest is cached now, so the source is not sent again.
    pool.eval(&script, &[b"color"], &[]).expect("second eval");
    assert_eq!(node.command_count("EVALSHA"), 2);
    assert_eq!(node.command_count("EVAL"), 1);

    // The NOSCRIPT round trip did not cost the connection.
    assert_eq!(node.accepted(), 1);
}

#[test]
fn script_cache_flush_is_recovered() {
    let node = start_node();
    node.register_script(GET_SCRIPT, get_handler);
    let pool = Pool::new(node.addr(), node_options(node.addr())).expect("pool");
    let script = Script::new(GET_SCRIPT);

    pool.eval(&script, &[b"k"], &[]).expect("warm up");
    node.flush_scripts();
    let reply = pool.eval(&script, &[b"k"], &[]).expect("after flush");
    assert!(reply.is_nil());
    assert_eq!(node.command_count("EVAL"), 2);
}

#[test]
fn script_keys_get_the_suffix() {
    let node = start_node();
    node.register_script(GET_SCRIPT, get_handler);
    let mut options = node_options(node.addr());
    options.keyfix = Some("v1".to_string());
    let pool = Pool::new(node.addr(), options).expect("pool");

    node.with_store(|store| store.set(0, b"cfg.v1", b"on".to_vec(), None));
    let reply = pool.eval(&Script::new(GET_SCRIPT), &[b"cfg"], &[]).expect("eval");
    assert_eq!(reply, RespValue::Bulk(Some(b"on".to_vec())));
}

#[test]
fn script_errors_are_server_errors() {
    let node = start_node();
    let pool = Pool::new(node.addr(), node_options(node.addr())).expect("pool");

    let err = pool
        .eval(&Script::new("return unknown()"), &[b"k"], &[])
        .unwrap_err();
    assert!(matches!(err, ClientError::Server { .. }));
}
