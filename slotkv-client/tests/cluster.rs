mod common;

use std::ops::ControlFlow;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use slotkv_client::slot::slot;
use slotkv_client::{Client, ClientError, Cluster, Pool, RespValue, Script};
use slotkv_testkit::{key_slot, Reply, Store};

use common::{cluster_options, start_cluster};

#[test]
fn keys_are_routed_to_their_slot_owner() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");
    assert_eq!(client.generation(), 1);
    assert_eq!(client.ranges().len(), 3);

    let keys: [&[u8]; 5] = [b"foo", b"bar", b"{user:1}.name", b"{user:1}.mail", b"123456789"];
    for key in keys {
        client.exec("SET", key, &[b"v"]).expect("set");
        let owner = cluster.owner_of(key_slot(key)).expect("owned slot");
        assert_eq!(client.node_for(key), Some(cluster.node(owner).addr()));
        assert_eq!(
            cluster.node(owner).with_store(|store| store.get(0, key)),
            Some(b"v".to_vec())
        );
    }
    assert_eq!(slot(b"{user:1}.name"), slot(b"{user:1}.mail"));

    // Nothing was redirected, so the topology was read exactly once.
    assert_eq!(client.refresh_count(), 1);
}

#[test]
fn moved_reply_refreshes_once_and_retries() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");
    assert_eq!(slot(b"foo"), 12182);
    assert_eq!(cluster.owner_of(12182), Some(2));

    cluster.assign(&[(0, 5460, 0), (5461, 16383, 1)]);
    let reply = client.exec("SET", b"foo", &[b"moved"]).expect("set after migration");
    assert!(reply.is_ok());

    assert_eq!(client.refresh_count(), 2);
    assert_eq!(client.generation(), 2);
    assert_eq!(cluster.node(2).command_count("SET"), 1);
    assert_eq!(cluster.node(1).command_count("SET"), 1);
    assert_eq!(
        cluster.node(1).with_store(|store| store.get(0, b"foo")),
        Some(b"moved".to_vec())
    );
    assert_eq!(client.node_for(b"foo"), Some(cluster.node(1).addr()));

    // The retired pool of the dropped node was closed.
    assert!(cluster
        .node(2)
        .wait_until(Duration::from_secs(2), |node| node.active_connections() == 0));
}

#[test]
fn unchanged_topology_is_not_reinstalled() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");
    client.exec("SET", b"foo", &[b"1"]).expect("set");

    assert!(!client.refresh_topology().expect("refresh"));
    assert_eq!(client.refresh_count(), 2);
    assert_eq!(client.generation(), 1);

    // Existing pools survived, so no new connection was dialed.
    let owner = cluster.owner_of(slot(b"foo")).expect("owner");
    client.exec("GET", b"foo", &[]).expect("get");
    assert_eq!(cluster.node(owner).accepted(), 1);
}

#[test]
fn batches_are_pinned_to_the_routing_slot() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");

    let replies = client
        .pipeline(b"{cart:7}", &mut |op| {
            op.cmd("SET", b"{cart:7}.items", &[b"3"])?;
            op.cmd("INCR", b"{cart:7}.items", &[])
        })
        .expect("same-slot pipeline");
    assert_eq!(replies[1], RespValue::Integer(4));

    let err = client
        .pipeline(b"foo", &mut |op| {
            op.cmd("SET", b"foo", &[b"1"])?;
            op.cmd("SET", b"bar", &[b"2"])
        })
        .unwrap_err();
    match err {
        ClientError::Partial { replies, source } => {
            assert_eq!(replies.len(), 1);
            assert!(matches!(
                *source,
                ClientError::CrossSlot {
                    expected: 12182,
                    found: 5061
                }
            ));
        }
        other => panic!("expected partial result, got {other:?}"),
    }
    let bar_owner = cluster.owner_of(slot(b"bar")).expect("owner");
    assert_eq!(cluster.node(bar_owner).with_store(|store| store.get(0, b"bar")), None);
}

#[test]
fn transactions_follow_the_routing_key() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");

    let replies = client
        .transaction(b"{acct:9}", &mut |op| {
            op.cmd("SET", b"{acct:9}.balance", &[b"100"])?;
            op.cmd("INCRBY", b"{acct:9}.balance", &[b"-40"])?;
            Ok(())
        })
        .expect("transaction");
    assert_eq!(replies[1], RespValue::Integer(60));

    let owner = cluster.owner_of(slot(b"{acct:9}")).expect("owner");
    assert_eq!(cluster.node(owner).command_count("EXEC"), 1);
    assert_eq!(cluster.command_count("MULTI"), 1);
}

#[test]
fn pipeline_redirected_wholesale_is_retried() {
    let cluster = start_cluster(2);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");
    let home = cluster.owner_of(slot(b"{job}")).expect("owner");
    let other = 1 - home;

    cluster.assign(&[(0, 16383, other)]);
    let replies = client
        .pipeline(b"{job}", &mut |op| {
            op.cmd("SET", b"{job}.a", &[b"1"])?;
            op.cmd("SET", b"{job}.b", &[b"2"])
        })
        .expect("pipeline after migration");

    assert!(replies.iter().all(RespValue::is_ok));
    assert_eq!(client.refresh_count(), 2);
    assert_eq!(
        cluster.node(other).with_store(|store| store.get(0, b"{job}.b")),
        Some(b"2".to_vec())
    );
}

#[test]
fn cluster_scripts_need_exactly_one_key() {
    let cluster = start_cluster(3);
    let source = "return redis.call('GET', KEYS[1])";
    cluster.register_script(source, |store: &mut Store, db: usize, keys: &[Vec<u8>], _: &[Vec<u8>]| {
        Reply::Bulk(store.get(db, &keys[0]))
    });
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");
    let script = Script::new(source);

    client.exec("SET", b"bar", &[b"x"]).expect("set");
    let reply = client.eval(&script, &[b"bar"], &[]).expect("eval");
    assert_eq!(reply, RespValue::Bulk(Some(b"x".to_vec())));

    let err = client.eval(&script, &[b"foo", b"bar"], &[]).unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedKeyCount(2)));
    let err = client.eval(&script, &[], &[]).unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedKeyCount(0)));
}

#[test]
fn publish_routes_by_channel() {
    let cluster = start_cluster(3);
    let client = Cluster::new(cluster_options(&cluster)).expect("cluster client");

    assert_eq!(client.publish(b"events", b"hello").expect("publish"), 0);
    assert_eq!(cluster.command_count("PUBLISH"), 1);
}

#[test]
fn unreachable_seeds_fail_construction() {
    let cluster = start_cluster(1);
    let mut options = cluster_options(&cluster);
    options.address = vec!["127.0.0.1:1".to_string()];
    options.connect_timeout = Some(Duration::from_millis(200));
    assert!(matches!(Cluster::new(options), Err(ClientError::Io(_))));
}

#[test]
fn select_is_refused_in_cluster_mode() {
    let cluster = start_cluster(2);
    let mut options = cluster_options(&cluster);
    options.select = 1;
    assert!(matches!(Cluster::new(options), Err(ClientError::Config(_))));
    assert_eq!(cluster.command_count("CLUSTER"), 0);

    // Cluster nodes reject the command itself too.
    let mut direct = cluster_options(&cluster);
    direct.cluster = false;
    direct.select = 1;
    direct.init_conns = 1;
    let addr = cluster.node(0).addr();
    assert!(matches!(
        Pool::new(addr, direct),
        Err(ClientError::Server { .. })
    ));
}

#[test]
fn close_unblocks_cluster_subscribers() {
    let cluster = start_cluster(2);
    let client = Arc::new(Cluster::new(cluster_options(&cluster)).expect("cluster client"));
    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let result = client.subscribe(
                b"deploys",
                &mut |_, _| Ok(ControlFlow::Continue(())),
                &mut |_| {
                    let _ = ready_tx.send(());
                    Ok(ControlFlow::Continue(()))
                },
            );
            let _ = done_tx.send(result);
        });
    }

    ready_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("subscription confirmed");
    Client::close(&*client);
    let result = done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("subscriber returns after close");
    assert!(matches!(result, Err(ClientError::Io(_))));
}
