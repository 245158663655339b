//! End-to-end tests: two agents wired over in-memory duplex streams.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentwire::{Agent, Peer, PeerEvent, Transport, Value, ValueMap};
use tokio::sync::mpsc;

/// A pair of transports whose byte streams are cross-connected.
fn transports() -> (Transport, Transport) {
    let (a, b) = tokio::io::duplex(1 << 16);
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);
    (Transport::new(ar, aw), Transport::new(br, bw))
}

/// Connect two agents to each other and return both live peers.
async fn connect_pair(a: &Agent, b: &Agent) -> (Peer, Peer) {
    let (ta, tb) = transports();
    let (pa, pb) = tokio::join!(a.connect(ta), b.connect(tb));
    (pa.expect("a connects"), pb.expect("b connects"))
}

/// A callback value that forwards its arguments to a channel.
fn capture() -> (Value, mpsc::UnboundedReceiver<Vec<Value>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb = Value::callback(move |args| {
        let _ = tx.send(args);
    });
    (cb, rx)
}

async fn recv_args(rx: &mut mpsc::UnboundedReceiver<Vec<Value>>) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback within two seconds")
        .expect("callback invoked")
}

fn adder() -> Agent {
    Agent::builder()
        .procedure("add", |args| {
            let x = args.first().and_then(Value::as_int).unwrap_or(0);
            let y = args.get(1).and_then(Value::as_int).unwrap_or(0);
            if let Some(cb) = args.get(2).and_then(Value::as_func) {
                cb.call(vec![Value::Null, Value::Int(x + y)]);
            }
        })
        .procedure("echo", |args| {
            if let (Some(value), Some(cb)) =
                (args.first(), args.get(1).and_then(Value::as_func))
            {
                cb.call(vec![Value::Null, value.clone()]);
            }
        })
        .procedure("hold", |_args| {
            // accepts a callback and never answers
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_handshake_installs_proxies() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (peer_a, peer_b) = connect_pair(&a, &b).await;

    let api_b = peer_b.api();
    assert!(api_b.contains_key("add"));
    assert!(api_b.contains_key("echo"));
    assert!(api_b["add"].as_func().is_some());

    // the other side published nothing
    assert!(peer_a.api().is_empty());
}

#[tokio::test]
async fn test_round_trip_call() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (_peer_a, peer_b) = connect_pair(&a, &b).await;

    let (cb, mut rx) = capture();
    peer_b
        .invoke("add", vec![Value::Int(2), Value::Int(3), cb])
        .unwrap();

    let reply = recv_args(&mut rx).await;
    assert_eq!(reply, vec![Value::Null, Value::Int(5)]);
}

#[tokio::test]
async fn test_many_sequential_calls_reuse_keys() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (_peer_a, peer_b) = connect_pair(&a, &b).await;

    for i in 0..50 {
        let (cb, mut rx) = capture();
        peer_b
            .invoke("add", vec![Value::Int(i), Value::Int(1), cb])
            .unwrap();
        let reply = recv_args(&mut rx).await;
        assert_eq!(reply, vec![Value::Null, Value::Int(i + 1)]);
    }

    // every handle was consumed on reply
    assert_eq!(peer_b.pending_callbacks(), 0);
}

#[tokio::test]
async fn test_cyclic_argument_round_trips() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (_peer_a, peer_b) = connect_pair(&a, &b).await;

    let x = ValueMap::new();
    x.insert("self", Value::Map(x.clone()));
    x.insert("label", Value::from("loop"));

    let (cb, mut rx) = capture();
    peer_b.invoke("echo", vec![Value::Map(x), cb]).unwrap();

    let reply = recv_args(&mut rx).await;
    assert!(reply[0].is_null());

    let y = reply[1].as_map().expect("echoed map");
    assert_eq!(y.get("label"), Some(Value::from("loop")));
    let inner = y.get("self").expect("self entry");
    assert!(inner.as_map().expect("self is a map").ptr_eq(y));
}

#[tokio::test]
async fn test_dollar_keys_survive_end_to_end() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (_peer_a, peer_b) = connect_pair(&a, &b).await;

    let weird = ValueMap::new();
    weird.insert("$weird", Value::Int(7));
    weird.insert("normal", Value::from("$ok"));

    let (cb, mut rx) = capture();
    peer_b
        .invoke("echo", vec![Value::Map(weird.clone()), cb])
        .unwrap();

    let reply = recv_args(&mut rx).await;
    assert_eq!(reply[1], Value::Map(weird));
}

#[tokio::test]
async fn test_symmetric_invocation() {
    let a = Agent::builder()
        .procedure("whoami", |args| {
            if let Some(cb) = args.first().and_then(Value::as_func) {
                cb.call(vec![Value::Null, Value::from("a")]);
            }
        })
        .build()
        .unwrap();
    let b = Agent::builder()
        .procedure("whoami", |args| {
            if let Some(cb) = args.first().and_then(Value::as_func) {
                cb.call(vec![Value::Null, Value::from("b")]);
            }
        })
        .build()
        .unwrap();

    let (peer_a, peer_b) = connect_pair(&a, &b).await;

    // both sides call the other simultaneously
    let (cb_a, mut rx_a) = capture();
    let (cb_b, mut rx_b) = capture();
    peer_a.invoke("whoami", vec![cb_a]).unwrap();
    peer_b.invoke("whoami", vec![cb_b]).unwrap();

    assert_eq!(recv_args(&mut rx_a).await[1], Value::from("b"));
    assert_eq!(recv_args(&mut rx_b).await[1], Value::from("a"));
}

#[tokio::test]
async fn test_disconnect_flushes_outstanding_callbacks() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (peer_a, peer_b) = connect_pair(&a, &b).await;

    // callbacks and the disconnect event record into one ordered log
    let log = Arc::new(Mutex::new(Vec::<String>::new()));

    for i in 0..3 {
        let log = log.clone();
        let cb = Value::callback(move |args| {
            let code = args[0]
                .as_map()
                .and_then(|fault| fault.get("code"))
                .and_then(|code| code.as_str().map(str::to_owned))
                .unwrap_or_default();
            log.lock().unwrap().push(format!("cb{i}:{code}"));
        });
        peer_b.invoke("hold", vec![Value::Int(i), cb]).unwrap();
    }

    // wait until all three calls actually reached the far side
    tokio::time::timeout(Duration::from_secs(2), async {
        while peer_b.pending_callbacks() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("three callbacks stored");

    let mut events = peer_b.events();
    peer_a.disconnect(None); // drops the stream under B

    let fault = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.expect("event stream open") {
                PeerEvent::Disconnect(fault) => return fault,
                _ => continue,
            }
        }
    })
    .await
    .expect("disconnect within two seconds");

    let entries = log.lock().unwrap().clone();
    assert_eq!(entries.len(), 3, "each callback flushed exactly once");
    for i in 0..3 {
        assert!(entries.contains(&format!("cb{i}:EDISCONNECT")));
    }
    assert_eq!(fault.expect("carries a fault").code(), "EDISCONNECT");
    assert_eq!(peer_b.pending_callbacks(), 0);
}

#[tokio::test]
async fn test_proxy_identity_survives_reconnect() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let peer_b = b.peer();

    // first connection
    let (ta, tb) = transports();
    let (ra, rb) = tokio::join!(a.connect(ta), b.connect_peer(&peer_b, tb));
    let _peer_a = ra.unwrap();
    rb.unwrap();

    let first = peer_b.api()["add"].as_func().unwrap().clone();

    // tear down and reconnect with fresh streams
    peer_b.disconnect(None);

    let (ta2, tb2) = transports();
    let (ra2, rb2) = tokio::join!(a.connect(ta2), b.connect_peer(&peer_b, tb2));
    ra2.unwrap();
    rb2.unwrap();

    let second = peer_b.api()["add"].as_func().unwrap().clone();
    assert!(first.ptr_eq(&second), "proxy identity preserved");

    // and the preserved proxy still works
    let (cb, mut rx) = capture();
    peer_b
        .invoke("add", vec![Value::Int(20), Value::Int(22), cb])
        .unwrap();
    assert_eq!(recv_args(&mut rx).await[1], Value::Int(42));
}

#[tokio::test]
async fn test_proxy_invoked_while_disconnected() {
    let a = adder();
    let b = Agent::builder().build().unwrap();

    let (peer_a, peer_b) = connect_pair(&a, &b).await;

    let add = peer_b.api()["add"].as_func().unwrap().clone();

    let mut events = peer_b.events();
    peer_a.disconnect(None);
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let PeerEvent::Disconnect(_) = events.recv().await.expect("event stream") {
                return;
            }
        }
    })
    .await
    .expect("b observes the disconnect");

    // last argument is a procedure: it hears ENOTCONNECTED
    let (cb, mut rx) = capture();
    add.call(vec![Value::Int(1), Value::Int(2), cb]);

    let reply = recv_args(&mut rx).await;
    let fault = reply[0].as_map().expect("fault map");
    assert_eq!(fault.get("code"), Some(Value::from("ENOTCONNECTED")));

    // no trailing procedure: dropped without a sound
    add.call(vec![Value::Int(1), Value::Int(2)]);
}

#[tokio::test]
async fn test_disconnect_without_transport_emits_error() {
    let b = Agent::builder().build().unwrap();
    let peer = b.peer();

    let mut events = peer.events();
    peer.disconnect(None);

    match tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event within a second")
        .expect("event stream open")
    {
        PeerEvent::Error(fault) => assert_eq!(fault.code(), "ENOTCONNECTED"),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_callback_passed_to_far_side_fires_once() {
    // the far side invokes the same wire key twice; the second dispatch
    // must not reach the application
    let a = Agent::builder()
        .procedure("twice", |args| {
            if let Some(cb) = args.first().and_then(Value::as_func) {
                cb.call(vec![Value::Null]);
                cb.call(vec![Value::Null]);
            }
        })
        .build()
        .unwrap();
    let b = Agent::builder().build().unwrap();

    let (_peer_a, peer_b) = connect_pair(&a, &b).await;

    let counter = Arc::new(Mutex::new(0u32));
    let seen = counter.clone();
    let cb = Value::callback(move |_args| {
        *seen.lock().unwrap() += 1;
    });

    let mut events = peer_b.events();
    peer_b.invoke("twice", vec![cb]).unwrap();

    // the stale second invocation surfaces as a protocol error on B
    let fault = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let PeerEvent::Error(fault) = events.recv().await.expect("event stream") {
                return fault;
            }
        }
    })
    .await
    .expect("error event within two seconds");

    assert_eq!(*counter.lock().unwrap(), 1);
    assert!(fault.message.contains("unknown callback key"));
}
