//! A symmetric mesh: both agents publish a procedure and call the other
//! side's at the same time.
//!
//! Run with: `cargo run --example greeter`

use agentwire::{Agent, Transport, Value};

fn greeter(me: &'static str) -> agentwire::Result<Agent> {
    Agent::builder()
        .procedure("greet", move |args| {
            let from = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("someone")
                .to_owned();
            if let Some(cb) = args.get(1).and_then(Value::as_func) {
                cb.call(vec![
                    Value::Null,
                    Value::from(format!("hello {from}, this is {me}")),
                ]);
            }
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let alice = greeter("alice")?;
    let bob = greeter("bob")?;

    let (alice_stream, bob_stream) = tokio::io::duplex(1 << 16);
    let (ar, aw) = tokio::io::split(alice_stream);
    let (br, bw) = tokio::io::split(bob_stream);

    let (alice_peer, bob_peer) = tokio::join!(
        alice.connect(Transport::new(ar, aw)),
        bob.connect(Transport::new(br, bw)),
    );
    let alice_peer = alice_peer?;
    let bob_peer = bob_peer?;

    let (done_tx, mut done_rx) = tokio::sync::mpsc::channel::<String>(2);

    for (peer, name) in [(&alice_peer, "alice"), (&bob_peer, "bob")] {
        let done = done_tx.clone();
        peer.invoke(
            "greet",
            vec![
                Value::from(name),
                Value::callback(move |reply| {
                    if let Some(text) = reply.get(1).and_then(Value::as_str) {
                        let _ = done.try_send(text.to_owned());
                    }
                }),
            ],
        )?;
    }
    drop(done_tx);

    while let Some(line) = done_rx.recv().await {
        println!("{line}");
    }

    Ok(())
}
