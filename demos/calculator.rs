//! Two agents wired over an in-process duplex stream: one side publishes a
//! tiny calculator API, the other calls it and prints the replies.
//!
//! Run with: `cargo run --example calculator`

use agentwire::{Agent, Transport, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = Agent::builder()
        .procedure("add", |args| {
            let x = args[0].as_int().unwrap_or(0);
            let y = args[1].as_int().unwrap_or(0);
            if let Some(cb) = args.get(2).and_then(Value::as_func) {
                cb.call(vec![Value::Null, Value::Int(x + y)]);
            }
        })
        .procedure("div", |args| {
            let x = args[0].as_int().unwrap_or(0);
            let y = args[1].as_int().unwrap_or(0);
            if let Some(cb) = args.get(2).and_then(Value::as_func) {
                if y == 0 {
                    let fault = agentwire::ValueMap::new();
                    fault.insert("code", Value::from("EDIVZERO"));
                    fault.insert("message", Value::from("division by zero"));
                    cb.call(vec![Value::Map(fault)]);
                } else {
                    cb.call(vec![Value::Null, Value::Int(x / y)]);
                }
            }
        })
        .build()?;
    let client = Agent::builder().build()?;

    let (server_stream, client_stream) = tokio::io::duplex(1 << 16);
    let (sr, sw) = tokio::io::split(server_stream);
    let (cr, cw) = tokio::io::split(client_stream);

    let (server_peer, client_peer) = tokio::join!(
        server.connect(Transport::new(sr, sw)),
        client.connect(Transport::new(cr, cw)),
    );
    let _server_peer = server_peer?;
    let client_peer = client_peer?;

    println!("remote api: {:?}", client_peer.api().keys().collect::<Vec<_>>());

    for (name, x, y) in [("add", 2, 3), ("div", 42, 6), ("div", 1, 0)] {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        client_peer.invoke(
            name,
            vec![
                Value::Int(x),
                Value::Int(y),
                Value::callback(move |reply| {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(reply);
                    }
                }),
            ],
        )?;

        let reply = rx.await?;
        if reply[0].is_null() {
            println!("{name}({x}, {y}) = {:?}", reply[1]);
        } else {
            println!("{name}({x}, {y}) failed: {:?}", reply[0]);
        }
    }

    Ok(())
}
