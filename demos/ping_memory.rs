//! Ping over the in-memory transport.
//!
//! Run with `RUST_LOG=mux_rpc=debug cargo run --example ping_memory`.

use serde_json::json;
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

use mux_rpc::{
    // ---
    create_memory_transport,
    ConnectionBuilder,
    ConnectionEvent,
    PushedEvent,
    Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_format()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let (transport, mut peer) = create_memory_transport();

    let manager = ConnectionBuilder::new(transport)
        .client_id("ping-demo")
        .build();

    let _status = manager
        .connection_events()
        .subscribe(|event: &ConnectionEvent| match event.error() {
            Some(err) => println!("connection {} ({err})", event.state()),
            None => println!("connection {}", event.state()),
        });
    let _pushes = manager.pushed_events().subscribe(|event: &PushedEvent| {
        println!("server pushed {:?}", event);
    });

    // Remote side: answer pings and announce each one.
    let server = tokio::spawn(async move {
        while let Some(request) = peer.next_request().await {
            if &*request.command == "ping" {
                peer.push_event(PushedEvent::new("pinged").with_field("id", request.id.as_str()))
                    .await;
                peer.respond(&request.id, json!("pong")).await;
            } else {
                peer.drop_connection(Some("unknown command")).await;
            }
        }
    });

    manager.start().await?;

    for _ in 0..3 {
        let reply = manager.request("ping", json!({})).await?.await?;
        println!("reply: {reply}");
    }

    let err = manager.request("shutdown", json!({})).await?.await.unwrap_err();
    println!("after unknown command: {err}");

    manager.stop().await?;
    drop(manager);
    server.abort();
    Ok(())
}
