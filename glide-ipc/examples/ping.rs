//! Connect to a core listening on a Unix socket and send a PING.
//!
//! ```text
//! cargo run -p glide-ipc --example ping -- /tmp/glide-core.sock
//! ```
//!
//! Values returned by handle are resolved through an in-process
//! [`HandleRegistry`], so this only works against a core sharing it.

use std::process;
use std::sync::Arc;

use glide_ipc::{ClientConfig, GlideClient, HandleRegistry, NodeAddress};
use glide_ipc_core::UnixSocketConnector;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let socket_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GLIDE_CORE_SOCKET").ok())
        .unwrap_or_else(|| "/tmp/glide-core.sock".to_string());

    let connector = UnixSocketConnector::new(socket_path);
    let client = match GlideClient::connect(
        ClientConfig::standalone(vec![NodeAddress::default()]),
        &connector,
        Arc::new(HandleRegistry::new()),
    )
    .await
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("connect failed: {e}");
            process::exit(1);
        }
    };

    match client.custom_command(["PING"]).await {
        Ok(value) => println!("{value:?}"),
        Err(e) => eprintln!("PING failed: {e}"),
    }
    client.close(None).await;
}
