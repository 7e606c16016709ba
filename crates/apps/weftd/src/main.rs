//! weftd: one mesh node over real TCP links.
//!
//! Start a first node listening, then point further nodes at it:
//!
//! ```text
//! weftd --node-id 1001 --listen 0.0.0.0:5555 --root
//! weftd --node-id 2002 --listen 0.0.0.0:5556 --peer 127.0.0.1:5555
//! ```

use std::net::SocketAddr;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use weft_mesh::{Mesh, MeshConfig, SystemClock};
use weft_net::tcp::{run_node, TcpTransport};

#[derive(Parser, Debug)]
#[command(name = "weftd", about = "weft mesh demo node")]
struct Args {
    /// Stable 32-bit node identifier (non-zero).
    #[arg(long)]
    node_id: u32,

    /// Address the mesh TCP server binds to.
    #[arg(long, default_value = "0.0.0.0:5555")]
    listen: SocketAddr,

    /// Peers to connect to as a station; repeatable.
    #[arg(long)]
    peer: Vec<SocketAddr>,

    /// Declare this node the mesh root.
    #[arg(long)]
    root: bool,

    /// Greet the mesh with a broadcast whenever a neighbor is promoted.
    #[arg(long)]
    greet: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut mesh: Mesh<TcpTransport> =
        Mesh::new(args.node_id, MeshConfig::default(), Box::new(SystemClock::new()));
    if args.root {
        mesh.set_root(true);
        mesh.set_contains_root(true);
    }

    mesh.on_receive(Box::new(|mesh, from, msg| {
        println!("[{}] {from}: {msg}", mesh.node_id());
    }));
    mesh.on_new_connection(Box::new(move |mesh, node_id| {
        log::info!("neighbor {node_id} joined, mesh is now {:?}", mesh.node_list(true));
    }));
    mesh.on_dropped_connection(Box::new(|mesh, node_id| {
        log::info!("neighbor {node_id} left, mesh is now {:?}", mesh.node_list(true));
    }));
    if args.greet {
        let greeting_from = args.node_id;
        mesh.on_new_connection(Box::new(move |mesh, _node_id| {
            mesh.send_broadcast(&format!("hello from {greeting_from}"), false);
        }));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutting down");
            cancel.cancel();
        });
    }

    let local = tokio::task::LocalSet::new();
    local.run_until(run_node(mesh, args.listen, args.peer, cancel)).await
}
