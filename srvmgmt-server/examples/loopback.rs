//! A tiny host with one main-thread method, served over an in-memory pipe.
//!
//! The "game" runs its simulation loop on its own thread and drains the hand-off queue once per
//! tick, the way a real server would.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use srvmgmt_core::{HostApi, MainThreadHandle};
use srvmgmt_jsonrpc::Peer;
use srvmgmt_server::{MethodId, Registry, Server, ServerConfig};
use tokio::io::duplex;
use tokio_util::codec::{Framed, LinesCodec};

struct Game {
    main_thread: MainThreadHandle,
    ticks: Arc<AtomicU64>,
}

impl HostApi for Game {
    fn main_thread(&self) -> &MainThreadHandle {
        &self.main_thread
    }
}

#[tokio::main]
async fn main() {
    let (main_thread, mut queue) = srvmgmt_core::main_thread();
    let ticks = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(true));

    let simulation = std::thread::spawn({
        let ticks = ticks.clone();
        let running = running.clone();
        move || {
            while running.load(Ordering::Relaxed) {
                ticks.fetch_add(1, Ordering::Relaxed);
                queue.run_pending();
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    });

    let mut builder = Registry::<Game>::builder().with_info("Loopback example", "1.0.0");
    builder
        .method(MethodId::game("ticks").unwrap(), "Number of simulation ticks so far")
        .on_main_thread()
        .handler("ticks", |game: &Game, _client| Ok(game.ticks.load(Ordering::Relaxed)))
        .unwrap();
    builder
        .method(MethodId::game("echo").unwrap(), "Return the param unchanged")
        .handler_with_params("value", "value", |_game: &Game, value: JsonValue, _client| Ok(value))
        .unwrap();

    let server = Server::new(
        builder.build().unwrap(),
        Arc::new(Game { main_thread, ticks }),
        ServerConfig::default(),
    );

    let (client, server_side) = duplex(1024);
    server.serve_connection(Framed::new(server_side, LinesCodec::new_with_max_length(1024 * 1024)));
    let mut client = Peer::new(Framed::new(client, LinesCodec::new_with_max_length(1024 * 1024)));

    for (id, method) in [(1, "echo"), (2, "ticks"), (3, "rpc.discover")] {
        let params = if method == "echo" { json!(["Hello, world!"]) } else { json!([]) };
        client
            .send_text(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string())
            .await
            .unwrap();

        let reply = client.receive_text().await.unwrap().unwrap();
        println!("{method} → {reply}");
    }

    server.stop();
    running.store(false, Ordering::Relaxed);
    simulation.join().unwrap();
}
