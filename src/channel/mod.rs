//! # Loopback message channel.
//!
//! Each side of a host/child pair owns a [`ChannelServer`] (inbound) and a
//! [`ChannelClient`] pointed at the partner's server (outbound).
//!
//! ```text
//!  host                                     child
//! ┌──────────────────────┐   POST *[tag]*   ┌──────────────────────┐
//! │ ChannelClient ───────┼─────────────────►│ ChannelServer        │
//! │                      │◄── "received" ───┤   └─► Dispatch::post │
//! │ ChannelServer        │◄─────────────────┼─ ChannelClient       │
//! └──────────────────────┘                  └──────────────────────┘
//! ```
//!
//! - [`codec`] frames and parses envelopes.
//! - [`ChannelServer`] accepts, acknowledges and dispatches.
//! - [`ChannelClient`] performs one round trip per send.

pub mod codec;

mod client;
mod pair;
mod server;

pub use client::ChannelClient;
pub use codec::{Envelope, EventType};
pub use pair::ChannelPair;
pub(crate) use server::ListenerSlot;
pub use server::{ChannelServer, Handler};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct SceneData {
        episode: u32,
        name: String,
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn round_trip_dispatches_exactly_once() {
        let server = ChannelServer::bind(0).await.unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        server.on_message(move |env| s.lock().push(env.clone()));

        let client = ChannelClient::new(server.port()).unwrap();
        let payload = b"\x00binary *[not a tag]* payload".to_vec();
        let ack = client
            .send(payload.clone(), &EventType::TRAINING_DATA)
            .await
            .unwrap();
        assert_eq!(ack, "received");

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].event_type, EventType::TRAINING_DATA);
        assert_eq!(&seen[0].payload[..], &payload[..]);
    }

    #[tokio::test]
    async fn panicking_global_handler_still_acks_and_reaches_exit_listener() {
        let server = ChannelServer::bind(0).await.unwrap();
        server.on_message(|_| panic!("global handler failed"));
        let exits = Arc::new(AtomicUsize::new(0));
        let e = exits.clone();
        let _listener = crate::cooperative::listen(&server, move || {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let client = ChannelClient::new(server.port()).unwrap();
        let ack = crate::cooperative::signal_exit(&client).await.unwrap();
        assert_eq!(ack, "received");
        assert_eq!(exits.load(Ordering::SeqCst), 1);

        // The connection survived; the server keeps receiving.
        assert_eq!(crate::cooperative::signal_exit(&client).await.unwrap(), "received");
        assert_eq!(exits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn per_event_listener_last_write_wins() {
        let server = ChannelServer::bind(0).await.unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        server.add_listener(EventType::RESET_SCENE, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        server.add_listener(EventType::RESET_SCENE, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        let client = ChannelClient::new(server.port()).unwrap();
        client.send("", &EventType::RESET_SCENE).await.unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        server.remove_listener(&EventType::RESET_SCENE);
        assert!(!server.has_listener(&EventType::RESET_SCENE));
        client.send("", &EventType::RESET_SCENE).await.unwrap();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn global_handler_runs_alongside_per_event_handler() {
        let server = ChannelServer::bind(0).await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        server.on_message(move |_| o.lock().push("global"));
        let o = order.clone();
        server.add_listener(EventType::SCENE_START, move |_| o.lock().push("scene_start"));

        let client = ChannelClient::new(server.port()).unwrap();
        client.send("go", &EventType::SCENE_START).await.unwrap();
        client.send("other", &EventType::NONE).await.unwrap();

        assert_eq!(*order.lock(), vec!["global", "scene_start", "global"]);
    }

    #[tokio::test]
    async fn typed_subscription_drops_and_counts_mismatches() {
        let server = ChannelServer::bind(0).await.unwrap();
        let got = Arc::new(Mutex::new(Vec::new()));
        let raw = Arc::new(AtomicUsize::new(0));

        let g = got.clone();
        server.on::<SceneData, _>(move |data| g.lock().push(data));
        let r = raw.clone();
        server.on_message(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        });

        let client = ChannelClient::new(server.port()).unwrap();
        let data = SceneData {
            episode: 3,
            name: "arena".into(),
        };
        client.send_json(&data, &EventType::SCENE_DATA).await.unwrap();
        client
            .send(r#"{"episode":4}"#, &EventType::SCENE_DATA)
            .await
            .unwrap();
        client
            .send(r#"{"episode":5,"name":"x","extra":true}"#, &EventType::SCENE_DATA)
            .await
            .unwrap();

        assert_eq!(*got.lock(), vec![data]);
        assert_eq!(server.dropped_payloads(), 2);
        assert_eq!(raw.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_body_is_answered_with_404() {
        let server = ChannelServer::bind(0).await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        server.on_message(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let resp = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap()
            .post(server.address())
            .body("no marker here")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_ack_body_is_returned() {
        let server = ChannelServer::bind_with(0, Arc::new(crate::dispatch::Inline), "ok")
            .await
            .unwrap();
        let client = ChannelClient::new(server.port()).unwrap();
        assert_eq!(client.send("x", &EventType::NONE).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn send_to_unreachable_partner_is_a_transport_error() {
        let port = {
            let server = ChannelServer::bind(0).await.unwrap();
            let port = server.port();
            server.dispose();
            port
        };
        settle().await;

        let client = ChannelClient::with_timeout(port, Some(Duration::from_secs(2))).unwrap();
        let err = client.send("x", &EventType::NONE).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let server = ChannelServer::bind(0).await.unwrap();
        server.dispose();
        server.dispose();

        let client = ChannelClient::new(server.port()).unwrap();
        client.dispose();
        client.dispose();
        assert!(client.is_disposed());
        assert!(matches!(
            client.send("x", &EventType::NONE).await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn pair_talks_to_partner_pair() {
        let cfg = crate::Config::default();
        let host_server = ChannelServer::bind(0).await.unwrap();
        let child = ChannelPair::bind(
            0,
            host_server.port(),
            Arc::new(crate::dispatch::Inline),
            &cfg,
        )
        .await
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Mutex::new(Some(tx));
        host_server.on_message(move |env| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(env.payload_str().into_owned());
            }
        });

        child.client.send("hello", &EventType::NONE).await.unwrap();
        assert_eq!(rx.await.unwrap(), "hello");
        assert_eq!(child.client.partner_port(), host_server.port());
        child.dispose();
        child.dispose();
    }
}
