//! Stream lifecycle integration tests.
//!
//! Exercises the full pipeline against a mock provider:
//! - Connection establishment with the token query parameter
//! - Subscription and unsubscription frames
//! - End-to-end quote delivery with exact decimal prices
//! - Malformed frame tolerance
//! - Credential rotation after an in-band rate-limit frame
//! - Non-text frames counting toward connection liveness

mod integration;
use integration::common::mock_ws::MockQuoteServer;

use rust_decimal_macros::dec;
use std::time::Duration;
use tickstream_client::{AppConfig, StreamClient};
use tickstream_core::Symbol;
use tokio::time::timeout;

fn test_config(url: String, keys: Vec<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.stream.url = url;
    // Keep reconnect cycles short so rotation tests finish quickly.
    config.stream.reconnect_base_delay_ms = 50;
    config.stream.reconnect_max_delay_ms = 200;
    config.keys.api_keys = keys.into_iter().map(String::from).collect();
    config.keys.cooldown_base_ms = 60_000;
    config
}

async fn wait_for_message(server: &MockQuoteServer, needle: &str) -> bool {
    timeout(Duration::from_secs(5), async {
        loop {
            if server
                .received_messages()
                .await
                .iter()
                .any(|m| m.contains(needle))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_client_connects_with_token_and_subscribes() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let _handle = client.subscribe(Symbol::new("AAPL"));

    assert!(
        wait_for_message(&server, r#"{"type":"subscribe","symbol":"AAPL"}"#).await,
        "Subscribe frame should reach the server"
    );
    assert_eq!(server.tokens(), vec!["key-one"]);
    assert_eq!(server.connection_count().await, 1);

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_quote_delivery_end_to_end() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let mut handle = client.subscribe(Symbol::new("AAPL"));
    assert!(wait_for_message(&server, r#""symbol":"AAPL""#).await);

    server.send_frame(r#"{"type":"trade","data":[{"s":"AAPL","p":150.73,"t":1690000000000,"v":25}]}"#);

    let quote = timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("Quote should arrive within timeout")
        .expect("Subscription should stay open");

    assert_eq!(quote.symbol.as_str(), "AAPL");
    // Exact decimal, no float rounding.
    assert_eq!(quote.price.inner(), dec!(150.73));
    assert_eq!(quote.volume, Some(dec!(25)));
    assert_eq!(client.last_quote(&Symbol::new("AAPL")).unwrap().price, quote.price);

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_does_not_break_session() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let mut handle = client.subscribe(Symbol::new("MSFT"));
    assert!(wait_for_message(&server, r#""symbol":"MSFT""#).await);

    server.send_frame("this is not json");
    server.send_frame(r#"{"type":"trade","data":[{"s":"MSFT"}]}"#);
    server.send_frame(r#"{"type":"trade","data":[{"s":"MSFT","p":330.10,"t":1690000000000}]}"#);

    // The valid frame after two malformed ones still arrives on the same
    // session.
    let quote = timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("Quote should arrive within timeout")
        .expect("Subscription should stay open");
    assert_eq!(quote.price.inner(), dec!(330.10));
    assert_eq!(server.connection_count().await, 1);

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_rate_limit_frame_rotates_credential() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one", "key-two"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let _handle = client.subscribe(Symbol::new("AAPL"));
    assert!(wait_for_message(&server, r#""symbol":"AAPL""#).await);

    server.send_frame(r#"{"type":"error","msg":"API limit reached"}"#);

    // The session tears down, the first key cools, and the reconnect uses
    // the second key.
    let rotated = timeout(Duration::from_secs(5), async {
        loop {
            if server.connection_count().await >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(rotated.is_ok(), "Should reconnect with another credential");
    assert_eq!(server.tokens(), vec!["key-one", "key-two"]);

    // The first key is cooling; the second stays Available while leased.
    let (available, cooling, exhausted) = client.credential_counts();
    assert_eq!(available, 1);
    assert_eq!(cooling, 1);
    assert_eq!(exhausted, 0);

    // The new session replays the subscription without any consumer action.
    let subscribes = server
        .received_messages()
        .await
        .iter()
        .filter(|m| m.contains(r#""type":"subscribe""#))
        .count();
    assert!(subscribes >= 2, "Subscription should be replayed");

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_reconnect_and_replay() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let _handle = client.subscribe(Symbol::new("TSLA"));
    assert!(wait_for_message(&server, r#""symbol":"TSLA""#).await);

    server.close_all();

    let reconnected = timeout(Duration::from_secs(5), async {
        loop {
            if server.connection_count().await >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(reconnected.is_ok(), "Should reconnect after server close");

    // Same key is reused; the session ended without a credential fault.
    assert_eq!(server.tokens(), vec!["key-one", "key-one"]);

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_binary_frames_keep_session_alive() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let mut config = test_config(server.url(), vec!["key-one"]);
    config.stream.staleness_timeout_ms = 800;
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let mut handle = client.subscribe(Symbol::new("AAPL"));
    assert!(wait_for_message(&server, r#""symbol":"AAPL""#).await);

    // Binary-only traffic for well past the staleness timeout. Each frame
    // must reset the silence clock even though no text arrives.
    for _ in 0..12 {
        server.send_binary(vec![0x01, 0x02, 0x03]);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(
        server.connection_count().await,
        1,
        "Binary traffic should count as liveness, not staleness"
    );
    // An actively sending connection is never half-stale, so the client has
    // no reason to probe it.
    assert_eq!(
        server.ping_count().await,
        0,
        "Binary traffic should suppress staleness probes"
    );

    // The session is still functional.
    server.send_frame(r#"{"type":"trade","data":[{"s":"AAPL","p":151.00,"t":1690000000000}]}"#);
    let quote = timeout(Duration::from_secs(5), handle.recv())
        .await
        .expect("Quote should arrive within timeout")
        .expect("Subscription should stay open");
    assert_eq!(quote.price.inner(), dec!(151.00));

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_dropping_handle_sends_unsubscribe() {
    tickstream_ws::init_crypto();
    let server = MockQuoteServer::start().await;

    let config = test_config(server.url(), vec!["key-one"]);
    let client = StreamClient::new(&config).unwrap();
    client.start();

    let handle = client.subscribe(Symbol::new("AAPL"));
    assert!(wait_for_message(&server, r#"{"type":"subscribe","symbol":"AAPL"}"#).await);

    drop(handle);

    assert!(
        wait_for_message(&server, r#"{"type":"unsubscribe","symbol":"AAPL"}"#).await,
        "Unsubscribe frame should reach the server after the last handle drops"
    );

    client.shutdown(Duration::from_secs(2)).await;
    server.shutdown().await;
}
