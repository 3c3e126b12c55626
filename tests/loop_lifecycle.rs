//! Housekeeping cadence and shutdown latency of the network loops.

mod common;

use common::{loopback_config, start_gateway, Client};
use oicbridge::coap::{Code, MessageType};
use oicbridge::gateway::GatewayState;
use std::time::{Duration, Instant};

#[tokio::test]
async fn check_packets_runs_about_once_per_second() {
    let (mut gw, _rec) = start_gateway(&loopback_config());
    let mut client = Client::new().await;

    // steady traffic must not speed up housekeeping
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(2500) {
        let ping = client.request(MessageType::NonConfirmable, Code::GET, "/oic/d");
        client.send(&ping, gw.unicast_addr()).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let runs = gw.stats().check_runs;
    assert!((1..=3).contains(&runs), "check_packets ran {} times", runs);

    gw.shutdown().await;
}

#[tokio::test]
async fn shutdown_joins_both_loops_promptly() {
    let (mut gw, _rec) = start_gateway(&loopback_config());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(1), gw.shutdown())
        .await
        .expect("shutdown within a second");
    // both loops notice the flag within one discovery poll (200 ms)
    assert!(started.elapsed() < Duration::from_millis(250), "shutdown took {:?}", started.elapsed());
    assert_eq!(gw.state(), GatewayState::Stopped);
}

#[tokio::test]
async fn stopped_gateway_stops_answering() {
    let (mut gw, _rec) = start_gateway(&loopback_config());
    let addr = gw.unicast_addr();
    gw.shutdown().await;

    let mut client = Client::new().await;
    let req = client.request(MessageType::Confirmable, Code::GET, "/oic/d");
    client.send(&req, addr).await;
    assert!(client.recv(Duration::from_millis(300)).await.is_none());
}
