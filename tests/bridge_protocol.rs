mod support;

use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use mpv_engine::bridge::{Bridge, Outgoing};
use mpv_engine::ExitTrigger;
use support::{engine_with, fast_config, FakeOptions};

fn drain(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(serde_json::to_value(message).unwrap());
    }
    out
}

#[tokio::test]
async fn commands_are_answered_in_order() {
    let (launcher, engine) = engine_with(FakeOptions::default(), fast_config());
    assert!(engine.initialize().await);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (_exit_tx, exit_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new(engine.clone(), out_tx);

    let input = concat!(
        r#"{"type":"set_queue","current":"a.flac","next":"b.flac"}"#, "\n",
        "\n",
        r#"{"type":"launch_rockets"}"#, "\n",
        r#"{"type":"get_stream_metadata"}"#, "\n",
        r#"{"type":"is_running"}"#, "\n",
        r#"{"type":"exit"}"#, "\n",
        r#"{"type":"stop"}"#, "\n",
    );
    let trigger = bridge.run(BufReader::new(input.as_bytes()), exit_rx).await;
    assert_eq!(trigger, ExitTrigger::Quit);

    let replies = drain(&mut out_rx);
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0], json!({"type": "reply", "command": "set_queue", "ok": true}));
    assert_eq!(replies[1]["command"], "get_stream_metadata");
    assert_eq!(
        replies[1]["data"],
        json!({"artist": "Stereolab", "title": "French Disko"})
    );
    assert_eq!(replies[2]["data"], json!(true));
    // Nothing after `exit` is processed
    assert!(!launcher.mutations().contains(&vec![json!("stop")]));
    assert_eq!(engine.queue().current(), Some("a.flac"));

    engine.shutdown(trigger).await;
}

#[tokio::test]
async fn failures_are_replied_not_dropped() {
    let (_launcher, engine) = engine_with(FakeOptions::default(), fast_config());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (_exit_tx, exit_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new(engine.clone(), out_tx);

    let input = concat!(r#"{"type":"next"}"#, "\n");
    let trigger = bridge.run(BufReader::new(input.as_bytes()), exit_rx).await;
    assert_eq!(trigger, ExitTrigger::Exit);

    let replies = drain(&mut out_rx);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["ok"], false);
    assert!(replies[0]["error"].as_str().unwrap().contains("code 8"));
}

#[tokio::test]
async fn exit_trigger_ends_the_read_loop() {
    let (_launcher, engine) = engine_with(FakeOptions::default(), fast_config());

    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new(engine, out_tx);

    // Keep the input open so only the trigger can end the loop
    let (input, _held_open) = tokio::io::duplex(64);
    exit_tx.send(ExitTrigger::Interrupt).unwrap();

    let trigger = bridge.run(BufReader::new(input), exit_rx).await;
    assert_eq!(trigger, ExitTrigger::Interrupt);
}

#[tokio::test]
async fn events_are_written_as_json_lines() {
    let (_launcher, engine) = engine_with(FakeOptions::default(), fast_config());
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let _forwarder = Bridge::forward_events(engine.subscribe(), out_tx.clone());

    let (writer, reader) = tokio::io::duplex(4096);
    let writer_task = tokio::spawn(Bridge::write_outgoing(out_rx, writer));

    assert!(engine.initialize().await);
    engine.shutdown(ExitTrigger::Exit).await;
    drop(engine);
    drop(out_tx);

    let mut lines = BufReader::new(reader).lines();
    let first = lines.next_line().await.unwrap().unwrap();
    let event: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(event, json!({"type": "fallback", "is_error": false}));

    writer_task.abort();
}

#[tokio::test]
async fn writer_flushes_queued_output_before_returning() {
    let (_launcher, engine) = engine_with(FakeOptions::default(), fast_config());
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let forwarder = Bridge::forward_events(engine.subscribe(), out_tx.clone());
    let (_exit_tx, exit_rx) = mpsc::unbounded_channel();
    let bridge = Bridge::new(engine.clone(), out_tx);

    // Replies are queued before the writer ever runs
    let input = concat!(
        r#"{"type":"is_running"}"#, "\n",
        r#"{"type":"set_radio","active":true}"#, "\n",
        r#"{"type":"get_cached_metadata"}"#, "\n",
    );
    bridge.run(BufReader::new(input.as_bytes()), exit_rx).await;

    let (writer, reader) = tokio::io::duplex(4096);
    let writer_task = tokio::spawn(Bridge::write_outgoing(out_rx, writer));
    forwarder.abort();
    let _ = forwarder.await;
    drop(bridge);

    tokio::time::timeout(Duration::from_secs(1), writer_task)
        .await
        .expect("writer did not return once the senders were gone")
        .unwrap();

    let mut lines = BufReader::new(reader).lines();
    let mut commands = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        let reply: Value = serde_json::from_str(&line).unwrap();
        commands.push(reply["command"].clone());
    }
    assert_eq!(
        commands,
        vec![json!("is_running"), json!("set_radio"), json!("get_cached_metadata")]
    );
}
