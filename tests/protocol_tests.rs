// Integration tests for the live session client
//
// These tests run a loopback WebSocket server on an ephemeral port and
// check the wire behavior: the setup frame goes out first, parsed events
// reach the session channel, malformed frames are skipped, and a peer
// close is reported with its code and reason.

use anyhow::Result;
use fala_live::{ClientEvent, LiveClient, OutboundAudio, SessionSetup};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_setup_is_the_first_frame_on_the_wire() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let second = ws.next().await.unwrap().unwrap();
        (first, second)
    });

    let setup = SessionSetup::new("Kore", "persona de teste");
    let (client, _events) = LiveClient::connect(&format!("ws://{}", addr), &setup).await?;
    client.send_audio(&OutboundAudio::pcm16("AAAA".to_string(), 16000));

    let (first, second) = server.await?;

    let setup_json: serde_json::Value = serde_json::from_str(first.to_text()?)?;
    assert_eq!(setup_json["voice"], "Kore");
    assert_eq!(setup_json["systemInstruction"], "persona de teste");
    assert_eq!(setup_json["audioModalities"][0], "AUDIO");
    assert_eq!(setup_json["transcriptionEnabled"]["input"], true);

    let audio_json: serde_json::Value = serde_json::from_str(second.to_text()?)?;
    assert_eq!(audio_json["media"]["mimeType"], "audio/pcm;rate=16000");
    assert_eq!(audio_json["media"]["data"], "AAAA");

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_events_flow_and_peer_close_is_reported() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Swallow the setup frame
        let _ = ws.next().await;

        ws.send(Message::Text(r#"{"turnComplete":true}"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text("definitely not json".to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(
            r#"{"outputTranscriptionDelta":"oi"}"#.to_string(),
        ))
        .await
        .unwrap();

        ws.send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        })))
        .await
        .unwrap();
    });

    let setup = SessionSetup::new("Kore", "persona");
    let (client, mut events) = LiveClient::connect(&format!("ws://{}", addr), &setup).await?;

    match events.recv().await.expect("first event") {
        ClientEvent::Event(event) => assert!(event.turn_complete),
        other => panic!("expected a parsed event, got {:?}", other),
    }

    // The unparseable frame was skipped, not fatal
    match events.recv().await.expect("second event") {
        ClientEvent::Event(event) => {
            assert_eq!(event.output_transcription_delta.as_deref(), Some("oi"))
        }
        other => panic!("expected a parsed event, got {:?}", other),
    }

    match events.recv().await.expect("close notification") {
        ClientEvent::Closed { code, reason } => {
            assert_eq!(code, Some(1000));
            assert_eq!(reason, "done");
        }
        other => panic!("expected close, got {:?}", other),
    }

    server.await?;
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn test_close_returns_while_the_event_channel_is_backlogged() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        // Swallow the setup frame
        let _ = ws.next().await;

        // Far more events than the client buffers
        for _ in 0..80 {
            ws.send(Message::Text(r#"{"turnComplete":true}"#.to_string()))
                .await
                .unwrap();
        }

        // Hold the socket so nothing unblocks the pump from the wire side
        sleep(Duration::from_secs(5)).await;
    });

    let setup = SessionSetup::new("Kore", "persona");
    let (client, events) = LiveClient::connect(&format!("ws://{}", addr), &setup).await?;

    // Give the connection task time to fill the event channel
    sleep(Duration::from_millis(300)).await;

    // The receiver is alive but nobody drains it; close must still return
    timeout(Duration::from_secs(3), client.close()).await?;

    drop(events);
    server.abort();
    Ok(())
}

#[tokio::test]
async fn test_connect_rejects_an_invalid_url() {
    let setup = SessionSetup::new("Kore", "persona");
    let result = LiveClient::connect("not a url", &setup).await;

    assert!(result.is_err());
}
