use std::time::Duration;

use anyhow::{anyhow, Result};
use buzzer::{BuzzerClient, ClientConfig, CloseReason, Endpoint, PushEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

const STEP: Duration = Duration::from_secs(2);

const BUZZ: &str = r#"buzz {"id":5,"poster":{"username":"bob"},"text":"loving #rust","posted":"2024-05-01T10:00:00+00:00","mentions":null,"tags":["rust"]}"#;

#[tokio::test]
async fn websocket_session_round_trip() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = Endpoint::WebSocket(format!("ws://{}/ws", listener.local_addr()?));

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut socket = tokio_tungstenite::accept_async(stream).await?;

        assert_eq!(next_text(&mut socket).await?, "login alice secret");
        socket.send(Message::Text("OK".into())).await?;

        assert_eq!(next_text(&mut socket).await?, "topic rust");
        socket.send(Message::Binary(vec![0xde, 0xad].into())).await?;
        socket.send(Message::Text(BUZZ.into())).await?;
        socket.close(None).await?;
        anyhow::Ok(())
    });

    let client = BuzzerClient::connect(&ClientConfig::new(endpoint)).await?;
    let mut feed = client.connection().push_feed();
    let (closed_tx, closed_rx) = oneshot::channel();
    client.connection().on_close(move |reason: &CloseReason| {
        let _ = closed_tx.send(reason.clone());
    });

    client.login("alice", "secret").await?;
    client.topic("rust")?;

    let Some(PushEvent::Buzz(buzz)) = timeout(STEP, feed.recv()).await? else {
        return Err(anyhow!("expected a buzz push"));
    };
    assert_eq!(buzz.id, 5);
    assert_eq!(buzz.poster.username, "bob");
    assert_eq!(buzz.tags, vec!["rust".to_string()]);
    assert!(buzz.mentions.is_empty());

    assert_eq!(timeout(STEP, feed.recv()).await?, None);
    assert_eq!(timeout(STEP, closed_rx).await??, CloseReason::Remote);
    timeout(STEP, server).await???;
    Ok(())
}

#[tokio::test]
async fn connect_failure_names_the_endpoint() -> Result<()> {
    // Bind then drop to find a port nobody is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let endpoint = Endpoint::WebSocket(format!("ws://{addr}/ws"));
    let err = BuzzerClient::connect(&ClientConfig::new(endpoint))
        .await
        .expect_err("nothing is listening");
    assert!(err.to_string().contains(&addr.to_string()), "{err}");
    Ok(())
}

async fn next_text(socket: &mut WebSocketStream<TcpStream>) -> Result<String> {
    loop {
        match timeout(STEP, socket.next()).await? {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(_)) => continue,
            Some(Err(error)) => return Err(error.into()),
            None => return Err(anyhow!("client hung up")),
        }
    }
}
