use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

// 用法: cargo run --example reload_client [ws://127.0.0.1:35729/livereload]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:35729/livereload".to_string());

    println!("connecting to {}", url);
    let (ws_stream, _) = connect_async(url).await?;
    let (_write, mut read) = ws_stream.split();
    println!("connected, waiting for reload notifications");

    let mut reloads = 0usize;
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) if text == "reload" => {
                reloads += 1;
                println!("reload #{} at {}", reloads, chrono::Local::now().format("%H:%M:%S%.3f"));
            }
            Ok(Message::Text(text)) => println!("unexpected message: {}", text),
            Ok(Message::Close(_)) => {
                println!("server closed the connection");
                break;
            }
            Err(e) => {
                println!("receive failed: {}", e);
                break;
            }
            _ => {}
        }
    }

    println!("received {} reloads", reloads);
    Ok(())
}
