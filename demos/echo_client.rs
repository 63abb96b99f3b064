use futures::StreamExt;
use log::*;
use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use tokio::select;
use tokio::time::{interval, Duration};
use wavesock::{connect_with, ClientConfig, DeliveryMode};

async fn handle_connection(addr: &str) {
    let mut config = ClientConfig::default();
    config.web_socket_config.delivery_mode = DeliveryMode::AsyncIterator;

    let connection = match connect_with(addr, config, Default::default()).await {
        Ok(connection) => connection,
        Err(err) => {
            error!("Error when performing handshake: {}", err);
            return;
        }
    };

    let mut incoming = connection.incoming().expect("async-pull delivery requested");
    let mut ticker = interval(Duration::from_secs(5));
    let mut counter = 0;

    loop {
        select! {
            Some(result) = incoming.next() => {
                match result {
                    Ok(message) => {
                        info!("Received message: {}", message.as_text().unwrap_or_default());
                        counter += 1;
                        // close the connection once 3 messages have gone round trip
                        if counter >= 3 {
                            if connection.close_default().await.is_err() {
                                error!("Error occurred when closing connection");
                            }
                            break;
                        }
                    }
                    Err(err) => {
                        error!("Received error from the stream: {}", err);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let random_string = generate_random_string();
                if !connection.send(random_string).await {
                    error!("Failed to send message");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    handle_connection("ws://127.0.0.1:9002").await;
}

fn generate_random_string() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(30)
        .map(char::from)
        .collect()
}
