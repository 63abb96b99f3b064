use log::*;
use rand::distr::Alphanumeric;
use rand::{thread_rng, Rng};
use wavesock::connect;

async fn handle_connection(addr: &str) {
    match connect(addr).await {
        Ok(connection) => {
            let my_random_string = generate_random_string();
            info!("Sending random string: {}", my_random_string);
            if !connection.send_fragmented(my_random_string, 16).await {
                error!("Error occurred when sending data in chunks");
            }

            connection.close_default().await.unwrap();
        }
        Err(err) => error!("Error when performing handshake: {}", err),
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
        .take(300)
        .map(char::from)
        .collect()
}
