use log::error;

#[tokio::main]
async fn main() {
    if let Err(e) = neovolt_bridge::app().await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(255);
    }
}
