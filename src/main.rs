#[tokio::main]
async fn main() {
    if let Err(error) = sleepwake_alarms::run().await {
        eprintln!("sleepwake-alarms: {error}");
        std::process::exit(1);
    }
}
