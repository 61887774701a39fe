use rmq_facade_demo::run_cli;
use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        error!("Demo error: {}", e);
        eprintln!("{}", e);
        std::process::exit(e.exit_code());
    }
}
