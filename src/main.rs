use clap::Parser;
use tillguard_lib::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = tillguard_lib::run(cli).await {
        eprintln!("tillguard: {}", e);
        std::process::exit(1);
    }
}
