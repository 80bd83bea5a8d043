use clap::Parser;
use std::process;

use subwatch::cli::Cli;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.run().await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_user_error() {
                eprintln!("Run 'subwatch --help' for usage.");
            }
            process::exit(1);
        }
    }
}
