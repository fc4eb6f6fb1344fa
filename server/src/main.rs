use clap::Parser;
use server::network::Server;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, initializes logging and runs the server
/// until it is interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "12345")]
        port: u16,
        /// Broadcast rate (snapshots per second)
        #[clap(short, long, default_value = "30",
               value_parser = clap::value_parser!(u32).range(1..=240))]
        tick_rate: u32,
        /// Side length of the square grid in cells
        #[clap(short, long, default_value = "15",
               value_parser = clap::value_parser!(i32).range(3..=101))]
        grid_size: i32,
    }

    env_logger::init();
    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate));

    let server = Server::new(&address, tick_duration, args.grid_size).await?;
    server.run().await
}
