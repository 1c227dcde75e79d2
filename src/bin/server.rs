// ABOUTME: Server binary: CLI parsing, log setup, console loop, exit codes

use argh::FromArgs;
use courier::{Attr, LineScreen, Screen, Server, ServerConfig};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Courier chat and file relay server
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the address to listen on (default: 0.0.0.0)
    #[argh(option)]
    host: Option<String>,

    /// the data port carrying chat broadcasts (default: 50150)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// the command port (default: 50151)
    #[argh(option)]
    cport: Option<u16>,

    /// directory for staged file transfers (default: downloads)
    #[argh(option)]
    downloads: Option<PathBuf>,

    /// poem served as flavour text (default: resources/the_raven.txt)
    #[argh(option)]
    poem: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli_args: CliArgs = argh::from_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if cli_args.debugging {
            Level::DEBUG
        } else {
            Level::WARN
        })
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = ServerConfig::default();
    if let Some(host) = cli_args.host {
        config.host = host;
    }
    if let Some(port) = cli_args.port {
        config.port = port;
    }
    if let Some(cport) = cli_args.cport {
        config.cport = cport;
    }
    if let Some(downloads) = cli_args.downloads {
        config.downloads = downloads;
    }
    if let Some(poem) = cli_args.poem {
        config.poem = Some(poem);
    }

    let screen = LineScreen::start();
    screen.set_prompt(&courier::announce(courier::SERVER_NAME, ""));

    let server = Server::new(config, screen.clone());
    if let Err(e) = server.start().await {
        screen.add(&e.to_string(), Attr::ALERT);
        std::process::exit(e.exit_code());
    }

    // the console owns the rest of the main task
    while let Some(line) = screen.next_input().await {
        server.handle_console_line(&line).await;
        if server.is_shutting_down() {
            break;
        }
    }
    if !server.is_shutting_down() {
        server.shutdown().await;
    }
}
