// ABOUTME: Client binary: CLI parsing, log setup, session loop, exit codes

use argh::FromArgs;
use courier::{Attr, Client, ClientConfig, LineScreen, Screen};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Courier chat and file transfer client
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// the hostname or IP address of the server (default: localhost)
    #[argh(option)]
    host: Option<String>,

    /// the data port of the server (default: 50150)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// the command port of the server (default: 50151)
    #[argh(option)]
    cport: Option<u16>,
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

    let mut config = ClientConfig::default();
    if let Some(host) = cli_args.host {
        config.host = host;
    }
    if let Some(port) = cli_args.port {
        config.port = port;
    }
    if let Some(cport) = cli_args.cport {
        config.cport = cport;
    }

    let screen = LineScreen::start();
    let client = Client::new(config, screen.clone());
    if let Err(e) = client.run().await {
        screen.add(&e.to_string(), Attr::ALERT);
        screen.quit();
        std::process::exit(e.exit_code());
    }
    screen.quit();
}
