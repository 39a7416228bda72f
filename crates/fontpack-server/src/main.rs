//! Fontpack entry point.

use std::path::PathBuf;

use tracing::{error, info};

use fontpack_server::{FontpackConfig, FontpackServer, ServerResult};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Listen port, overriding file and environment.
    port: Option<u16>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            port: None,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    parsed.config = args.next().map(PathBuf::from);
                }
                "--port" | "-p" => match args.next().map(|p| p.parse::<u16>()) {
                    Some(Ok(port)) => parsed.port = Some(port),
                    _ => {
                        eprintln!("--port expects a number between 0 and 65535");
                        std::process::exit(1);
                    }
                },
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("fontpack {}", fontpack_server::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}

fn print_help() {
    println!(
        r"fontpack - download web-font stylesheets as self-contained zip files

USAGE:
    fontpack [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -p, --port <PORT>      Listening port (default: 3000)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    FONTPACK_PORT, PORT        Listening port
    FONTPACK_LISTEN_ADDR       Bind address (default: 0.0.0.0)
    FONTPACK_HOME_URL          Redirect target for /
    FONTPACK_REQUEST_TIMEOUT   Per-request deadline in seconds (default: 120)
    FONTPACK_UPSTREAM_URL      Stylesheet API (default: https://fonts.googleapis.com)
    FONTPACK_UPSTREAM_TIMEOUT  Outbound request timeout in seconds (default: 30)
    FONTPACK_CONCURRENCY       Assets fetched at once per request (default: 8)
    FONTPACK_LOG_LEVEL         Log filter, e.g. info or fontpack_core=debug
    FONTPACK_JSON_LOGS         true for JSON lines, false for pretty output

REQUESTS:
    GET /[ttf|woff|woff2|eot|detect]/css?family=<Family>[:<variants>]
"
    );
}

fn load_config(args: &Args) -> ServerResult<FontpackConfig> {
    let config = match &args.config {
        Some(path) => FontpackConfig::from_file(path)?,
        None => FontpackConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(port) = args.port {
        config.server.listen_port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = fontpack_telemetry::init_telemetry(&config.telemetry_config()) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }
    info!("Starting fontpack v{}", fontpack_server::VERSION);

    let server = match FontpackServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}
