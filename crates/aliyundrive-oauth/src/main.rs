use std::time::Duration;

use aliyundrive_oauth_core::auth::{
    parse_code_input, AuthError, AuthProxy, AuthorizationBackend, CodeExchangeSession, LoginFlow,
    PollSettings, QrCodeRequest, QrLoginSession, QrLoginState, QrSession, QrStatus, RemoteProxy,
    TokenGrant, DEFAULT_QRCODE_SIZE, DEFAULT_SCOPES,
};
use aliyundrive_oauth_core::config::{
    ClientCredentials, UpstreamEndpoints, DEFAULT_PROXY_URL, DEFAULT_UPSTREAM_URL,
};
use aliyundrive_oauth_core::server;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "aliyundrive_oauth=info,aliyundrive_oauth_core=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Aliyun Drive OAuth proxy and refresh token helper")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the authorization proxy (requires ALIYUNDRIVE_CLIENT_ID/ALIYUNDRIVE_CLIENT_SECRET)
    Serve(ServeArgs),
    /// Obtain a refresh token by QR code scan or authorization code
    Login(LoginArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,
    /// Upstream OAuth provider base URL
    #[arg(long, env = "ALIYUNDRIVE_OAUTH_UPSTREAM", default_value = DEFAULT_UPSTREAM_URL)]
    upstream: String,
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Login flow: qrcode or code (defaults to ALIYUNDRIVE_OAUTH_FLOW, then qrcode)
    #[arg(long)]
    flow: Option<LoginFlow>,
    /// Exchange this authorization code (or redirect URL) instead of scanning
    #[arg(long, conflicts_with_all = ["flow", "manual"])]
    code: Option<String>,
    /// Prompt for an authorization code instead of scanning
    #[arg(long, conflicts_with = "flow")]
    manual: bool,
    /// Requested scopes (repeatable)
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// QR code width in pixels
    #[arg(long, default_value_t = DEFAULT_QRCODE_SIZE)]
    width: u32,
    /// QR code height in pixels
    #[arg(long, default_value_t = DEFAULT_QRCODE_SIZE)]
    height: u32,
    /// Authorization proxy used when no client credentials are configured locally
    #[arg(long, env = "ALIYUNDRIVE_OAUTH_PROXY", default_value = DEFAULT_PROXY_URL)]
    proxy: String,
    /// Upstream OAuth provider base URL (QR status polling)
    #[arg(long, env = "ALIYUNDRIVE_OAUTH_UPSTREAM", default_value = DEFAULT_UPSTREAM_URL)]
    upstream: String,
    /// Seconds between QR status polls
    #[arg(long, default_value_t = 2)]
    interval: u64,
    /// Give up after this many seconds without a confirmed scan (0 waits for expiry)
    #[arg(long = "max-wait", default_value_t = 600)]
    max_wait: u64,
    /// Open the QR code image in the system browser
    #[arg(long)]
    open: bool,
    /// Output the full token response as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Login(args) => login(args).await?,
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(args: ServeArgs) -> Result<()> {
    let credentials =
        ClientCredentials::from_env().context("client credentials are required to serve")?;
    let endpoints = UpstreamEndpoints::new(&args.upstream)?;
    let proxy =
        AuthProxy::with_endpoints(credentials, endpoints).context("failed to build HTTP client")?;

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", args.host, args.port))?;

    server::serve(listener, proxy, shutdown_signal())
        .await
        .context("authorization proxy terminated")?;
    info!("authorization proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
}

async fn login(args: LoginArgs) -> Result<()> {
    let backend = build_backend(&args)?;
    info!(backend = %backend.describe(), "using authorization backend");

    let flow = if args.code.is_some() || args.manual {
        LoginFlow::Code
    } else {
        args.flow.unwrap_or_else(LoginFlow::detect)
    };

    let grant = match flow {
        LoginFlow::QrCode => qrcode_login(backend, &args).await?,
        LoginFlow::Code => code_login(backend, args.code.as_deref()).await?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&grant)?);
    } else {
        eprintln!("Refresh token obtained:");
        println!("{}", grant.refresh_token);
    }
    Ok(())
}

fn build_backend(args: &LoginArgs) -> Result<AuthorizationBackend> {
    let upstream = UpstreamEndpoints::new(&args.upstream)?;
    let backend = match ClientCredentials::from_env_optional()? {
        Some(credentials) => AuthorizationBackend::Direct(
            AuthProxy::with_endpoints(credentials, upstream)
                .context("failed to build HTTP client")?,
        ),
        None => AuthorizationBackend::Remote(
            RemoteProxy::new(UpstreamEndpoints::new(&args.proxy)?, upstream)
                .context("failed to build HTTP client")?,
        ),
    };
    Ok(backend)
}

async fn qrcode_login(backend: AuthorizationBackend, args: &LoginArgs) -> Result<TokenGrant> {
    let request = if args.scopes.is_empty() {
        QrCodeRequest::new(DEFAULT_SCOPES.iter().copied())
    } else {
        QrCodeRequest::new(args.scopes.iter().cloned())
    }
    .with_size(args.width, args.height);

    let settings = PollSettings {
        interval: Duration::from_secs(args.interval.max(1)),
        max_wait: (args.max_wait > 0).then(|| Duration::from_secs(args.max_wait)),
    };

    let cancel = CancellationToken::new();
    let mut handle = QrLoginSession::new(backend, request)
        .with_settings(settings)
        .with_cancellation(cancel.clone())
        .spawn();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    if let Some(session) = handle.qr_session().await {
        print_qrcode(&session);
        if args.open {
            if let Err(err) = open::that(&session.qr_code_url) {
                eprintln!("Failed to open the QR code in a browser ({err}).");
            }
        }
    }

    let mut states = handle.subscribe();
    let progress = tokio::spawn(async move {
        let mut last_reported: Option<String> = None;
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            if let QrLoginState::Polling {
                last_status: Some(status),
                ..
            } = &state
            {
                if last_reported.as_deref() != Some(status.as_str()) {
                    report_status(status);
                    last_reported = Some(status.as_str().to_owned());
                }
            }
            if state.is_terminal() {
                break;
            }
        }
    });

    let result = handle.join().await;
    let _ = progress.await;
    result.map_err(|err| match err {
        AuthError::QrCodeExpired => {
            anyhow::Error::new(err).context("QR code expired; run the login again")
        }
        other => anyhow::Error::new(other).context("QR code login failed"),
    })
}

async fn code_login(backend: AuthorizationBackend, code: Option<&str>) -> Result<TokenGrant> {
    let session = CodeExchangeSession::new(backend);
    let grant = match code {
        Some(code) => {
            let code = parse_code_input(code.trim())?;
            session.exchange(&code).await
        }
        None => session.run(|| async { prompt_for_code().await }).await,
    };
    grant.context("authorization code exchange failed")
}

async fn prompt_for_code() -> Result<String, AuthError> {
    task::spawn_blocking(|| {
        use std::io::{self, Write};
        eprint!("Paste the authorization code or redirect URL: ");
        io::stderr()
            .flush()
            .map_err(|err| AuthError::InvalidAuthorizationResponse(err.to_string()))?;
        let mut input = String::new();
        io::stdin()
            .read_line(&mut input)
            .map_err(|err| AuthError::InvalidAuthorizationResponse(err.to_string()))?;
        Ok(input.trim().to_owned())
    })
    .await
    .map_err(|_| AuthError::Cancelled)?
}

fn print_qrcode(session: &QrSession) {
    eprintln!(
        "\nScan this QR code with the Aliyun Drive app:\n  {}\n",
        session.qr_code_url
    );
}

fn report_status(status: &QrStatus) {
    match status {
        QrStatus::WaitLogin => eprintln!("Waiting for scan..."),
        QrStatus::ScanSuccess => eprintln!("Scanned. Confirm the login on your phone."),
        other => eprintln!("QR code status: {}", other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn login_defaults() {
        let cli = Cli::try_parse_from(["aliyundrive-oauth", "login"]).unwrap();
        match cli.command {
            Commands::Login(args) => {
                assert!(args.code.is_none());
                assert_eq!(args.width, DEFAULT_QRCODE_SIZE);
                assert_eq!(args.interval, 2);
                assert_eq!(args.max_wait, 600);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn login_flow_parses() {
        let cli = Cli::try_parse_from(["aliyundrive-oauth", "login", "--flow", "code"]).unwrap();
        match cli.command {
            Commands::Login(args) => assert_eq!(args.flow, Some(LoginFlow::Code)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn code_conflicts_with_flow() {
        let err = Cli::try_parse_from([
            "aliyundrive-oauth",
            "login",
            "--flow",
            "qrcode",
            "--code",
            "abc",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn manual_and_code_are_exclusive() {
        let err =
            Cli::try_parse_from(["aliyundrive-oauth", "login", "--manual", "--code", "abc"])
                .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn serve_reads_port() {
        let cli = Cli::try_parse_from(["aliyundrive-oauth", "serve", "--port", "9090"]).unwrap();
        match cli.command {
            Commands::Serve(args) => assert_eq!(args.port, 9090),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
