use std::{path::PathBuf, time::Duration};

use assertion_clock::DurationSecs;
use assertion_credential::{
    backoff::ErrorBackoffConfig, ClientAssertionCredential, CredentialOptions, GetTokenOptions,
    TokenStatus, TransportOptions,
};
use clap::Parser;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The home tenant of the service principal
    #[arg(short, long, env = "AZURE_TENANT_ID")]
    tenant_id: String,

    /// The client ID of the service principal
    #[arg(short, long, env = "AZURE_CLIENT_ID")]
    client_id: String,

    /// A file holding the client assertion, re-read for every exchange
    #[arg(short = 'f', long, env = "AZURE_FEDERATED_TOKEN_FILE", name = "FILE")]
    assertion_file: PathBuf,

    /// The scope to request a token for
    #[arg(short, long, env, default_value = "https://graph.microsoft.com/.default")]
    scope: String,

    /// Other tenants the credential may acquire tokens for, or `*` for any
    #[arg(short, long, env, value_delimiter = ',')]
    additionally_allowed_tenants: Vec<String>,

    /// The authority host to request tokens from
    #[arg(long, env = "AZURE_AUTHORITY_HOST")]
    authority_host: Option<String>,

    /// Refresh tokens ahead of expiry instead of waiting until they expire
    #[arg(long)]
    proactive_refresh: bool,

    /// Seconds between token requests
    #[arg(short, long, default_value_t = 5)]
    interval: u64,

    /// How many tokens to request before exiting
    #[arg(short = 'n', long, default_value_t = 10)]
    iterations: u32,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let transport = TransportOptions::new()
        .with_request_timeout(DurationSecs(10))
        .with_retry(ErrorBackoffConfig::new(
            Duration::from_millis(250),
            Duration::from_secs(5),
            2,
            3,
        ));

    let mut options = CredentialOptions::new()
        .with_additionally_allowed_tenants(opts.additionally_allowed_tenants)
        .with_proactive_refresh(opts.proactive_refresh)
        .with_transport(transport);
    if let Some(host) = opts.authority_host {
        options = options.with_authority_host(host);
    }

    let assertion_file = opts.assertion_file;
    let credential = ClientAssertionCredential::new(
        opts.tenant_id,
        opts.client_id,
        move || std::fs::read_to_string(&assertion_file).map(|s| s.trim().to_owned()),
        options,
    )?;

    let credential = credential.enter()?;
    let request_options = GetTokenOptions::new().with_timeout(Duration::from_secs(30));

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    for _ in 0..opts.iterations {
        interval.tick().await;

        let token = match credential
            .get_token_info([opts.scope.as_str()], &request_options)
            .await
        {
            Ok(token) => token,
            Err(error) => {
                tracing::error!(
                    error = format_args!("{:?}", color_eyre::Report::new(error)),
                    "unable to acquire token"
                );
                continue;
            }
        };

        let status = token.token_status();
        match status {
            TokenStatus::Fresh => tracing::debug!(
                ?status,
                token = format_args!("{:#?}", token.token()),
                expires_on = token.expires_on().0,
                refresh_on = token.refresh_on().map(|r| r.0),
                "pulled token"
            ),
            TokenStatus::Stale => tracing::warn!(
                ?status,
                token = format_args!("{:#?}", token.token()),
                expires_on = token.expires_on().0,
                refresh_on = token.refresh_on().map(|r| r.0),
                "pulled token"
            ),
            TokenStatus::Expired => tracing::error!(
                ?status,
                expires_on = token.expires_on().0,
                "pulled token"
            ),
        }
    }

    Ok(())
}
