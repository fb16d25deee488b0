use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use authgate::{
    authn::{
        AuthenticationFeedbackHandler, DefaultFeedbackHandler, HttpBasicHandler, TokenHandler,
    },
    repository::{MemoryRepository, UserStore},
    server::{server, TlsConfig},
    Authenticator, AuthenticatorConfig, ServiceId,
};

const DESCRIPTION: &str = r#"
The authgate server

Runs an HTTP frontend that authenticates every request against an htpasswd backed user store,
with HTTP Basic and bearer token handlers and support for impersonation.
"#;

#[derive(Parser, serde::Deserialize, Default)]
#[clap(name = "authgate-server", version = clap::crate_version!(), author = "DeisLabs at Microsoft Azure", about = DESCRIPTION)]
struct Opts {
    #[clap(
        short = 'i',
        long = "address",
        env = "AUTHGATE_IP_ADDRESS_PORT",
        help = "the IP address and port to listen on [default: 127.0.0.1:8080]"
    )]
    address: Option<String>,
    #[clap(
        name = "htpasswd_file",
        long = "htpasswd-file",
        env = "AUTHGATE_HTPASSWD_FILE",
        help = "the path to an htpasswd file (bcrypt only) holding the users [default: $XDG_CONFIG_HOME/authgate/htpasswd]"
    )]
    htpasswd_file: Option<PathBuf>,
    #[clap(
        name = "token_secret",
        long = "token-secret",
        env = "AUTHGATE_TOKEN_SECRET",
        help = "the secret used to validate bearer tokens. If not set, bearer tokens are not accepted"
    )]
    token_secret: Option<String>,
    #[clap(
        name = "realm",
        long = "realm",
        env = "AUTHGATE_REALM",
        help = "the realm sent in authentication challenges [default: authgate]"
    )]
    realm: Option<String>,
    #[clap(
        name = "cert_path",
        short = 'c',
        long = "cert-path",
        env = "AUTHGATE_CERT_PATH",
        requires = "key_path",
        help = "the path to the TLS certificate to use. If set, --key-path must be set as well. If not set, the server will use HTTP"
    )]
    cert_path: Option<PathBuf>,
    #[clap(
        name = "key_path",
        short = 'k',
        long = "key-path",
        env = "AUTHGATE_KEY_PATH",
        requires = "cert_path",
        help = "the path to the TLS certificate key to use. If set, --cert-path must be set as well. If not set, the server will use HTTP"
    )]
    key_path: Option<PathBuf>,
    #[clap(
        name = "config_file",
        long = "config-path",
        help = "the path to a configuration file"
    )]
    config_file: Option<PathBuf>,
    #[clap(
        name = "max_sessions",
        long = "max-sessions",
        env = "AUTHGATE_MAX_SESSIONS",
        help = "the maximum number of concurrently open sessions. Unlimited if not set"
    )]
    max_sessions: Option<usize>,

    /// Only read from the configuration file
    #[clap(skip)]
    #[serde(default)]
    authenticator: Option<AuthenticatorConfig>,
    /// Only read from the configuration file. Maps a user to the users allowed to impersonate it
    #[clap(skip)]
    #[serde(default)]
    impersonators: HashMap<String, Vec<String>>,
    #[clap(skip)]
    #[serde(default)]
    workspaces: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // load config file if it exists
    let config_file_path = match opts.config_file {
        Some(c) => c,
        None => default_config_file()
            .ok_or_else(|| anyhow::anyhow!("could not find a default config path"))?,
    };

    let config: Opts = load_toml(config_file_path).await.unwrap_or_else(|e| {
        warn!(error = %e, "No server.toml file loaded");
        Opts::default()
    });

    // find socket address
    //   1. cli options if set
    //   2. config file if set
    //   3. default
    let addr: SocketAddr = opts
        .address
        .or(config.address)
        .unwrap_or_else(|| String::from("127.0.0.1:8080"))
        .parse()?;

    let htpasswd_file = opts
        .htpasswd_file
        .or(config.htpasswd_file)
        .unwrap_or_else(|| default_config_dir().join("htpasswd"));

    let mut store = match tokio::fs::metadata(&htpasswd_file).await {
        Ok(md) if md.is_file() => UserStore::from_file(&htpasswd_file).await?,
        Ok(_) => {
            anyhow::bail!("Expected {} to be a regular file", htpasswd_file.display());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "No htpasswd file found at {}. Only anonymous access will succeed",
                htpasswd_file.display()
            );
            UserStore::default()
        }
        Err(e) => anyhow::bail!("failed to read file {}: {}", htpasswd_file.display(), e),
    };
    for (user, impersonators) in config.impersonators.iter() {
        for impersonator in impersonators {
            store.allow_impersonation(user, impersonator);
        }
    }

    let mut repository = MemoryRepository::new(store);
    for workspace in config.workspaces.iter() {
        repository = repository.with_workspace(workspace);
    }
    if let Some(max) = opts.max_sessions.or(config.max_sessions) {
        repository = repository.with_max_sessions(max);
    }

    let authenticator = Arc::new(
        Authenticator::new(
            Arc::new(repository),
            config.authenticator.unwrap_or_default(),
        )
        .await,
    );

    let realm = opts
        .realm
        .or(config.realm)
        .unwrap_or_else(|| authgate::authn::http_basic::DEFAULT_REALM.to_owned());
    let feedback: Arc<dyn AuthenticationFeedbackHandler> = Arc::new(DefaultFeedbackHandler);

    // Basic comes first so clients asked to log in get a Basic challenge
    authenticator
        .on_handler_registered(
            ServiceId(0),
            &["/"],
            Arc::new(HttpBasicHandler::new(&realm)),
            Some(feedback.clone()),
            "HTTP Basic authentication",
        )
        .await;
    if let Some(secret) = opts.token_secret.or(config.token_secret) {
        authenticator
            .on_handler_registered(
                ServiceId(1),
                &["/"],
                Arc::new(TokenHandler::new(&realm, secret.as_bytes())),
                Some(feedback),
                "Bearer token authentication",
            )
            .await;
    }

    let cert_path = opts.cert_path.or(config.cert_path);
    let key_path = opts.key_path.or(config.key_path);

    let tls = match (cert_path, key_path) {
        (None, _) => None,
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        (Some(_), None) => anyhow::bail!("--key-path should be set if --cert-path was set"),
    };

    info!(%addr, users = %htpasswd_file.display(), "Starting server");

    server(authenticator, addr, tls).await
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|v| v.join("authgate/server.toml"))
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|v| v.join("authgate/"))
        .unwrap_or_else(|| "./authgate".into())
}

async fn load_toml<T>(file: PathBuf) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw_data = tokio::fs::read(&file)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read TOML file {}: {}", file.display(), e))?;
    let res = toml::from_slice::<T>(&raw_data)?;
    Ok(res)
}
