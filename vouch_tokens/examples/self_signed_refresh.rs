use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time;
use vouch::clock::DurationSecs;
use vouch::{Actor, IdentityKey, Scope};
use vouch_tokens::sources::IntoDefensive;
use vouch_tokens::{Context, SelfSignedSource};

#[derive(Debug, Parser)]
struct Opts {
    /// The client ID to issue credentials for
    #[arg(short, long, env)]
    client_id: String,

    /// The scope to grant, as a space-delimited list
    #[arg(short, long, env, default_value = "")]
    scope: Scope,

    /// A PEM file holding the identity key; a fresh key is generated when
    /// omitted
    #[arg(short = 'f', long, env, value_name = "FILE")]
    identity_key_file: Option<std::path::PathBuf>,

    /// Credential validity in seconds
    #[arg(short, long, env, default_value_t = 180 * 60)]
    ttl: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let key = match &opts.identity_key_file {
        Some(path) => IdentityKey::from_pem(&std::fs::read_to_string(path)?)?,
        None => IdentityKey::generate(2048)?,
    };
    let key = Arc::new(key);

    tracing::info!(key_id = %key.id(), "identity key loaded");

    let actor = Actor::new(opts.client_id.as_str(), opts.scope.clone());
    let source = SelfSignedSource::new(key.clone(), actor)
        .with_ttl(DurationSecs(opts.ttl))
        .into_defensive();

    let ctx = Context::new()
        .with_identity_key(key.clone())
        .with_credentials(source);

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let bearer = ctx.authenticate_outbound().await?;
        match bearer.verify(&key, &vouch::clock::System) {
            Ok(verified) => {
                tracing::info!(
                    client_id = %verified.actor().client_id(),
                    expiry = verified.expiry().0,
                    "pulled credential"
                );
            }
            Err(err) => {
                tracing::error!(error = %err, "pulled credential failed verification");
            }
        }
    }
}
