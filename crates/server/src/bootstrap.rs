use std::sync::Arc;

use keybot_core::config::{AppConfig, ConfigError, LoadOptions};
use keybot_core::intent::IntentRouter;
use keybot_slack::events::EventDispatcher;
use keybot_slack::responder::{Responder, SendError};
use keybot_slack::socket::SocketModeRunner;
use keybot_slack::web_api::{AuthIdentity, SlackWebClient};
use keybot_slack::websocket::SocketModeSession;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub identity: AuthIdentity,
    pub session: Arc<SocketModeSession>,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("http client setup failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("slack auth.test failed for the bot token: {0}")]
    Auth(#[source] SendError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let http = reqwest::Client::builder().build().map_err(BootstrapError::HttpClient)?;
    let web_client = SlackWebClient::new(
        http.clone(),
        config.slack.bot_token.clone(),
        &config.slack.api_base_url,
    );

    let identity = web_client.auth_test().await.map_err(BootstrapError::Auth)?;
    info!(
        event_name = "system.bootstrap.slack_authenticated",
        correlation_id = "bootstrap",
        bot_user = %identity.user,
        bot_user_id = %identity.user_id,
        bot_id = identity.bot_id.as_deref().unwrap_or("unknown"),
        team = %identity.team,
        "slack bot token verified"
    );

    let session = Arc::new(SocketModeSession::new(
        http,
        config.slack.app_token.clone(),
        &config.slack.api_base_url,
    ));
    let dispatcher =
        EventDispatcher::new(IntentRouter::default(), Responder::new(Arc::new(web_client)));
    let slack_runner = SocketModeRunner::new(session.clone(), dispatcher);

    Ok(Application { config, identity, session, slack_runner })
}
