use crate::auth::TokenAuthenticator;
use crate::config::GatewayConfig;
use crate::routes::RouteTable;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub routes: Arc<RouteTable>,
    pub client: reqwest::Client,
    pub auth: Arc<TokenAuthenticator>,
}

impl AppState {
    pub fn new(config: GatewayConfig, routes: RouteTable) -> Result<Self, reqwest::Error> {
        // Redirects are relayed to the caller, never followed
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.upstream.connect_timeout))
            .pool_max_idle_per_host(config.upstream.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let auth = TokenAuthenticator::new(&config.identity, client.clone());

        Ok(Self {
            config: Arc::new(config),
            routes: Arc::new(routes),
            client,
            auth: Arc::new(auth),
        })
    }
}
