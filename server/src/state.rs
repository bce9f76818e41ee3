use std::sync::Arc;

use super::{config::Config, mqtt::GateClient, store::Store, whatsapp::Whatsapp};

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub gate: GateClient,
    pub whatsapp: Whatsapp,
}

impl AppState {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let store = Store::connect(&config.mongo_url, &config.mongo_db).await;
        let gate = GateClient::spawn(&config, store.clone());
        let whatsapp = Whatsapp::new(&config.wa_server, &config.wa_key);

        Arc::new(Self {
            config,
            store,
            gate,
            whatsapp,
        })
    }
}
