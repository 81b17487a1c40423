use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

use crate::config::CONFIG;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(CONFIG.gemini_request_timeout_secs.max(10)))
        .connect_timeout(Duration::from_secs(15))
        .user_agent(concat!("the-shooter/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
