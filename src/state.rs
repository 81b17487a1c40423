use crate::config::Config;
use crate::db::database::Database;
use crate::llm::{GeminiBackend, GenerativeBackend};
use crate::studio::credits::CreditState;
use crate::studio::shots::ShotSettings;

#[derive(Clone)]
pub struct AppState<B: GenerativeBackend = GeminiBackend> {
    pub db: Database,
    pub backend: B,
    pub shot_settings: ShotSettings,
    pub initial_credits: CreditState,
    pub max_reference_dimension: u32,
}

impl AppState<GeminiBackend> {
    pub fn new(db: Database, config: &Config) -> Self {
        AppState {
            db,
            backend: GeminiBackend::from_config(config),
            shot_settings: ShotSettings {
                image_size: config.gemini_image_size.clone(),
                placeholder_base_url: config.placeholder_base_url.clone(),
            },
            initial_credits: CreditState::new(config.initial_credits, config.api_key_set()),
            max_reference_dimension: config.max_reference_dimension,
        }
    }
}

impl<B: GenerativeBackend> AppState<B> {
    pub async fn load_credits(&self) -> anyhow::Result<CreditState> {
        self.db.load_credits(&self.initial_credits).await
    }
}
