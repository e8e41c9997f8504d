use std::sync::Arc;

use blobstore::ObjectStore;
use rubric::{RubricCache, RubricStore, SharedRubricCache};

use crate::config::AppConfig;
use crate::pipeline::Grader;
use crate::provider::LLMProvider;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub cfg: AppConfig,
    pub provider: Arc<dyn LLMProvider>,
    pub rubrics: Arc<dyn RubricStore>,
    pub rubric_cache: SharedRubricCache,
    pub objects: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(
        cfg: AppConfig,
        provider: Arc<dyn LLMProvider>,
        rubrics: Arc<dyn RubricStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            cfg,
            provider,
            rubrics,
            rubric_cache: Arc::new(RubricCache::new()),
            objects,
        }
    }

    pub fn grader(&self) -> Grader {
        Grader::new(self.provider.clone(), self.cfg.generation.clone())
    }
}
