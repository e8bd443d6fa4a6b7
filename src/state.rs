use crate::{
    engine::{EngineConfig, MatchingEngine},
    instrument::InstrumentError,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Result<Self, InstrumentError> {
        Ok(Self {
            engine: Arc::new(MatchingEngine::new(config)?),
        })
    }
}
