use crate::backend::DynBackend;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub backend: DynBackend,
    pub config: Config,
}

impl AppState {
    pub fn new(backend: DynBackend, config: Config) -> Self {
        Self { backend, config }
    }
}
