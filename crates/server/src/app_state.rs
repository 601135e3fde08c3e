use std::sync::Arc;

use server_api::ApiContext;

use crate::{fanout::EventRouter, presence::PresenceRegistry};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) router: EventRouter,
}

impl AppState {
    pub(crate) fn new(api: ApiContext) -> Self {
        Self {
            api,
            router: EventRouter::new(Arc::new(PresenceRegistry::new())),
        }
    }
}
