use std::sync::Arc;

use switchboard_channels::ChannelRegistry;

/// State shared by every request handler.
pub struct GatewayState {
    pub registry: Arc<ChannelRegistry>,
}

impl GatewayState {
    pub fn new(registry: Arc<ChannelRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }
}
