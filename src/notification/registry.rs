//! Lookup of channel adapters by channel kind.

use crate::config::{ChannelConfig, ChannelsConfig};
use crate::core::{ChannelAdapter, ChannelKind};
use crate::notification::adapters::{EmailAdapter, PushAdapter, SmsAdapter};
use crate::notification::webhook::WebhookTransport;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Adapters keyed by the channel kind they serve.
///
/// Built once at startup and shared read-only with the workers.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ChannelKind, Arc<dyn ChannelAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl AdapterRegistry {
    /// Builds the email, SMS and push adapters enabled in the configuration.
    pub fn from_config(config: &ChannelsConfig) -> Result<Self> {
        fn transport(config: &ChannelConfig) -> Result<Option<WebhookTransport>> {
            config
                .endpoint
                .as_ref()
                .map(|endpoint| {
                    WebhookTransport::new(
                        endpoint.clone(),
                        Duration::from_millis(config.timeout_ms),
                    )
                })
                .transpose()
        }

        let mut registry = Self::default();
        if config.email.enabled {
            registry.register(Arc::new(EmailAdapter::new(transport(&config.email)?)));
        }
        if config.sms.enabled {
            registry.register(Arc::new(SmsAdapter::new(transport(&config.sms)?)));
        }
        if config.push.enabled {
            registry.register(Arc::new(PushAdapter::new(transport(&config.push)?)));
        }
        Ok(registry)
    }

    /// Registers an adapter under its own kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        let kind = adapter.kind();
        debug!(channel = %kind, "Registering channel adapter");
        if self.adapters.insert(kind.clone(), adapter).is_some() {
            warn!(channel = %kind, "Replaced existing channel adapter");
        }
    }

    pub fn get(&self, kind: &ChannelKind) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(kind)
    }

    pub fn contains(&self, kind: &ChannelKind) -> bool {
        self.adapters.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<_> = self.adapters.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
