//! Process-wide collection of named routes.
//!
//! Routes start and stop together as a unit. There is no runtime add
//! or remove; reconfiguration is a restart.

use std::sync::Arc;

use tracing::{error, info};

use shunt_core::config::RouteConfig;
use shunt_routing::MetadataCache;

use crate::error::ProxyResult;
use crate::instance::RoutingInstance;

/// All routing instances of one router process.
#[derive(Debug)]
pub struct RouteRegistry {
    routes: Vec<RoutingInstance>,
}

impl RouteRegistry {
    /// Construct and start every configured route.
    ///
    /// If any route fails to bind, the routes already started are
    /// stopped in reverse order before the error surfaces.
    pub async fn start_all(
        configs: Vec<RouteConfig>,
        metadata: Option<Arc<dyn MetadataCache>>,
    ) -> ProxyResult<Self> {
        let mut routes: Vec<RoutingInstance> = Vec::with_capacity(configs.len());
        for config in configs {
            match RoutingInstance::start(config, metadata.clone()).await {
                Ok(route) => routes.push(route),
                Err(err) => {
                    error!(%err, "failed to start route, rolling back");
                    for route in routes.into_iter().rev() {
                        route.stop().await;
                    }
                    return Err(err);
                }
            }
        }
        info!(routes = routes.len(), "all routes started");
        Ok(Self { routes })
    }

    /// The started routes, in configuration order.
    pub fn routes(&self) -> &[RoutingInstance] {
        &self.routes
    }

    /// Drive every route through an orderly shutdown.
    pub async fn stop_all(self) {
        for route in self.routes {
            route.stop().await;
        }
        info!("all routes stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use shunt_core::config::Destinations;
    use shunt_core::types::AccessMode;
    use shunt_core::{Endpoint, Protocol};

    fn route_config(name: &str) -> RouteConfig {
        RouteConfig {
            name: name.to_string(),
            bind: Some(("127.0.0.1".to_string(), 0)),
            socket: None,
            mode: AccessMode::ReadWrite,
            protocol: Protocol::Classic,
            destinations: Destinations::Static(vec![Endpoint::tcp("127.0.0.1", 1)]),
            max_connections: 8,
            max_connect_errors: 100,
            client_connect_timeout: Duration::from_secs(2),
            destination_connect_timeout: Duration::from_secs(1),
            net_buffer_length: 16 * 1024,
        }
    }

    #[tokio::test]
    async fn starts_and_stops_every_route() {
        let registry =
            RouteRegistry::start_all(vec![route_config("a"), route_config("b")], None)
                .await
                .unwrap();

        assert_eq!(registry.routes().len(), 2);
        assert_eq!(registry.routes()[0].name(), "a");
        assert_eq!(registry.routes()[1].name(), "b");

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_routes() {
        let mut bad = route_config("bad");
        bad.bind = Some(("203.0.113.1".to_string(), 0));

        let err = RouteRegistry::start_all(vec![route_config("good"), bad], None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::ProxyError::Bind { .. }));
    }
}
