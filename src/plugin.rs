use crate::context::Context;
use async_graphql::{BatchRequest, BatchResponse};
use async_trait::async_trait;
use std::sync::Arc;

/// The `Plugin` trait defines hook points for extending the server's request lifecycle.
///
/// Plugins observe schema changes and wrap every HTTP request without being
/// part of the schema's extension chain.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Result type for plugin operations
    type Error: std::fmt::Display + Send + Sync + 'static;

    /// Unique name for the plugin
    fn name(&self) -> &str;

    /// Hook called whenever the served schema is (re)built, with its printed SDL.
    async fn on_schema_change(&self, _sdl: &str) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Hook called before the GraphQL request is executed.
    ///
    /// This is a good place to inspect headers or seed the request context.
    async fn on_request(&self, _ctx: &Context, _req: &BatchRequest) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Hook called after every operation of the request has completed.
    async fn on_response(&self, _ctx: &Context, _res: &BatchResponse) -> Result<(), Self::Error> {
        Ok(())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A registry to hold and manage multiple plugins.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin<Error = BoxError>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { plugins: Vec::new() }
    }

    pub fn register<P>(&mut self, plugin: P)
    where
        P: Plugin + 'static,
        P::Error: Into<BoxError>,
    {
        // Wrapper to erase the specific Error type into Box<dyn Error>
        struct ErasurePlugin<T>(T);

        #[async_trait]
        impl<T> Plugin for ErasurePlugin<T>
        where
            T: Plugin + Send + Sync,
            T::Error: Into<BoxError>,
        {
            type Error = BoxError;

            fn name(&self) -> &str {
                self.0.name()
            }

            async fn on_schema_change(&self, sdl: &str) -> Result<(), Self::Error> {
                self.0.on_schema_change(sdl).await.map_err(Into::into)
            }

            async fn on_request(&self, ctx: &Context, req: &BatchRequest) -> Result<(), Self::Error> {
                self.0.on_request(ctx, req).await.map_err(Into::into)
            }

            async fn on_response(&self, ctx: &Context, res: &BatchResponse) -> Result<(), Self::Error> {
                self.0.on_response(ctx, res).await.map_err(Into::into)
            }
        }

        self.plugins.push(Arc::new(ErasurePlugin(plugin)));
    }

    /// Builder-style [`PluginRegistry::register`].
    pub fn with<P>(mut self, plugin: P) -> Self
    where
        P: Plugin + 'static,
        P::Error: Into<BoxError>,
    {
        self.register(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn on_schema_change(&self, sdl: &str) -> crate::error::Result<()> {
        for plugin in &self.plugins {
            plugin
                .on_schema_change(sdl)
                .await
                .map_err(|e| plugin_error(plugin.name(), e))?;
        }
        Ok(())
    }

    pub async fn on_request(&self, ctx: &Context, req: &BatchRequest) -> crate::error::Result<()> {
        for plugin in &self.plugins {
            plugin
                .on_request(ctx, req)
                .await
                .map_err(|e| plugin_error(plugin.name(), e))?;
        }
        Ok(())
    }

    pub async fn on_response(&self, ctx: &Context, res: &BatchResponse) -> crate::error::Result<()> {
        for plugin in &self.plugins {
            plugin
                .on_response(ctx, res)
                .await
                .map_err(|e| plugin_error(plugin.name(), e))?;
        }
        Ok(())
    }
}

fn plugin_error(name: &str, e: BoxError) -> crate::error::Error {
    crate::error::Error::Plugin(format!("{name}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        type Error = Error;

        fn name(&self) -> &str {
            self.name
        }

        async fn on_schema_change(&self, sdl: &str) -> crate::error::Result<()> {
            self.calls.lock().push(format!("{}:schema:{sdl}", self.name));
            Ok(())
        }

        async fn on_request(&self, _ctx: &Context, _req: &BatchRequest) -> crate::error::Result<()> {
            self.calls.lock().push(format!("{}:request", self.name));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        type Error = Error;

        fn name(&self) -> &str {
            "failing"
        }

        async fn on_request(&self, _ctx: &Context, _req: &BatchRequest) -> crate::error::Result<()> {
            Err(Error::Internal("boom".into()))
        }
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new()
            .with(Recorder { name: "a", calls: calls.clone() })
            .with(Recorder { name: "b", calls: calls.clone() });
        assert_eq!(registry.names(), vec!["a", "b"]);

        registry.on_schema_change("type Query").await.unwrap();
        let ctx = Context::new(Default::default());
        let req = BatchRequest::Single(async_graphql::Request::new("{ a }"));
        registry.on_request(&ctx, &req).await.unwrap();

        assert_eq!(
            *calls.lock(),
            vec!["a:schema:type Query", "b:schema:type Query", "a:request", "b:request"]
        );
    }

    #[tokio::test]
    async fn test_plugin_failure_maps_to_plugin_error() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = PluginRegistry::new()
            .with(Failing)
            .with(Recorder { name: "after", calls: calls.clone() });

        let ctx = Context::new(Default::default());
        let req = BatchRequest::Single(async_graphql::Request::new("{ a }"));
        let err = registry.on_request(&ctx, &req).await.unwrap_err();

        assert!(matches!(err, Error::Plugin(ref msg) if msg.starts_with("failing:")));
        assert!(calls.lock().is_empty());
    }
}
