//! Preview URL resolution.

use std::sync::Arc;

use crate::config::{PreviewConfig, PreviewMode};

/// Turns an allocated port into the URL shown to the user.
pub trait PreviewUrlResolver: Send + Sync {
    fn resolve(&self, port: u16, project_id: Option<&str>) -> String;

    /// URL that bypasses any reverse proxy, for live-reload sockets.
    fn resolve_direct(&self, port: u16) -> String;
}

/// `http://<host>:<port>`.
#[derive(Debug, Clone)]
pub struct LocalUrlResolver {
    host: String,
}

impl Default for LocalUrlResolver {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl LocalUrlResolver {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl PreviewUrlResolver for LocalUrlResolver {
    fn resolve(&self, port: u16, _project_id: Option<&str>) -> String {
        self.resolve_direct(port)
    }

    fn resolve_direct(&self, port: u16) -> String {
        format!("http://{}:{}", self.host, port)
    }
}

/// `<base>/preview/<project>/` behind a reverse proxy.
#[derive(Debug, Clone)]
pub struct PathRoutedUrlResolver {
    base_url: String,
    direct: LocalUrlResolver,
}

impl PathRoutedUrlResolver {
    pub fn new(base_url: impl Into<String>, direct_host: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            direct: LocalUrlResolver::new(direct_host),
        }
    }
}

impl PreviewUrlResolver for PathRoutedUrlResolver {
    fn resolve(&self, port: u16, project_id: Option<&str>) -> String {
        match project_id {
            Some(project) => format!("{}/preview/{}/", self.base_url, project),
            // Without a project id there is no route to address.
            None => self.direct.resolve_direct(port),
        }
    }

    fn resolve_direct(&self, port: u16) -> String {
        self.direct.resolve_direct(port)
    }
}

/// Resolver for a `[preview]` section.
pub fn resolver_from_config(config: &PreviewConfig) -> Arc<dyn PreviewUrlResolver> {
    match (config.mode, &config.public_base_url) {
        (PreviewMode::PathRouted, Some(base)) => {
            Arc::new(PathRoutedUrlResolver::new(base, &config.host))
        }
        _ => Arc::new(LocalUrlResolver::new(&config.host)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local() {
        let resolver = LocalUrlResolver::default();
        assert_eq!(resolver.resolve(5173, Some("p1")), "http://localhost:5173");
    }

    #[test]
    fn test_path_routed() {
        let resolver = PathRoutedUrlResolver::new("https://apps.example.com/", "10.0.0.5");
        assert_eq!(
            resolver.resolve(5173, Some("p1")),
            "https://apps.example.com/preview/p1/"
        );
        assert_eq!(resolver.resolve_direct(5173), "http://10.0.0.5:5173");
    }

    #[test]
    fn test_path_routed_without_base_falls_back() {
        let config = PreviewConfig {
            mode: PreviewMode::PathRouted,
            host: "localhost".to_string(),
            public_base_url: None,
        };
        assert_eq!(
            resolver_from_config(&config).resolve(8080, Some("p")),
            "http://localhost:8080"
        );
    }
}
