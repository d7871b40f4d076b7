//! Configuration validation logic.

use crate::config::schema::RouterConfig;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

/// Validate a RouterConfig for semantic correctness.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError(format!(
            "listener.bind_address '{}' is not a socket address",
            config.listener.bind_address
        )));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError(format!(
            "observability.metrics_address '{}' is not a socket address",
            config.observability.metrics_address
        )));
    }

    if config.admin.enabled && config.admin.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError(format!(
            "admin.bind_address '{}' is not a socket address",
            config.admin.bind_address
        )));
    }

    if config.health_check_user_agent.is_empty() {
        errors.push(ValidationError(
            "health_check_user_agent must not be empty".to_string(),
        ));
    }

    for route in &config.static_routes {
        if route.uri.trim().is_empty() {
            errors.push(ValidationError("static route with empty uri".to_string()));
        }
        if route.backends.is_empty() {
            errors.push(ValidationError(format!(
                "static route '{}' has no backends",
                route.uri
            )));
        }
        for backend in &route.backends {
            if backend.parse::<std::net::SocketAddr>().is_err() {
                errors.push(ValidationError(format!(
                    "static route '{}' backend '{}' is not a socket address",
                    route.uri, backend
                )));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::StaticRoute;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let mut config = RouterConfig::default();
        config.listener.bind_address = "not-an-address".into();
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("bind_address"));
    }

    #[test]
    fn rejects_static_route_without_backends() {
        let mut config = RouterConfig::default();
        config.static_routes.push(StaticRoute {
            uri: "app.example.com".into(),
            backends: vec![],
            application_id: String::new(),
            route_service_url: None,
        });
        let errs = validate_config(&config).unwrap_err();
        assert!(errs[0].0.contains("no backends"));
    }

    #[test]
    fn rejects_unparseable_backend() {
        let mut config = RouterConfig::default();
        config.static_routes.push(StaticRoute {
            uri: "app.example.com".into(),
            backends: vec!["nope".into()],
            application_id: String::new(),
            route_service_url: None,
        });
        assert!(validate_config(&config).is_err());
    }
}
