//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::compile::build_routes;
use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::error::GatewayError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Route build failed: {0}")]
    Build(#[from] GatewayError),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse, validate and trial-compile a TOML document.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    build_routes(&config)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[routes]]
            id = "get"
            uri = "http://httpbin.test"
            predicates = [{{ type = "path", patterns = ["/get"] }}]
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.routes[0].id, "get");
    }

    #[test]
    fn reports_each_stage() {
        assert!(matches!(load_config(Path::new("/nonexistent/gateway.toml")), Err(ConfigError::Io(_))));
        assert!(matches!(parse_config("routes = 5"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            parse_config("[listener]\nbind_address = \"nope\""),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            parse_config(
                "[[routes]]\nid = \"r\"\nuri = \"http://a.test\"\npredicates = [{ type = \"method\", methods = [\"G ET\"] }]"
            ),
            Err(ConfigError::Build(GatewayError::PredicateEvaluation(_)))
        ));
    }
}
