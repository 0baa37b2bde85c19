//! Tracing initialisation for the `bridgewatch` binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::settings::LogSettings;

/// Build the filter directive: `"info,bridgewatch_evm=debug"` etc.
/// `RUST_LOG`, when set, replaces the configured directives.
pub fn directives(settings: &LogSettings) -> String {
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !env.trim().is_empty() {
            return env;
        }
    }
    let mut directives = settings.level.clone();
    let mut components: Vec<_> = settings.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// Initialise tracing. Call once at startup.
pub fn init(settings: &LogSettings) {
    let filter = EnvFilter::try_new(directives(settings)).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn component_levels_use_crate_names() {
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }
        let settings = LogSettings {
            level: "warn".into(),
            components: HashMap::from([
                ("bridgewatch-storage".to_string(), "debug".to_string()),
                ("bridgewatch-core".to_string(), "info".to_string()),
            ]),
            json: false,
        };
        assert_eq!(
            directives(&settings),
            "warn,bridgewatch_core=info,bridgewatch_storage=debug"
        );
    }
}
