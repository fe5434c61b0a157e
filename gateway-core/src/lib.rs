pub mod config;

pub use config::{
    ConfigError, ConfigOverrides, DatabaseSection, GatewayConfig, JwtSection,
    ObservabilitySection, RateLimitSection, ServerSection, ServerTlsConfig, VaultSection,
};
