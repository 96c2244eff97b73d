mod server;

pub use server::{AuthConfig, CommerceConfig, ConfigError, ServerConfig, SmtpConfig};
