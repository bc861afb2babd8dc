//! `connect-config.js`: tells the bundled demo pages where to reach the daemon.

use crate::config::{Config, PublicConfig};
use std::path::PathBuf;
use tracing::info;

pub const FILE_NAME: &str = "connect-config.js";

const DEFAULT_SECRET: &str = "1234567890";

/// Render the descriptor. The `[public]` address is used only when domain,
/// port and path are all set.
pub fn render(config: &Config) -> String {
    let mut out = String::from("var CONNECT = {};");
    match config.public.as_ref().and_then(complete_public) {
        Some((domain, port, path, tls)) => {
            out.push_str(&format!(
                "CONNECT.TLS={};CONNECT.HOST={};CONNECT.PORT={};CONNECT.PATH={};",
                tls,
                js_string(domain),
                port,
                js_string(path)
            ));
        }
        None => {
            out.push_str(&format!(
                "CONNECT.TLS={};CONNECT.HOST=\"localhost\";CONNECT.PORT={};CONNECT.PATH=\"/sockethub\";",
                config.host.enable_tls, config.host.port
            ));
        }
    }

    let secret = match config.examples.secret.as_str() {
        "" => DEFAULT_SECRET,
        secret => secret,
    };
    out.push_str(&format!("CONNECT.SECRET={};", js_string(secret)));
    out
}

/// Quote `value` as a string literal; JSON string syntax is valid JavaScript.
fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn complete_public(public: &PublicConfig) -> Option<(&str, u16, &str, bool)> {
    match (&public.domain, public.port, &public.path) {
        (Some(domain), Some(port), Some(path)) => {
            Some((domain.as_str(), port, path.as_str(), public.tls))
        }
        _ => None,
    }
}

pub fn path(config: &Config) -> PathBuf {
    config.examples.location.join(FILE_NAME)
}

/// Write the descriptor into the examples location.
pub async fn write(config: &Config) -> std::io::Result<PathBuf> {
    let path = path(config);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, render(config)).await?;
    info!(path = %path.display(), "Wrote connect config");
    Ok(path)
}
