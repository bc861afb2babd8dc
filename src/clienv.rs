use std::path::PathBuf;

pub const SOCKETHUB_CONFIG: &str = "SOCKETHUB_CONFIG";
pub const SOCKETHUB_NUM_WORKERS: &str = "SOCKETHUB_NUM_WORKERS";
pub const SOCKETHUB_REDIS_HOST: &str = "SOCKETHUB_REDIS_HOST";
pub const SOCKETHUB_REDIS_PORT: &str = "SOCKETHUB_REDIS_PORT";
pub const SOCKETHUB_REDIS_PASSWORD: &str = "SOCKETHUB_REDIS_PASSWORD";

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const SOCKETHUB_SUBDIR: &str = "sockethub";

/// Non-empty value of an environment variable.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Sockethub config directory (~/.config/sockethub)
pub fn config_dir() -> PathBuf {
    let dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
        .join(SOCKETHUB_SUBDIR);
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Default config file path (~/.config/sockethub/config.toml)
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Config file override ($SOCKETHUB_CONFIG)
pub fn config_path_override() -> Option<PathBuf> {
    let val = env_opt(SOCKETHUB_CONFIG).map(PathBuf::from);
    tracing::trace!(value = ?val, "SOCKETHUB_CONFIG env var");
    val
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_is_under_sockethub_dir() {
        let path = default_config_path();
        assert!(path.ends_with("sockethub/config.toml"));
    }

    #[test]
    fn env_opt_ignores_unset_keys() {
        assert!(env_opt("SOCKETHUB_TEST_SURELY_UNSET_VARIABLE").is_none());
    }
}
