#![allow(clippy::unwrap_used)]
// Environment overrides. Separate test binary: Jail mutates the process env.

use std::time::Duration;

use sensorlink_config::load_config;

// ── Environment ─────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("config.toml", "[connection]\nmax_retry_attempts = 8\n")?;
        jail.set_env("SENSORLINK_CONNECTION__MAX_RETRY_ATTEMPTS", "12");
        jail.set_env("SENSORLINK_RATE__ADAPTATION_DELAY_MS", "500");

        let path = jail.directory().join("config.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.connection.max_retry_attempts, 12);
        assert_eq!(
            config.rate_controller_config().unwrap().adaptation_delay,
            Duration::from_millis(500)
        );
        Ok(())
    });
}
