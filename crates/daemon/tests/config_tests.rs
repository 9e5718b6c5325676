//! Integration tests for configuration parsing
//!
//! Tests the daemon configuration file layout, including:
//! - Minimal and full configs
//! - Optional device keys
//! - Invalid configuration handling

mod daemon_config {
    const MINIMAL_DAEMON_CONFIG: &str = r#"
[daemon]
log_level = "info"

[device]
"#;

    const FULL_DAEMON_CONFIG: &str = r#"
[daemon]
log_level = "debug"
service_mode = true

[device]
vendor_id = "0x054c"
product_id = "0x0df2"
rate = 2
"#;

    #[test]
    fn test_parse_minimal_daemon_config() {
        let config: toml::Value = toml::from_str(MINIMAL_DAEMON_CONFIG).unwrap();

        let daemon = config.get("daemon").unwrap();
        assert_eq!(daemon.get("log_level").unwrap().as_str().unwrap(), "info");
        assert!(daemon.get("service_mode").is_none());

        let device = config.get("device").unwrap();
        assert!(device.as_table().unwrap().is_empty());
    }

    #[test]
    fn test_parse_full_daemon_config() {
        let config: toml::Value = toml::from_str(FULL_DAEMON_CONFIG).unwrap();

        let daemon = config.get("daemon").unwrap();
        assert_eq!(daemon.get("log_level").unwrap().as_str().unwrap(), "debug");
        assert!(daemon.get("service_mode").unwrap().as_bool().unwrap());

        let device = config.get("device").unwrap();
        assert_eq!(device.get("vendor_id").unwrap().as_str().unwrap(), "0x054c");
        assert_eq!(
            device.get("product_id").unwrap().as_str().unwrap(),
            "0x0df2"
        );
        assert_eq!(device.get("rate").unwrap().as_integer().unwrap(), 2);
    }

    #[test]
    fn test_ids_are_hex_strings() {
        let config: toml::Value = toml::from_str(FULL_DAEMON_CONFIG).unwrap();
        let device = config.get("device").unwrap();

        for key in ["vendor_id", "product_id"] {
            let id = device.get(key).unwrap().as_str().unwrap();
            let hex = id.strip_prefix("0x").unwrap();
            assert!(u16::from_str_radix(hex, 16).is_ok(), "{} = {}", key, id);
        }
    }

    #[test]
    fn test_out_of_range_rate_still_parses() {
        let config: toml::Value = toml::from_str(
            r#"
[daemon]
log_level = "info"

[device]
rate = 100000
"#,
        )
        .unwrap();

        let rate = config
            .get("device")
            .unwrap()
            .get("rate")
            .unwrap()
            .as_integer()
            .unwrap();
        assert_eq!(rate, 100000);
    }
}

mod invalid_config {
    #[test]
    fn test_malformed_toml() {
        let result: Result<toml::Value, _> = toml::from_str(
            r#"
[daemon
log_level = "info"
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rate_wrong_type() {
        let config: toml::Value = toml::from_str(
            r#"
[device]
rate = "fast"
"#,
        )
        .unwrap();

        let rate = config.get("device").unwrap().get("rate").unwrap();
        assert!(rate.as_integer().is_none());
    }

    #[test]
    fn test_duplicate_key() {
        let result: Result<toml::Value, _> = toml::from_str(
            r#"
[device]
rate = 1
rate = 2
"#,
        );
        assert!(result.is_err());
    }
}
