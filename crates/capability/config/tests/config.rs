use wavy_config::{AppConfig, ConfigError, IngestMode, TcpFraming};

// 环境变量是进程级状态，全部断言放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    let config = AppConfig::from_env().expect("defaults");
    assert_eq!(config.ingest_mode, IngestMode::Mqtt);
    assert_eq!(config.mqtt_topic_prefix, "sensores");
    assert_eq!(config.sensor_types.len(), 4);
    assert_eq!(config.storage_port, 6000);
    assert_eq!(config.flush_interval_seconds, 30);
    assert_eq!(config.tcp_framing, TcpFraming::Chunk);
    assert!(config.preprocess_url.is_none());

    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("WAVY_INGEST_MODE", "Both");
        std::env::set_var("WAVY_SENSOR_TYPES", " pressao , ,corrente ");
        std::env::set_var("WAVY_MQTT_TOPIC_PREFIX", "boias/");
        std::env::set_var("WAVY_TCP_FRAMING", "line");
        std::env::set_var("WAVY_BATCH_BY_SENSOR_TYPE", "true");
        std::env::set_var("WAVY_PREPROCESS_URL", "http://127.0.0.1:7070/process");
    }

    let config = AppConfig::from_env().expect("config");
    assert!(config.ingest_mode.mqtt_enabled());
    assert!(config.ingest_mode.tcp_enabled());
    assert_eq!(config.sensor_types, vec!["pressao", "corrente"]);
    assert_eq!(config.mqtt_topic_prefix, "boias");
    assert_eq!(config.tcp_framing, TcpFraming::Line);
    assert!(config.batch_by_sensor_type);
    assert_eq!(
        config.preprocess_url.as_deref(),
        Some("http://127.0.0.1:7070/process")
    );

    unsafe {
        std::env::set_var("WAVY_FLUSH_INTERVAL_SECONDS", "0");
    }
    let err = AppConfig::from_env().expect_err("zero interval");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "WAVY_FLUSH_INTERVAL_SECONDS"));

    unsafe {
        std::env::set_var("WAVY_FLUSH_INTERVAL_SECONDS", "30");
        std::env::set_var("WAVY_INGEST_MODE", "amqp");
    }
    assert!(AppConfig::from_env().is_err());
}
