use super::*;

fn setting<'a>(config: &'a ClientConfig, key: &str) -> Option<&'a str> {
    config.get(key)
}

#[test]
fn test_consumer_config_disables_auto_commit() {
    let config = KafkaBrokerConfig::new("localhost:9092").build_consumer_config("message-group");

    assert_eq!(setting(&config, "group.id"), Some("message-group"));
    assert_eq!(setting(&config, "enable.auto.commit"), Some("false"));
    assert_eq!(setting(&config, "auto.offset.reset"), Some("earliest"));
}

#[test]
fn test_plaintext_config_sets_no_security() {
    let config = KafkaBrokerConfig::new("localhost:9092").build_producer_config();

    assert_eq!(setting(&config, "bootstrap.servers"), Some("localhost:9092"));
    assert_eq!(setting(&config, "security.protocol"), None);
    assert_eq!(setting(&config, "sasl.username"), None);
}

#[test]
fn test_with_sasl_defaults_to_sasl_ssl() {
    let config = KafkaBrokerConfig::new("broker:9093").with_sasl("user", "pass", "PLAIN");
    let client = config.build_producer_config();

    assert_eq!(setting(&client, "security.protocol"), Some("SASL_SSL"));
    assert_eq!(setting(&client, "sasl.mechanism"), Some("PLAIN"));
    assert_eq!(setting(&client, "sasl.username"), Some("user"));
}

#[test]
fn test_from_kafka_config_requires_all_sasl_fields() {
    let kafka = KafkaConfig {
        bootstrap_servers: "broker:9092".to_string(),
        sasl_username: Some("user".to_string()),
        ..Default::default()
    };

    let config = KafkaBrokerConfig::from(&kafka);

    assert_eq!(config.bootstrap_servers, "broker:9092");
    assert!(config.sasl_username.is_none());
    assert!(config.security_protocol.is_none());
}

#[test]
fn test_from_kafka_config_explicit_protocol_overrides_sasl_default() {
    let kafka = KafkaConfig {
        sasl_username: Some("user".to_string()),
        sasl_password: Some("pass".to_string()),
        sasl_mechanism: Some("SCRAM-SHA-256".to_string()),
        security_protocol: Some("SASL_PLAINTEXT".to_string()),
        ..Default::default()
    };

    let config = KafkaBrokerConfig::from(&kafka);

    assert_eq!(config.security_protocol.as_deref(), Some("SASL_PLAINTEXT"));
}

#[test]
fn test_coordinator_errors_are_transient() {
    for code in [
        RDKafkaErrorCode::NotCoordinator,
        RDKafkaErrorCode::CoordinatorNotAvailable,
        RDKafkaErrorCode::CoordinatorLoadInProgress,
    ] {
        let err = classify_fetch_error(KafkaError::MessageConsumption(code));
        assert!(err.is_transient(), "{code:?} should be transient");
    }
}

#[test]
fn test_other_fetch_errors_are_not_transient() {
    let err = classify_fetch_error(KafkaError::MessageConsumption(
        RDKafkaErrorCode::UnknownTopicOrPartition,
    ));

    assert!(matches!(err, BusError::Fetch(_)));
}
