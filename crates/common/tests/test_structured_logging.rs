use common::{init_structured_logging, JsonFormatter, LoggingConfig, OperationTimer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[test]
fn test_json_formatter_handles_all_field_types() {
    let subscriber = Registry::default().with(JsonFormatter);

    tracing::subscriber::with_default(subscriber, || {
        tracing::warn!(
            dependency = "vision-color-palette",
            failures = 5u64,
            delta = -1i64,
            confidence = 0.42,
            half_open = false,
            "Circuit breaker opening"
        );
        tracing::info!(error = ?std::io::ErrorKind::TimedOut, "Debug-formatted field");
    });
}

#[test]
fn test_operation_timer_reports_failure() {
    let subscriber = Registry::default().with(JsonFormatter);

    tracing::subscriber::with_default(subscriber, || {
        let mut timer = OperationTimer::new("photo_analysis");
        timer.add_field("dependency", "vision");
        let result: Result<(), String> = Err("low confidence".to_string());
        timer.finish_with_result(&result);
    });
}

#[test]
fn test_global_subscriber_installs_once() {
    let config = LoggingConfig {
        json_output: true,
        ..LoggingConfig::default()
    };

    assert!(init_structured_logging(config.clone()).is_ok());
    assert!(init_structured_logging(config).is_err());
}
