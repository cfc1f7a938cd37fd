//! Connection management and property synchronization of the WDI autofocus
//! adapter, exercised against the simulated controller.

use device_adapters::autofocus::{
    WdiAutofocus, FOCUS_AXIS, FOCUS_DEVICE, LIMIT_MAX, LIMIT_MIN, SERIAL_PORT, WDI_HOST, WDI_PORT,
};
use device_adapters::config::AutofocusSettings;
use device_adapters::driver::Target;
use device_adapters::mock::MockController;
use device_adapters::property::PropertyValue;
use device_adapters::{AutoFocus, Device, StatusCode};
use std::sync::Arc;
use tracing_test::traced_test;

/// Helper to create an adapter wired to a fresh simulated controller.
fn create_adapter() -> (Arc<MockController>, WdiAutofocus) {
    let controller = Arc::new(MockController::new());
    let settings = AutofocusSettings {
        serial_port: "/dev/ttyUSB0".to_string(),
        wdi_host: "192.168.0.20".to_string(),
        ..AutofocusSettings::default()
    };
    let adapter = WdiAutofocus::with_settings(controller.clone(), settings);
    (controller, adapter)
}

#[tokio::test]
async fn test_repeated_calls_connect_once() {
    let (controller, adapter) = create_adapter();

    adapter.initialize().await.unwrap();
    adapter.initialize().await.unwrap();
    adapter.full_focus().await.unwrap();
    assert!(!adapter.busy().await);
    adapter.current_focus_score().await.unwrap();

    assert_eq!(controller.motion_opens(), 1);
    assert_eq!(
        controller.provider_endpoints(),
        vec![("192.168.0.20".to_string(), 27)]
    );
    assert_eq!(controller.axis_lookups(), vec![Target::new(1, 1)]);
}

#[tokio::test]
async fn test_initialize_checks_status_and_reads_limits() {
    let (controller, adapter) = create_adapter();
    controller.set_native_limits(1_500_000.0, 20_000_000.0);

    adapter.initialize().await.unwrap();

    assert_eq!(controller.status_queries(), 1);
    assert_eq!(
        adapter.get_property(LIMIT_MIN).await,
        Ok(PropertyValue::Float(1.5))
    );
    assert_eq!(
        adapter.get_property(LIMIT_MAX).await,
        Ok(PropertyValue::Float(20.0))
    );
}

#[tokio::test]
#[traced_test]
async fn test_failed_initialize_is_logged() {
    let (controller, adapter) = create_adapter();
    controller.fail_status(true);

    assert_eq!(adapter.initialize().await, Err(StatusCode::Error));
    assert!(!adapter.is_initialized().await);
    assert!(logs_contain("Attempt to connect to autofocus failed"));
    assert!(logs_contain("status reply truncated"));
}

#[tokio::test]
async fn test_axis_change_after_init_re_resolves_target() {
    let (controller, adapter) = create_adapter();
    adapter.initialize().await.unwrap();
    assert_eq!(adapter.connected_target().await, Some(Target::new(1, 1)));

    adapter.set_property(FOCUS_AXIS, 2i64.into()).await.unwrap();
    assert!(!adapter.is_connected().await);

    adapter.incremental_focus().await.unwrap();

    assert_eq!(controller.motion_opens(), 2);
    assert_eq!(
        controller.axis_lookups(),
        vec![Target::new(1, 1), Target::new(1, 2)]
    );
    assert_eq!(controller.focus_passes(), vec![(Target::new(1, 2), false)]);
}

#[tokio::test]
async fn test_every_connection_property_invalidates_after_init() {
    let (controller, adapter) = create_adapter();
    adapter.initialize().await.unwrap();

    let changes: [(&str, PropertyValue); 4] = [
        (SERIAL_PORT, "/dev/ttyUSB1".into()),
        (WDI_HOST, "10.1.1.1".into()),
        (WDI_PORT, 2000i64.into()),
        (FOCUS_DEVICE, 3i64.into()),
    ];
    for (name, value) in changes {
        adapter.set_property(name, value.clone()).await.unwrap();
        assert!(!adapter.is_connected().await, "{name} did not reset");
        assert_eq!(adapter.get_property(name).await, Ok(value));
        adapter.full_focus().await.unwrap();
    }

    assert_eq!(controller.motion_opens(), 5);
    assert_eq!(
        controller.motion_ports().last().map(String::as_str),
        Some("/dev/ttyUSB1")
    );
    assert_eq!(
        controller.provider_endpoints().last(),
        Some(&("10.1.1.1".to_string(), 2000))
    );
    assert_eq!(adapter.connected_target().await, Some(Target::new(3, 1)));
}

#[tokio::test]
async fn test_pre_init_changes_before_init_do_not_connect() {
    let (controller, adapter) = create_adapter();

    adapter.set_property(FOCUS_DEVICE, 7i64.into()).await.unwrap();
    adapter.set_property(FOCUS_AXIS, 3i64.into()).await.unwrap();
    assert_eq!(controller.motion_opens(), 0);

    adapter.initialize().await.unwrap();
    assert_eq!(controller.axis_lookups(), vec![Target::new(7, 3)]);
}

#[tokio::test]
async fn test_axis_change_before_init_drops_lazy_session() {
    let (controller, adapter) = create_adapter();
    adapter.full_focus().await.unwrap();
    assert!(adapter.is_connected().await);

    adapter.set_property(FOCUS_AXIS, 2i64.into()).await.unwrap();
    assert!(!adapter.is_connected().await);
    adapter.full_focus().await.unwrap();

    assert_eq!(
        controller.focus_passes(),
        vec![(Target::new(1, 1), true), (Target::new(1, 2), true)]
    );
}

#[tokio::test]
async fn test_failed_init_then_reconfigure_re_resolves_target() {
    let (controller, adapter) = create_adapter();
    controller.fail_status(true);
    assert_eq!(adapter.initialize().await, Err(StatusCode::Error));
    assert!(adapter.is_connected().await);

    adapter.set_property(FOCUS_AXIS, 2i64.into()).await.unwrap();
    controller.fail_status(false);
    adapter.initialize().await.unwrap();

    assert_eq!(
        controller.axis_lookups(),
        vec![Target::new(1, 1), Target::new(1, 2)]
    );
    assert_eq!(adapter.connected_target().await, Some(Target::new(1, 2)));
}

#[tokio::test]
async fn test_missing_device_fails_with_error_code() {
    let (controller, adapter) = create_adapter();
    controller.remove_device(1);

    assert_eq!(adapter.initialize().await, Err(StatusCode::Error));
    assert!(!adapter.is_connected().await);
}

#[tokio::test]
async fn test_unchanged_limit_performs_no_device_write() {
    let (controller, adapter) = create_adapter();
    adapter.initialize().await.unwrap();

    adapter.set_property(LIMIT_MAX, 25.0.into()).await.unwrap();
    adapter.set_property(LIMIT_MIN, 0.0.into()).await.unwrap();
    assert!(controller.limit_writes().is_empty());

    adapter.set_property(LIMIT_MIN, 0.5.into()).await.unwrap();
    adapter.set_property(LIMIT_MIN, 0.5.into()).await.unwrap();
    assert_eq!(controller.limit_writes(), vec![("min", 500_000.0)]);
}

#[tokio::test]
async fn test_failed_limit_write_keeps_new_cached_value() {
    let (controller, adapter) = create_adapter();
    adapter.initialize().await.unwrap();
    controller.fail_limit_writes(true);

    assert_eq!(
        adapter.set_property(LIMIT_MAX, 12.0.into()).await,
        Err(StatusCode::Error)
    );
    // The cache is not rolled back, so it now disagrees with the device.
    assert_eq!(
        adapter.get_property(LIMIT_MAX).await,
        Ok(PropertyValue::Float(12.0))
    );
    assert_eq!(controller.native_limits().1, 25_000_000.0);

    // Writing the same value again is suppressed as a no-op.
    controller.fail_limit_writes(false);
    adapter.set_property(LIMIT_MAX, 12.0.into()).await.unwrap();
    assert!(controller.limit_writes().is_empty());
}

#[tokio::test]
async fn test_offset_is_a_no_op() {
    let (controller, adapter) = create_adapter();

    for offset in [0.0, 3.5, -120.0, f64::MAX] {
        adapter.set_offset(offset).await.unwrap();
        assert_eq!(adapter.offset().await, Ok(0.0));
    }
    adapter.auto_set_parameters().await.unwrap();
    assert_eq!(controller.motion_opens(), 0);
}

#[tokio::test]
async fn test_focus_score_is_absolute_position() {
    let (controller, adapter) = create_adapter();

    controller.set_position_raw(-2048);
    assert_eq!(adapter.current_focus_score().await, Ok(2.0));

    controller.set_position_raw(512);
    assert_eq!(adapter.current_focus_score().await, Ok(0.5));
    assert_eq!(adapter.last_focus_score().await, Ok(0.5));
}

#[tokio::test]
async fn test_continuous_focusing_follows_axis_busy() {
    let (controller, adapter) = create_adapter();
    adapter.initialize().await.unwrap();

    assert_eq!(adapter.continuous_focusing().await, Ok(false));
    adapter.set_continuous_focusing(true).await.unwrap();
    assert!(controller.is_tracking());
    assert_eq!(adapter.continuous_focusing().await, Ok(true));
    assert!(adapter.busy().await);

    adapter.set_continuous_focusing(false).await.unwrap();
    assert_eq!(adapter.continuous_focusing().await, Ok(false));
}

#[tokio::test]
async fn test_focus_lock_reports_false_when_unreachable() {
    let (controller, adapter) = create_adapter();
    controller.set_in_focus(true);
    assert!(adapter.is_continuous_focus_locked().await);

    adapter.shutdown().await.unwrap();
    controller.fail_motion_open(true);
    assert!(!adapter.is_continuous_focus_locked().await);
    assert!(!adapter.busy().await);
}

#[tokio::test]
async fn test_lazy_reconnect_after_failure() {
    let (controller, adapter) = create_adapter();
    controller.fail_provider_open(true);

    assert_eq!(adapter.full_focus().await, Err(StatusCode::Error));
    assert_eq!(adapter.full_focus().await, Err(StatusCode::Error));
    assert_eq!(controller.motion_opens(), 2);

    controller.fail_provider_open(false);
    adapter.full_focus().await.unwrap();
    assert_eq!(controller.focus_passes(), vec![(Target::new(1, 1), true)]);
}

#[tokio::test]
async fn test_concurrent_calls_share_one_connection() {
    let (controller, adapter) = create_adapter();
    let adapter = Arc::new(adapter);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let adapter = adapter.clone();
        tasks.push(tokio::spawn(async move { adapter.full_focus().await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(controller.motion_opens(), 1);
    assert_eq!(controller.focus_passes().len(), 8);
}
