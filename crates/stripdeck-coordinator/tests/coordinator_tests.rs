//! Coordinator 集成测试（基于 MockDevice）

mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use stripdeck_coordinator::{CoordinatorConfig, CoordinatorError};
use stripdeck_device::{CancelToken, DeviceError, DialId, KeyId, MockDevice, Point, Rect, TouchType};
use stripdeck_module::{
    DialEvent, DialEventKind, KeyEvent, ModuleState, Resources, TouchStripEventKind,
};

const RED: [u8; 4] = [255, 0, 0, 255];
const GREEN: [u8; 4] = [0, 255, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

#[test]
fn test_failed_module_is_excluded() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let broken = Arc::new(RecordingModule::new("broken", RED).failing());
    let healthy = Arc::new(RecordingModule::new("healthy", GREEN));
    coordinator
        .register_module(broken.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();
    coordinator
        .register_module(healthy.clone(), Resources::new().with_keys([KeyId::Key2]))
        .unwrap();

    let session = start_session(device.clone(), coordinator.clone());

    assert_eq!(
        coordinator.module_state("broken"),
        Some(ModuleState::Failed)
    );
    assert_eq!(
        coordinator.module_state("healthy"),
        Some(ModuleState::Running)
    );

    device.press_key(KeyId::Key1, Duration::ZERO);
    device.press_key(KeyId::Key2, Duration::ZERO);
    assert!(wait_for_condition(|| healthy.render_calls() >= 2, 1000));

    assert!(broken.calls().is_empty());
    assert_eq!(broken.render_calls(), 0);
    assert_eq!(healthy.calls().len(), 2);
    assert!(device.key_image(KeyId::Key1).is_none());
    assert_eq!(device.key_image(KeyId::Key2).unwrap().get_pixel(0, 0).0, GREEN);

    session.shutdown().unwrap();
    // 失败状态在停止后保持
    assert_eq!(
        coordinator.module_state("broken"),
        Some(ModuleState::Failed)
    );
    assert_eq!(
        coordinator.module_state("healthy"),
        Some(ModuleState::Stopped)
    );
}

#[test]
fn test_key_press_and_release_with_hold_duration() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let module = Arc::new(RecordingModule::new("a", RED));
    coordinator
        .register_module(module.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    device.press_key(KeyId::Key1, Duration::from_millis(300));

    assert_eq!(
        module.calls(),
        vec![
            Call::Key(KeyId::Key1, KeyEvent::pressed()),
            Call::Key(
                KeyId::Key1,
                KeyEvent::released(Duration::from_millis(300))
            ),
        ]
    );
    session.shutdown().unwrap();
}

#[test]
fn test_dial_press_split_into_press_and_release() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let module = Arc::new(RecordingModule::new("a", RED));
    coordinator
        .register_module(module.clone(), Resources::new().with_dials([DialId::Dial2]))
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    device.rotate_dial(DialId::Dial2, -3);
    device.press_dial(DialId::Dial2, Duration::from_millis(50));

    let calls = module.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], Call::Dial(DialId::Dial2, DialEvent::rotate(-3)));
    assert_eq!(calls[1], Call::Dial(DialId::Dial2, DialEvent::press()));
    match &calls[2] {
        Call::Dial(DialId::Dial2, event) => {
            assert_eq!(event.kind, DialEventKind::Release);
            assert_eq!(event.duration, Duration::from_millis(50));
        },
        other => panic!("unexpected call: {:?}", other),
    }
    session.shutdown().unwrap();
}

#[test]
fn test_unowned_controls_are_dropped() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let module = Arc::new(RecordingModule::new("a", RED));
    coordinator
        .register_module(module.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    assert!(device.press_key(KeyId::Key5, Duration::ZERO));
    assert!(device.rotate_dial(DialId::Dial4, 1));
    assert!(module.calls().is_empty());
    session.shutdown().unwrap();
}

#[test]
fn test_overlay_receives_all_events_exclusively() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let owner = Arc::new(RecordingModule::new("owner", RED));
    let overlay = Arc::new(RecordingModule::new("overlay", GREEN).with_overlay(Duration::from_secs(5)));
    coordinator
        .register_module(
            owner.clone(),
            Resources::new()
                .with_keys([KeyId::Key1])
                .with_dials([DialId::Dial1])
                .with_strip(Rect::new(0, 0, 400, 100)),
        )
        .unwrap();
    coordinator
        .register_module(overlay.clone(), Resources::new().with_dials([DialId::Dial4]))
        .unwrap();

    let session = start_session(device.clone(), coordinator.clone());
    overlay.activate_overlay();
    assert!(coordinator.is_overlay_active());

    device.press_key(KeyId::Key1, Duration::ZERO);
    device.rotate_dial(DialId::Dial1, 2);
    device.touch_strip(TouchType::Short, Point::new(10, 10));

    assert!(owner.calls().is_empty());
    let calls = overlay.calls();
    assert_eq!(calls.len(), 4);
    assert!(matches!(calls[0], Call::OverlayKey(KeyId::Key1, e) if e.pressed));
    assert!(matches!(calls[1], Call::OverlayKey(KeyId::Key1, e) if !e.pressed));
    assert_eq!(calls[2], Call::OverlayDial(DialId::Dial1, DialEvent::rotate(2)));
    assert!(matches!(&calls[3], Call::OverlayStrip(e) if e.kind == TouchStripEventKind::Tap));

    // 覆盖层结束后恢复所有者路由
    overlay.dismiss_overlay();
    device.press_key(KeyId::Key1, Duration::ZERO);
    assert_eq!(owner.calls().len(), 2);
    assert_eq!(overlay.calls().len(), 4);

    session.shutdown().unwrap();
}

#[test]
fn test_first_registered_overlay_wins() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let first = Arc::new(RecordingModule::new("first", RED).with_overlay(Duration::from_secs(5)));
    let second = Arc::new(RecordingModule::new("second", BLUE).with_overlay(Duration::from_secs(5)));
    coordinator
        .register_module(first.clone(), Resources::default())
        .unwrap();
    coordinator
        .register_module(second.clone(), Resources::default())
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    second.activate_overlay();
    first.activate_overlay();

    device.press_key(KeyId::Key3, Duration::ZERO);
    assert_eq!(first.calls().len(), 2);
    assert!(second.calls().is_empty());
    session.shutdown().unwrap();
}

#[test]
fn test_overlay_render_and_stale_clear() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let owner = Arc::new(RecordingModule::new("owner", RED));
    let overlay = Arc::new(RecordingModule::new("overlay", GREEN).with_overlay(Duration::from_secs(5)));
    coordinator
        .register_module(owner.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();
    coordinator
        .register_module(overlay.clone(), Resources::default())
        .unwrap();

    let session = start_session(device.clone(), coordinator);

    overlay.activate_overlay();
    let key8_is = |color: [u8; 4]| {
        device
            .key_image(KeyId::Key8)
            .is_some_and(|img| img.get_pixel(0, 0).0 == color)
    };
    assert!(wait_for_condition(|| key8_is(GREEN), 1000));
    assert!(wait_for_condition(
        || device
            .strip_image()
            .is_some_and(|img| img.get_pixel(799, 99).0 == GREEN),
        1000
    ));

    // 覆盖层期间不渲染普通模块
    let renders = owner.render_calls();
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(owner.render_calls(), renders);

    overlay.dismiss_overlay();
    assert!(wait_for_condition(|| key8_is([0, 0, 0, 0]), 1000));
    assert!(wait_for_condition(
        || device
            .key_image(KeyId::Key1)
            .is_some_and(|img| img.get_pixel(0, 0).0 == RED),
        1000
    ));

    session.shutdown().unwrap();
}

#[test]
fn test_strip_touch_goes_to_first_strip_owner() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let keys_only = Arc::new(RecordingModule::new("keys", RED));
    let right = Arc::new(RecordingModule::new("right", GREEN));
    let left = Arc::new(RecordingModule::new("left", BLUE));
    coordinator
        .register_module(keys_only.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();
    coordinator
        .register_module(right.clone(), Resources::new().with_strip(Rect::new(400, 0, 400, 100)))
        .unwrap();
    coordinator
        .register_module(left.clone(), Resources::new().with_strip(Rect::new(0, 0, 400, 100)))
        .unwrap();

    let session = start_session(device.clone(), coordinator);

    // 坐标落在 left 的区域，但路由不按坐标命中
    device.touch_strip(TouchType::Long, Point::new(100, 50));
    device.swipe_strip(Point::new(50, 50), Point::new(350, 50));

    assert!(keys_only.calls().is_empty());
    assert!(left.calls().is_empty());
    let calls = right.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[0], Call::Strip(e) if e.kind == TouchStripEventKind::LongTap));
    assert!(matches!(&calls[1], Call::Strip(e) if e.kind == TouchStripEventKind::Swipe && e.swipe_end.x == 350));

    session.shutdown().unwrap();
}

#[test]
fn test_strip_layers_composited_at_region_offsets() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());

    let left = Arc::new(RecordingModule::new("left", RED));
    let right = Arc::new(RecordingModule::new("right", BLUE));
    coordinator
        .register_module(left, Resources::new().with_strip(Rect::new(0, 0, 200, 100)))
        .unwrap();
    coordinator
        .register_module(right, Resources::new().with_strip(Rect::new(600, 0, 200, 100)))
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    assert!(wait_for_condition(|| device.strip_push_count() >= 1, 1000));

    let strip = device.strip_image().unwrap();
    assert_eq!(strip.dimensions(), (STRIP_WIDTH, STRIP_HEIGHT));
    assert_eq!(strip.get_pixel(100, 50).0, RED);
    assert_eq!(strip.get_pixel(700, 50).0, BLUE);
    assert_eq!(strip.get_pixel(400, 50).0, [0, 0, 0, 0]);

    session.shutdown().unwrap();
}

#[test]
fn test_render_pushes_every_tick() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    coordinator
        .register_module(
            Arc::new(RecordingModule::new("a", RED)),
            Resources::new().with_keys([KeyId::Key1]),
        )
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    // 内容不变也持续推送
    assert!(wait_for_condition(|| device.key_push_count() >= 5, 2000));
    session.shutdown().unwrap();
}

#[test]
fn test_listen_error_is_returned_from_start() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, CoordinatorConfig::default());
    let session = start_session(device.clone(), coordinator.clone());

    device.simulate_disconnect();
    let result = session.handle.join().unwrap();
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Device(DeviceError::Disconnected)
    ));
    assert!(err.is_device_lost());

    coordinator.stop().unwrap();
}

#[test]
fn test_stop_runs_in_registration_order() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let log = Arc::new(Mutex::new(Vec::new()));

    for id in ["one", "two", "three"] {
        let module = RecordingModule::new(id, RED).with_stop_log(log.clone());
        let module = if id == "two" { module.failing() } else { module };
        coordinator
            .register_module(Arc::new(module), Resources::default())
            .unwrap();
    }

    let session = start_session(device, coordinator);
    session.shutdown().unwrap();
    assert_eq!(*log.lock(), vec!["one", "two", "three"]);
}

#[test]
fn test_start_twice_and_late_registration_rejected() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let session = start_session(device.clone(), coordinator.clone());

    assert!(matches!(
        coordinator.start(&CancelToken::new()),
        Err(CoordinatorError::AlreadyStarted)
    ));
    assert!(matches!(
        coordinator.register_module(
            Arc::new(RecordingModule::new("late", RED)),
            Resources::default()
        ),
        Err(CoordinatorError::AlreadyStarted)
    ));

    session.shutdown().unwrap();
}

#[test]
fn test_cancel_stops_listen_and_render() {
    let device = Arc::new(MockDevice::default());
    let coordinator = new_coordinator(&device, fast_config());
    let module = Arc::new(RecordingModule::new("a", RED));
    coordinator
        .register_module(module.clone(), Resources::new().with_keys([KeyId::Key1]))
        .unwrap();

    let session = start_session(device.clone(), coordinator);
    session.shutdown().unwrap();
    assert!(!device.is_listening());

    let renders = module.render_calls();
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(module.render_calls(), renders);
}
