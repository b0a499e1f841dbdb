//! Device ranking
//!
//! Every label heuristic lives here as a pure function over a device list,
//! so the selection rules can be tested without hardware.
//!
//! ## Rules
//!
//! - Scan ranking: non-virtual devices first, virtual devices last,
//!   enumeration order preserved inside each group
//! - Production: never start on a virtual device while a physical one exists
//! - Photo preference: integrated/webcam > non-virtual > back/environment > first

use super::types::{CameraDevice, ProductionMode, VirtualCameraFilter};

/// Sort devices so that non-virtual devices come first (stable)
pub fn rank_devices(mut devices: Vec<CameraDevice>, filter: &VirtualCameraFilter) -> Vec<CameraDevice> {
    // sort_by_key is stable: enumeration order survives within each group
    devices.sort_by_key(|d| filter.is_virtual_device(d));
    devices
}

/// Production skip rule
///
/// If the device at `from` is virtual, walk forward (wrapping) to the next
/// non-virtual device. If every device is virtual, fall back to index 0.
/// Returns 0 for an empty list.
pub fn production_index(devices: &[CameraDevice], from: usize, filter: &VirtualCameraFilter) -> usize {
    let len = devices.len();
    if len == 0 {
        return 0;
    }

    let from = from % len;
    (0..len)
        .map(|step| (from + step) % len)
        .find(|&i| !filter.is_virtual_device(&devices[i]))
        .unwrap_or(0)
}

/// Index a session should bind first, starting from its current index
pub fn preferred_index(
    devices: &[CameraDevice],
    from: usize,
    mode: ProductionMode,
    filter: &VirtualCameraFilter,
) -> usize {
    if devices.is_empty() {
        return 0;
    }

    if mode.is_production() {
        production_index(devices, from, filter)
    } else {
        from % devices.len()
    }
}

/// Order of bind attempts for one start call
///
/// A rotation of all indices beginning at `from`, so the list has exactly
/// `devices.len()` entries. In production the rotation is stably
/// re-partitioned so that every non-virtual device is tried before any
/// virtual one.
pub fn attempt_order(
    devices: &[CameraDevice],
    from: usize,
    mode: ProductionMode,
    filter: &VirtualCameraFilter,
) -> Vec<usize> {
    let len = devices.len();
    if len == 0 {
        return Vec::new();
    }

    let from = from % len;
    let mut order: Vec<usize> = (0..len).map(|step| (from + step) % len).collect();

    if mode.is_production() {
        order.sort_by_key(|&i| filter.is_virtual_device(&devices[i]));
    }

    order
}

/// Next device for a manual camera switch
///
/// - Production: next non-virtual device after `current` (wrapping); plain
///   cycling when every device is virtual
/// - Development: toggle between a virtual and a non-virtual device when
///   both kinds exist, otherwise cycle
pub fn switch_target(
    devices: &[CameraDevice],
    current: usize,
    mode: ProductionMode,
    filter: &VirtualCameraFilter,
) -> usize {
    let len = devices.len();
    if len == 0 {
        return 0;
    }

    let current = current % len;
    let next = (current + 1) % len;

    if mode.is_production() {
        return (0..len)
            .map(|step| (next + step) % len)
            .find(|&i| !filter.is_virtual_device(&devices[i]))
            .unwrap_or(next);
    }

    let on_virtual = filter.is_virtual_device(&devices[current]);
    devices
        .iter()
        .position(|d| filter.is_virtual_device(d) != on_virtual)
        .unwrap_or(next)
}

/// Photo-session device preference (four tiers)
///
/// 1. non-virtual device labelled "integrated" or "webcam"
/// 2. any non-virtual device
/// 3. device labelled "back" or "environment"
/// 4. the first device, virtual or not
pub fn photo_preference(devices: &[CameraDevice], filter: &VirtualCameraFilter) -> Option<usize> {
    if devices.is_empty() {
        return None;
    }

    let label_has = |d: &CameraDevice, words: &[&str]| {
        let label = d.label.to_lowercase();
        words.iter().any(|w| label.contains(w))
    };

    devices
        .iter()
        .position(|d| !filter.is_virtual_device(d) && label_has(d, &["integrated", "webcam"]))
        .or_else(|| devices.iter().position(|d| !filter.is_virtual_device(d)))
        .or_else(|| devices.iter().position(|d| label_has(d, &["back", "environment"])))
        .or(Some(0))
}
