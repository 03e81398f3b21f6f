//! Keyboard state and the per-frame control snapshot.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Camera controls held down during a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub look_up: bool,
    pub look_down: bool,
    pub look_left: bool,
    pub look_right: bool,
    pub forward: bool,
    pub backward: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub rise: bool,
    pub sink: bool,
}

impl ControlSnapshot {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// Tracks the current state of the keyboard.
#[derive(Debug, Default)]
pub struct InputState {
    /// Currently pressed keys
    pressed_keys: HashSet<KeyCode>,
    /// Keys that were just pressed this frame
    just_pressed_keys: HashSet<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call at the beginning of each frame to clear per-frame state.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    /// Releases every key, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.pressed_keys.clear();
        self.just_pressed_keys.clear();
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Maps the held keys to camera controls.
    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            look_up: self.is_key_pressed(KeyCode::ArrowUp),
            look_down: self.is_key_pressed(KeyCode::ArrowDown),
            look_left: self.is_key_pressed(KeyCode::ArrowLeft),
            look_right: self.is_key_pressed(KeyCode::ArrowRight),
            forward: self.is_key_pressed(KeyCode::KeyW),
            backward: self.is_key_pressed(KeyCode::KeyS),
            strafe_left: self.is_key_pressed(KeyCode::KeyA),
            strafe_right: self.is_key_pressed(KeyCode::KeyD),
            rise: self.is_key_pressed(KeyCode::KeyE),
            sink: self.is_key_pressed(KeyCode::KeyQ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_follows_held_keys() {
        let mut input = InputState::new();
        assert!(!input.snapshot().any());

        input.on_key_pressed(KeyCode::KeyW);
        input.on_key_pressed(KeyCode::ArrowLeft);
        let snapshot = input.snapshot();
        assert!(snapshot.forward);
        assert!(snapshot.look_left);
        assert!(!snapshot.backward);

        input.on_key_released(KeyCode::KeyW);
        assert!(!input.snapshot().forward);
    }

    #[test]
    fn test_just_pressed_cleared_each_frame() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Escape);
        assert!(input.is_key_just_pressed(KeyCode::Escape));

        input.begin_frame();
        assert!(!input.is_key_just_pressed(KeyCode::Escape));
        assert!(input.is_key_pressed(KeyCode::Escape));

        // Key repeat does not count as a new press.
        input.on_key_pressed(KeyCode::Escape);
        assert!(!input.is_key_just_pressed(KeyCode::Escape));
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyE);
        input.clear();
        assert!(!input.snapshot().rise);
    }
}
