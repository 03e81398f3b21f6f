//! Debug names and command buffer labels.
//!
//! Both are no-ops when `VK_EXT_debug_utils` is not enabled.

use ash::vk::Handle;

use crate::api::DeviceApi;
use crate::command::CommandBuffer;

/// Gives `object` a name visible in validation messages and GPU captures.
pub fn name_object<D: DeviceApi + ?Sized, H: Handle>(device: &D, object: H, name: &str) {
    device.set_object_name(H::TYPE, object.as_raw(), name);
}

/// Label colors used by the renderer.
pub mod colors {
    pub const FRAME: [f32; 4] = [0.7, 0.7, 0.7, 1.0];
    pub const BLIT: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
    pub const PASS: [f32; 4] = [0.0, 0.0, 0.5, 1.0];
    pub const PRECOMPUTE: [f32; 4] = [0.0, 0.5, 0.0, 1.0];
    pub const UPLOAD: [f32; 4] = [0.5, 0.5, 0.0, 1.0];
}

/// Scoped command buffer label.
///
/// Opens a label on creation and closes it when dropped, so nested scopes
/// produce correctly nested labels.
#[must_use = "the label is closed as soon as the guard is dropped"]
pub struct LabelGuard<'a, D: DeviceApi> {
    command_buffer: &'a CommandBuffer<D>,
}

impl<'a, D: DeviceApi> LabelGuard<'a, D> {
    pub fn new(command_buffer: &'a CommandBuffer<D>, name: &str, color: [f32; 4]) -> Self {
        command_buffer.begin_label(name, color);
        Self { command_buffer }
    }
}

impl<D: DeviceApi> Drop for LabelGuard<'_, D> {
    fn drop(&mut self) {
        self.command_buffer.end_label();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::CommandPool;
    use crate::mock::{MockCall, MockDevice};

    #[test]
    fn test_label_guard_nests() {
        let device = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();

        {
            let _outer = LabelGuard::new(&cmd, "outer", colors::FRAME);
            let _inner = LabelGuard::new(&cmd, "inner", colors::BLIT);
        }

        assert_eq!(
            device.calls(),
            vec![
                MockCall::BeginLabel("outer".to_string()),
                MockCall::BeginLabel("inner".to_string()),
                MockCall::EndLabel,
                MockCall::EndLabel,
            ]
        );
    }
}
