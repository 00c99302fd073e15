//! Pointer input for tap interaction.
//!
//! [`PointerInput`] tracks the cursor and mouse buttons from raw winit
//! window events. Once per frame it is turned into an optional
//! [`PointerEvent`] through a [`ScreenProjection`], which maps the cursor
//! onto the flock's XY plane in world space.
//!
//! ```ignore
//! // in the event loop
//! pointer.handle_event(&event);
//!
//! // once per frame
//! let event = pointer.pointer_event(&projection);
//! flock.tick(dt, event)?;
//! pointer.begin_frame();
//! ```

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};
use winit::event::{ElementState, MouseButton as WinitMouseButton, WindowEvent};

use crate::steering::PointerEvent;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl From<WinitMouseButton> for MouseButton {
    fn from(btn: WinitMouseButton) -> Self {
        match btn {
            WinitMouseButton::Right => MouseButton::Right,
            WinitMouseButton::Middle => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// Cursor and tap-button state.
#[derive(Debug)]
pub struct PointerInput {
    /// Button that counts as a tap.
    tap_button: MouseButton,
    held: bool,
    pressed: bool,
    position: Option<Vec2>,
    window_size: (u32, u32),
}

impl Default for PointerInput {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerInput {
    pub fn new() -> Self {
        Self {
            tap_button: MouseButton::Left,
            held: false,
            pressed: false,
            position: None,
            window_size: (800, 600),
        }
    }

    pub fn with_tap_button(mut self, button: MouseButton) -> Self {
        self.tap_button = button;
        self
    }

    /// True if the tap button went down this frame.
    pub fn pressed(&self) -> bool {
        self.pressed
    }

    pub fn held(&self) -> bool {
        self.held
    }

    /// Cursor position in window pixels, once the cursor has been seen.
    pub fn position(&self) -> Option<Vec2> {
        self.position
    }

    /// Cursor position in normalized device coordinates (-1 to 1, Y up).
    pub fn ndc(&self) -> Option<Vec2> {
        let (w, h) = self.window_size;
        if w == 0 || h == 0 {
            return None;
        }
        self.position.map(|p| {
            Vec2::new(
                (p.x / w as f32) * 2.0 - 1.0,
                1.0 - (p.y / h as f32) * 2.0,
            )
        })
    }

    /// This frame's pointer sample, if the cursor is over the window.
    ///
    /// `tapped` is set only on the frame the tap button went down.
    pub fn pointer_event(&self, projection: &ScreenProjection) -> Option<PointerEvent> {
        let world_position = projection.unproject(self.ndc()?)?;
        Some(PointerEvent {
            world_position,
            tapped: self.pressed,
        })
    }

    /// Clear per-frame state. Call after the frame consumed its event.
    pub fn begin_frame(&mut self) {
        self.pressed = false;
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    pub fn move_to(&mut self, position: Vec2) {
        self.position = Some(position);
    }

    pub fn press(&mut self, button: MouseButton) {
        if button == self.tap_button {
            if !self.held {
                self.pressed = true;
            }
            self.held = true;
        }
    }

    pub fn release(&mut self, button: MouseButton) {
        if button == self.tap_button {
            self.held = false;
        }
    }

    /// Process a winit window event.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseInput { state, button, .. } => match state {
                ElementState::Pressed => self.press(MouseButton::from(*button)),
                ElementState::Released => self.release(MouseButton::from(*button)),
            },
            WindowEvent::CursorMoved { position, .. } => {
                self.move_to(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => {
                self.position = None;
            }
            WindowEvent::Resized(size) => self.set_window_size(size.width, size.height),
            _ => {}
        }
    }
}

/// Screen-to-world mapping onto the plane `z = plane_z`.
#[derive(Clone, Copy, Debug)]
pub struct ScreenProjection {
    inverse_view_proj: Mat4,
    plane_z: f32,
}

impl ScreenProjection {
    /// From a combined view-projection matrix.
    pub fn new(view_proj: Mat4) -> Self {
        Self {
            inverse_view_proj: view_proj.inverse(),
            plane_z: 0.0,
        }
    }

    /// Perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y_radians: f32, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let proj = Mat4::perspective_rh(fov_y_radians, aspect, 0.1, 1000.0);
        Self::new(proj * view)
    }

    pub fn with_plane_z(mut self, z: f32) -> Self {
        self.plane_z = z;
        self
    }

    /// World point under `ndc`, or `None` if the view ray misses the plane.
    pub fn unproject(&self, ndc: Vec2) -> Option<Vec3> {
        let near = self.inverse_view_proj * ndc.extend(0.0).extend(1.0);
        let far = self.inverse_view_proj * ndc.extend(1.0).extend(1.0);
        if near.w.abs() < f32::EPSILON || far.w.abs() < f32::EPSILON {
            return None;
        }
        let near = near.xyz() / near.w;
        let far = far.xyz() / far.w;

        let dir = far - near;
        if dir.z.abs() < f32::EPSILON {
            return None;
        }
        let t = (self.plane_z - near.z) / dir.z;
        if t < 0.0 {
            return None;
        }
        Some(near + dir * t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> ScreenProjection {
        ScreenProjection::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, 1.0, 800.0 / 600.0)
    }

    #[test]
    fn test_pressed_only_on_first_frame() {
        let mut input = PointerInput::new();
        input.press(MouseButton::Left);
        assert!(input.pressed());
        assert!(input.held());

        input.begin_frame();
        input.press(MouseButton::Left);
        assert!(!input.pressed());
        assert!(input.held());

        input.release(MouseButton::Left);
        input.press(MouseButton::Left);
        assert!(input.pressed());
    }

    #[test]
    fn test_other_buttons_ignored() {
        let mut input = PointerInput::new();
        input.press(MouseButton::Right);
        assert!(!input.pressed());
    }

    #[test]
    fn test_ndc() {
        let mut input = PointerInput::new();
        assert_eq!(input.ndc(), None);
        input.set_window_size(800, 600);
        input.move_to(Vec2::new(400.0, 300.0));
        let ndc = input.ndc().unwrap();
        assert!(ndc.length() < 1e-6);

        input.move_to(Vec2::new(800.0, 0.0));
        assert_eq!(input.ndc(), Some(Vec2::new(1.0, 1.0)));
    }

    #[test]
    fn test_center_unprojects_to_target() {
        let hit = camera().unproject(Vec2::ZERO).unwrap();
        assert!(hit.length() < 1e-3);
    }

    #[test]
    fn test_unproject_lands_on_plane() {
        let projection = camera().with_plane_z(2.0);
        let hit = projection.unproject(Vec2::new(0.5, -0.25)).unwrap();
        assert!((hit.z - 2.0).abs() < 1e-3);
        assert!(hit.x > 0.0 && hit.y < 0.0);
    }

    #[test]
    fn test_pointer_event_carries_tap() {
        let mut input = PointerInput::new();
        let projection = camera();
        assert_eq!(input.pointer_event(&projection), None);

        input.move_to(Vec2::new(400.0, 300.0));
        input.press(MouseButton::Left);
        let event = input.pointer_event(&projection).unwrap();
        assert!(event.tapped);
        assert!(event.world_position.length() < 1e-3);

        input.begin_frame();
        assert!(!input.pointer_event(&projection).unwrap().tapped);
    }
}
