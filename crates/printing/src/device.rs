use std::ops::{Deref, DerefMut};

use crate::metafile::{Metafile, Point};
use crate::platform::BackendError;

/// Affine transform limited to uniform scale plus translation, which is all
/// the page renderer needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: f32,
    pub dx: f32,
    pub dy: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        scale: 1.0,
        dx: 0.0,
        dy: 0.0,
    };

    pub fn apply(&self, point: Point) -> Point {
        Point {
            x: point.x * self.scale + self.dx,
            y: point.y * self.scale + self.dy,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Drawable target handed out by a native backend while a page is open.
pub trait DeviceContext {
    /// Pushes the current graphics state and returns the new stack depth.
    fn save(&mut self) -> usize;
    /// Pops states until the stack is back at `depth - 1`.
    fn restore(&mut self, depth: usize);
    fn set_transform(&mut self, transform: Transform);
    fn reset_transform(&mut self) {
        self.set_transform(Transform::IDENTITY);
    }
    fn play_metafile(&mut self, metafile: &Metafile) -> Result<(), BackendError>;
    fn draw_text(&mut self, text: &str, origin: Point, font_size: f32) -> Result<(), BackendError>;
}

/// Saved graphics state, restored when dropped.
pub struct SavedState<'a> {
    context: &'a mut (dyn DeviceContext + 'a),
    depth: usize,
}

impl<'a> SavedState<'a> {
    pub fn new(context: &'a mut (dyn DeviceContext + 'a)) -> Self {
        let depth = context.save();
        Self { context, depth }
    }
}

impl<'a> Deref for SavedState<'a> {
    type Target = dyn DeviceContext + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.context
    }
}

impl<'a> DerefMut for SavedState<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.context
    }
}

impl Drop for SavedState<'_> {
    fn drop(&mut self) {
        self.context.restore(self.depth);
    }
}
