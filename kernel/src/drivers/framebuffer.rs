//! Linear framebuffer descriptor, as handed to the `drm` syscall.
//!
//! The boot blob's framebuffer tag (see C6 glossary entry) gives the
//! physical base, dimensions, and bits-per-pixel of a linear framebuffer
//! when the bootloader placed the display in graphics mode; [`init`]
//! records it once, at boot, for [`info`] to hand back to `drm`.

use spin::Once;

#[derive(Debug, Clone, Copy)]
pub struct FramebufferInfo {
    pub phys_addr: u64,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
}

impl FramebufferInfo {
    pub fn size_bytes(&self) -> usize {
        self.width as usize * self.height as usize * (self.bpp as usize).div_ceil(8)
    }
}

static FRAMEBUFFER: Once<FramebufferInfo> = Once::new();

/// Record the boot-time framebuffer. Idempotent: a second call is ignored,
/// since there is exactly one display to describe.
pub fn init(fb: FramebufferInfo) {
    FRAMEBUFFER.call_once(|| fb);
}

/// The boot-time framebuffer, if the bootloader handed us one.
pub fn info() -> Option<FramebufferInfo> {
    FRAMEBUFFER.get().copied()
}
