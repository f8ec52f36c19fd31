use crate::xr::{SwapchainFormat, SwapchainHandle};

/// One view's swapchain, owned by the frame driver for a single session generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSwapchain {
    pub view: usize,
    pub handle: SwapchainHandle,
    pub format: SwapchainFormat,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    /// Native image names in runtime order.
    pub images: Vec<u64>,
    pub(super) checked_out: Option<u32>,
    pub(super) waited: bool,
}

impl ViewSwapchain {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn checked_out(&self) -> Option<u32> {
        self.checked_out
    }

    pub fn image_rect(&self) -> [i32; 4] {
        [0, 0, self.width as i32, self.height as i32]
    }
}

/// Proof that a swapchain image is checked out for rendering.
///
/// Not `Clone`: the only way to give the image back is
/// [`FrameDriver::release_image`](super::FrameDriver::release_image), which
/// consumes the token.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "acquired images must be released before end_frame"]
pub struct ImageToken {
    view: usize,
    image_index: u32,
    native_image: u64,
    swapchain: SwapchainHandle,
    generation: u64,
    frame_index: u64,
}

impl ImageToken {
    pub(super) fn new(
        view: usize,
        image_index: u32,
        native_image: u64,
        swapchain: SwapchainHandle,
        generation: u64,
        frame_index: u64,
    ) -> Self {
        Self {
            view,
            image_index,
            native_image,
            swapchain,
            generation,
            frame_index,
        }
    }

    pub fn view(&self) -> usize {
        self.view
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Graphics API image name, e.g. the GL texture to bind as render target.
    pub fn native_image(&self) -> u64 {
        self.native_image
    }

    pub fn swapchain(&self) -> SwapchainHandle {
        self.swapchain
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}
