//! Page metadata shared by every per-page stage.
//!
//! The split stage extracts one [`PageDescriptor`] per page and populates
//! the [`PageMetadataStore`] exactly once; every later stage reads its page's
//! entry by index. The store's mutex serialises access to the vector only.
//! It is held for a single clone or append and never across an `.await` or
//! a subprocess call, so concurrent stages contend on it only briefly.

use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Colour classification of one embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageColor {
    Gray,
    Color,
    /// Colour space could not be resolved; treated as colour.
    Unknown,
}

/// One image XObject drawn on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub width: u32,
    pub height: u32,
    /// Colour components per pixel (1 for gray/indexed/mask, 3 RGB, 4 CMYK).
    pub components: u8,
    pub bits_per_component: u8,
    pub color: ImageColor,
}

/// Geometry and image composition of one page of the repaired document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Zero-based page ordinal; the join key for every per-page artifact.
    pub index: usize,
    /// Page size in default user space units, already scaled by `user_unit`.
    pub width_pt: f64,
    pub height_pt: f64,
    /// The page's `/UserUnit` (1.0 when absent).
    #[serde(default = "default_user_unit")]
    pub user_unit: f64,
    pub images: Vec<ImageRef>,
    /// Native resolution of the page's images.
    pub xres: f64,
    pub yres: f64,
    /// Resolution the page is rasterised and OCRed at.
    pub xres_render: f64,
    pub yres_render: f64,
}

fn default_user_unit() -> f64 {
    1.0
}

impl PageDescriptor {
    pub fn width_inches(&self) -> f64 {
        self.width_pt / 72.0
    }

    pub fn height_inches(&self) -> f64 {
        self.height_pt / 72.0
    }

    /// Pixel width of the rasterised page.
    pub fn width_pixels(&self) -> u32 {
        (self.width_inches() * self.xres_render).round() as u32
    }

    /// Pixel height of the rasterised page.
    pub fn height_pixels(&self) -> u32 {
        (self.height_inches() * self.yres_render).round() as u32
    }

    /// Resolution used to map hOCR pixel coordinates back to points.
    pub fn render_dpi(&self) -> f64 {
        self.xres_render.max(self.yres_render)
    }
}

/// Process-shared, populate-once collection of page descriptors.
#[derive(Debug, Default)]
pub struct PageMetadataStore {
    inner: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    pages: Vec<PageDescriptor>,
    populated: bool,
}

impl PageMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the descriptors for every page. Callable exactly once.
    ///
    /// Each descriptor's `index` must equal its position.
    pub fn populate(&self, pages: Vec<PageDescriptor>) -> Result<(), StateError> {
        if let Some((position, page)) = pages.iter().enumerate().find(|(i, p)| p.index != *i) {
            return Err(StateError::MisorderedPage {
                position,
                index: page.index,
            });
        }
        let mut state = self.lock();
        if state.populated {
            return Err(StateError::AlreadyPopulated);
        }
        state.pages = pages;
        state.populated = true;
        Ok(())
    }

    /// A copy of the descriptor for page `index`.
    pub fn get(&self, index: usize) -> Result<PageDescriptor, StateError> {
        let state = self.lock();
        if !state.populated {
            return Err(StateError::NotPopulated { index });
        }
        state
            .pages
            .get(index)
            .cloned()
            .ok_or(StateError::PageIndexOutOfRange {
                index,
                len: state.pages.len(),
            })
    }

    /// Number of pages, or `None` before population.
    pub fn len(&self) -> Option<usize> {
        let state = self.lock();
        state.populated.then_some(state.pages.len())
    }

    pub fn is_populated(&self) -> bool {
        self.lock().populated
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        // A panic while holding the guard cannot leave a half-written entry:
        // population swaps the whole vector in one assignment.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
pub(crate) fn test_page(index: usize) -> PageDescriptor {
    PageDescriptor {
        index,
        width_pt: 612.0,
        height_pt: 792.0,
        user_unit: 1.0,
        images: vec![ImageRef {
            width: 2550,
            height: 3300,
            components: 1,
            bits_per_component: 1,
            color: ImageColor::Gray,
        }],
        xres: 300.0,
        yres: 300.0,
        xres_render: 300.0,
        yres_render: 300.0,
    }
}
