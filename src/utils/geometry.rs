use std::fmt;

/// Type-level marker for the buffer coordinate space
#[derive(Debug)]
pub struct Buffer;

/// A size as seen by a given coordinate space
///
/// In the buffer coordinate space, a size is measured in pixels of the
/// underlying buffer, before any transformation applied by the display.
#[repr(C)]
pub struct Size<N, Kind> {
    /// horizontal coordinate
    pub w: N,
    /// vertical coordinate
    pub h: N,
    _kind: std::marker::PhantomData<Kind>,
}

impl<N: Copy, Kind> Size<N, Kind> {
    /// Create a new size from its width and height
    #[inline]
    pub fn new(w: N, h: N) -> Self {
        Size {
            w,
            h,
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: fmt::Debug, S> fmt::Debug for Size<N, S> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Size")
            .field("w", &self.w)
            .field("h", &self.h)
            .finish()
    }
}

impl<N: Clone, Kind> Clone for Size<N, Kind> {
    #[inline]
    fn clone(&self) -> Self {
        Size {
            w: self.w.clone(),
            h: self.h.clone(),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Copy, Kind> Copy for Size<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Size<N, Kind> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.h == other.h
    }
}

impl<N: Eq, Kind> Eq for Size<N, Kind> {}

impl<N: Copy, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Size<N, Kind> {
        Size::new(w, h)
    }
}

/// Possible transformations to two-dimensional planes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Identity transformation (plane is unaltered when applied)
    #[default]
    Normal,
    /// Plane is rotated by 90 degrees
    _90,
    /// Plane is rotated by 180 degrees
    _180,
    /// Plane is rotated by 270 degrees
    _270,
    /// Plane is flipped vertically
    Flipped,
    /// Plane is flipped vertically and rotated by 90 degrees
    Flipped90,
    /// Plane is flipped vertically and rotated by 180 degrees
    Flipped180,
    /// Plane is flipped vertically and rotated by 270 degrees
    Flipped270,
}

impl Transform {
    /// Transformed size after applying this transformation.
    pub fn transform_size<N: Copy, Kind>(&self, size: Size<N, Kind>) -> Size<N, Kind> {
        if self.swaps_axes() {
            (size.h, size.w).into()
        } else {
            size
        }
    }

    /// Returns true if the transformation exchanges width and height
    #[inline]
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            Transform::_90 | Transform::_270 | Transform::Flipped90 | Transform::Flipped270
        )
    }
}
