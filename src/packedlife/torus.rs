//! Index normalization on the torus.

/// Grid extent used to wrap linear indices and coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Torus {
    width: usize,
    height: usize,
}

impl Torus {
    pub fn new(width: usize, height: usize) -> Self {
        debug_assert!(width > 0 && height > 0);
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Wrap a possibly out-of-range linear index into `[0, width*height)`.
    ///
    /// The column is taken modulo `width` and the row modulo `height`, so
    /// `-1` lands on the last cell of the last row.
    #[inline]
    pub fn normalize(&self, index: i64) -> usize {
        let w = self.width as i64;
        let x = index.rem_euclid(w);
        let y = index.div_euclid(w);
        self.to_index(x, y)
    }

    /// Canonical `(x, y)` for a linear index (wrapping first).
    #[inline]
    pub fn to_coord(&self, index: i64) -> (usize, usize) {
        let index = self.normalize(index);
        (index % self.width, index / self.width)
    }

    /// Linear index for a possibly out-of-range coordinate.
    #[inline]
    pub fn to_index(&self, x: i64, y: i64) -> usize {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.rem_euclid(self.height as i64) as usize;
        y * self.width + x
    }
}
