//! Two-dimensional text distances: a byte count paired with a row/column
//! extent. Every subtree measures both its leading padding and its own
//! content as a [`Length`].

use std::ops::{Add, AddAssign, Sub};

use text_size::TextSize;

/// A position delta expressed in rows and columns.
///
/// The column of the right-hand operand of an addition only survives if it
/// does not cross a newline; otherwise it restarts from that newline.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub const ZERO: Point = Point { row: 0, column: 0 };

    #[inline]
    pub fn new(row: u32, column: u32) -> Point {
        Point { row, column }
    }
}

impl Add for Point {
    type Output = Point;

    #[inline]
    fn add(self, rhs: Point) -> Point {
        if rhs.row > 0 {
            Point::new(self.row + rhs.row, rhs.column)
        } else {
            Point::new(self.row, self.column + rhs.column)
        }
    }
}

impl Sub for Point {
    type Output = Point;

    #[inline]
    fn sub(self, rhs: Point) -> Point {
        if self.row > rhs.row {
            Point::new(self.row - rhs.row, self.column)
        } else {
            Point::new(0, self.column.saturating_sub(rhs.column))
        }
    }
}

/// A span of text: how many bytes it covers and how far it reaches in
/// rows/columns.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Length {
    pub bytes: TextSize,
    pub extent: Point,
}

impl Length {
    pub const ZERO: Length = Length { bytes: TextSize::new(0), extent: Point::ZERO };

    #[inline]
    pub fn new(bytes: u32, extent: Point) -> Length {
        Length { bytes: TextSize::new(bytes), extent }
    }

    /// `self - other`, clamped to zero when `other` is the longer span.
    #[inline]
    pub fn saturating_sub(self, other: Length) -> Length {
        if self.bytes > other.bytes {
            self - other
        } else {
            Length::ZERO
        }
    }
}

impl Add for Length {
    type Output = Length;

    #[inline]
    fn add(self, rhs: Length) -> Length {
        Length { bytes: self.bytes + rhs.bytes, extent: self.extent + rhs.extent }
    }
}

impl AddAssign for Length {
    #[inline]
    fn add_assign(&mut self, rhs: Length) {
        *self = *self + rhs;
    }
}

impl Sub for Length {
    type Output = Length;

    #[inline]
    fn sub(self, rhs: Length) -> Length {
        Length { bytes: self.bytes - rhs.bytes, extent: self.extent - rhs.extent }
    }
}
