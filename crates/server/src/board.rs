//! Board geometry, dot placement and cell occupancy.

use fixedbitset::FixedBitSet;
use protocol::Point;
use rand::Rng;

/// One game board.
#[derive(Debug, Clone)]
pub struct Board {
    pub id: String,
    pub cols: u32,
    pub rows: u32,
    /// Set once by `start`, never cleared.
    pub started: bool,
    /// `None` before start, or when every cell is occupied.
    pub dot: Option<Point>,
}

impl Board {
    pub fn new(id: impl Into<String>, cols: u32, rows: u32) -> Self {
        Self {
            id: id.into(),
            cols,
            rows,
            started: false,
            dot: None,
        }
    }

    /// `[cols, rows]` as sent to clients.
    pub fn size(&self) -> [u32; 2] {
        [self.cols, self.rows]
    }

    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Whether `p` lies in `[0, cols) x [0, rows)`.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as u32) < self.cols && (p.y as u32) < self.rows
    }

    /// Empty occupancy grid sized for this board.
    pub fn occupancy(&self) -> Occupancy {
        Occupancy {
            bits: FixedBitSet::with_capacity(self.cell_count()),
            cols: self.cols,
            rows: self.rows,
        }
    }
}

/// Bitset of occupied cells.
#[derive(Debug, Clone)]
pub struct Occupancy {
    bits: FixedBitSet,
    cols: u32,
    rows: u32,
}

impl Occupancy {
    fn index(&self, p: Point) -> Option<usize> {
        if p.x < 0 || p.y < 0 || p.x as u32 >= self.cols || p.y as u32 >= self.rows {
            return None;
        }
        Some(p.y as usize * self.cols as usize + p.x as usize)
    }

    fn point(&self, index: usize) -> Point {
        let cols = self.cols as usize;
        Point::new((index % cols) as i32, (index / cols) as i32)
    }

    /// Mark a cell occupied. Out-of-bounds points are ignored.
    pub fn insert(&mut self, p: Point) {
        if let Some(i) = self.index(p) {
            self.bits.insert(i);
        }
    }

    pub fn extend<'a>(&mut self, points: impl IntoIterator<Item = &'a Point>) {
        for p in points {
            self.insert(*p);
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.index(p).is_some_and(|i| self.bits.contains(i))
    }

    pub fn free_count(&self) -> usize {
        self.bits.len() - self.bits.count_ones(..)
    }

    /// Pick a uniformly random free cell.
    pub fn random_free(&self, rng: &mut impl Rng) -> Option<Point> {
        let free = self.free_count();
        if free == 0 {
            return None;
        }
        let nth = rng.random_range(0..free);
        self.bits.zeroes().nth(nth).map(|i| self.point(i))
    }
}
