use std::time::Instant;

use glam::Vec2;

use crate::device::Backend;
use crate::error::{BatchError, Result};
use crate::resource::Shared;
use crate::sprite::Spritesheet;

use super::pool::{InstanceId, InstancePool, PoolConfig};

/// Content of one occupied cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Tile {
    /// Absolute sheet frame.
    Frame(u32),
    /// Sheet animation, playing.
    Animated(usize),
}

/// Fixed grid of optional tiles drawn through one [`InstancePool`].
///
/// Cell `(col, row)` covers `origin + (col, row) * tile_size`, +Y down.
/// Only occupied cells own an instance.
pub struct Tilemap<B: Backend> {
    pool: InstancePool<B>,
    columns: u32,
    rows: u32,
    origin: Vec2,
    tile_size: Vec2,
    cells: Vec<Option<(InstanceId, Tile)>>,
}

impl<B: Backend> Tilemap<B> {
    /// Creates an empty `columns x rows` map with tiles the size of one sheet frame.
    pub fn new(
        backend: &B,
        sheet: Shared<Spritesheet<B>>,
        columns: u32,
        rows: u32,
        config: PoolConfig,
    ) -> Result<Self> {
        if columns == 0 || rows == 0 {
            return Err(BatchError::InvalidCapacity("tilemap dimensions must be non-zero"));
        }
        let (fw, fh) = sheet.frame_size();
        let pool = InstancePool::new(backend, sheet, config)?;

        Ok(Self {
            pool,
            columns,
            rows,
            origin: Vec2::ZERO,
            tile_size: Vec2::new(fw as f32, fh as f32),
            cells: vec![None; columns as usize * rows as usize],
        })
    }

    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    #[inline]
    pub fn tile_size(&self) -> Vec2 {
        self.tile_size
    }

    /// Number of occupied cells.
    #[inline]
    pub fn occupied(&self) -> usize {
        self.pool.len()
    }

    #[inline]
    pub fn pool(&self) -> &InstancePool<B> {
        &self.pool
    }

    /// Pool-wide settings (view projection, tint, blend). Instances are
    /// owned by the map and must not be added or removed through this.
    #[inline]
    pub fn pool_mut(&mut self) -> &mut InstancePool<B> {
        &mut self.pool
    }

    /// Moves the whole grid so its top-left corner sits at `origin`.
    pub fn set_origin(&mut self, origin: Vec2) {
        self.origin = origin;
        self.pool.transform_mut().set_position(origin);
    }

    /// Resizes every tile, repositioning the occupied ones.
    pub fn set_tile_size(&mut self, tile_size: Vec2) {
        self.tile_size = tile_size;
        for (index, cell) in self.cells.iter().enumerate() {
            if let Some((id, _)) = *cell {
                let (col, row) = (index as u32 % self.columns, index as u32 / self.columns);
                self.pool.set_position(id, cell_center(col, row, tile_size));
                self.pool.set_scale(id, tile_size);
            }
        }
    }

    #[track_caller]
    pub fn tile(&self, col: u32, row: u32) -> Option<Tile> {
        let index = self.cell_index(col, row);
        self.cells[index].map(|(_, tile)| tile)
    }

    /// Shows sheet frame `frame` in the cell.
    ///
    /// # Panics
    /// If the cell is outside the grid or the sheet has no such frame.
    #[track_caller]
    pub fn set_tile(&mut self, col: u32, row: u32, frame: u32) -> Result<()> {
        let id = self.occupy(col, row)?;
        self.pool.set_sheet_frame(id, frame);
        let index = self.cell_index(col, row);
        self.cells[index] = Some((id, Tile::Frame(frame)));
        Ok(())
    }

    /// Plays sheet animation `animation` in the cell, timed from `now`.
    #[track_caller]
    pub fn set_animated_tile(
        &mut self,
        col: u32,
        row: u32,
        animation: usize,
        now: Instant,
    ) -> Result<()> {
        let id = self.occupy(col, row)?;
        self.pool.set_animation(id, animation, now);
        let index = self.cell_index(col, row);
        self.cells[index] = Some((id, Tile::Animated(animation)));
        Ok(())
    }

    /// Empties the cell, returning what it held.
    #[track_caller]
    pub fn clear_tile(&mut self, col: u32, row: u32) -> Option<Tile> {
        let index = self.cell_index(col, row);
        let (id, tile) = self.cells[index].take()?;
        self.pool.remove_instance(id);
        Some(tile)
    }

    /// Sets every cell to `frame`.
    pub fn fill(&mut self, frame: u32) -> Result<()> {
        for row in 0..self.rows {
            for col in 0..self.columns {
                self.set_tile(col, row, frame)?;
            }
        }
        Ok(())
    }

    pub fn update(&mut self, now: Instant) -> Result<()> {
        self.pool.update(now)
    }

    pub fn draw(&mut self, target: &B::Target) -> Result<B::CommandBuffer> {
        self.pool.draw(target)
    }

    /// Instance backing the cell, creating and placing it if the cell is empty.
    #[track_caller]
    fn occupy(&mut self, col: u32, row: u32) -> Result<InstanceId> {
        let index = self.cell_index(col, row);
        if let Some((id, _)) = self.cells[index] {
            return Ok(id);
        }
        let id = self.pool.add_instance()?;
        self.pool.set_position(id, cell_center(col, row, self.tile_size));
        self.pool.set_scale(id, self.tile_size);
        Ok(id)
    }

    #[track_caller]
    fn cell_index(&self, col: u32, row: u32) -> usize {
        assert!(
            col < self.columns && row < self.rows,
            "cell ({col}, {row}) outside {}x{} tilemap",
            self.columns,
            self.rows
        );
        row as usize * self.columns as usize + col as usize
    }
}

/// Grid-local center of a cell; the origin is applied by the pool transform.
fn cell_center(col: u32, row: u32, tile_size: Vec2) -> Vec2 {
    (Vec2::new(col as f32, row as f32) + Vec2::splat(0.5)) * tile_size
}
