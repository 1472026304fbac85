//! 从三染色栈提取归一化瓦片.

use ndarray::{s, Array4, ArrayView3, Axis};

use super::TileGrid;
use crate::consts::{INTENSITY_NORM, STAIN_LEN};
use crate::{FmScan, Idx3d};

/// 从栈中提取出的一个归一化多通道子体积.
///
/// 每个通道形状为 `(1, sz, sx, sy)` (前导单通道轴), 强度已除以
/// [`INTENSITY_NORM`]. 瓦片按需创建并立即交给预测器消费, 不做持久化.
#[derive(Debug, Clone)]
pub struct Tile {
    /// 瓦片的线性索引. 仅用于诊断与顺序记录, 正确性不依赖它.
    pub index: usize,

    /// 瓦片在体素空间中的起始偏移 `(z, x, y)`. 累积时以此定位写入区域.
    pub offset: Idx3d,

    /// nephrin 通道.
    pub nephrin: Array4<f32>,

    /// WGA 通道.
    pub wga: Array4<f32>,

    /// collagen-IV 通道.
    pub collagen4: Array4<f32>,
}

impl Tile {
    /// 三个通道的引用, 顺序为 nephrin, WGA, collagen-IV.
    #[inline]
    pub fn channels(&self) -> [&Array4<f32>; STAIN_LEN] {
        [&self.nephrin, &self.wga, &self.collagen4]
    }

    /// 瓦片空间形状 `(sz, sx, sy)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let (_, sz, sx, sy) = self.nephrin.dim();
        (sz, sx, sy)
    }
}

/// 瓦片提取错误.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExtractError {
    /// 切片区域超出了栈的实际范围. 参数为 `(偏移, 瓦片尺寸, 栈形状)`.
    ///
    /// 当网格基于同一栈的形状构建时不可达, 仅作内部一致性检查.
    OutOfBounds(Idx3d, Idx3d, Idx3d),
}

/// 瓦片提取实现块.
impl FmScan {
    /// 提取网格中第 `n` 个瓦片.
    ///
    /// 三个染色通道各自在 `[offset, offset + size)` 范围内切片,
    /// 强度除以 [`INTENSITY_NORM`], 并添加前导单通道轴.
    /// `grid` 应当基于 `self.shape()` 构建; 若切片越界则返回 `Err`.
    /// 当 `n` 越界时 panic.
    pub fn tile_at(&self, grid: &TileGrid, n: usize) -> Result<Tile, ExtractError> {
        self.tile_at_offset(n, grid.offset(n), grid.geometry().size())
    }

    /// 以显式偏移和尺寸提取瓦片. [`Self::tile_at`] 的底层实现.
    fn tile_at_offset(&self, index: usize, offset: Idx3d, size: Idx3d) -> Result<Tile, ExtractError> {
        let (z, x, y) = offset;
        let (sz, sx, sy) = size;
        let shape = self.shape();
        let (lz, lx, ly) = shape;
        if z + sz > lz || x + sx > lx || y + sy > ly {
            return Err(ExtractError::OutOfBounds(offset, size, shape));
        }

        let pick = |ch: ArrayView3<'_, f32>| {
            ch.slice(s![z..z + sz, x..x + sx, y..y + sy])
                .mapv(|v| v / INTENSITY_NORM)
                .insert_axis(Axis(0))
        };

        Ok(Tile {
            index,
            offset,
            nephrin: pick(self.nephrin()),
            wga: pick(self.wga()),
            collagen4: pick(self.collagen4()),
        })
    }
}
