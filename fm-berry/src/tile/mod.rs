//! 瓦片网格: 体积到重叠子体积的确定性索引.

use itertools::izip;

use crate::Idx3d;

mod extract;

pub use extract::{ExtractError, Tile};

/// 瓦片几何: 每轴的瓦片尺寸与步长.
///
/// 步长小于尺寸意味着相邻瓦片重叠; 步长等于尺寸则恰好铺满.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileGeometry {
    size: Idx3d,
    step: Idx3d,
}

/// 初始化 [`TileGeometry`] / [`TileGrid`] 错误.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GridError {
    /// 尺寸或步长存在零分量. 参数为 `(size, step)`.
    ZeroComponent(Idx3d, Idx3d),

    /// 某一轴的步长超过了瓦片尺寸, 将在体积内部留下未覆盖空隙.
    /// 参数为 `(轴, size, step)`.
    StepExceedsSize(usize, usize, usize),

    /// 某一轴的瓦片尺寸超过了体积长度, 一个瓦片都放不下.
    /// 参数为 `(轴, 体积长度, size)`.
    TileExceedsVolume(usize, usize, usize),
}

impl TileGeometry {
    /// 构建瓦片几何.
    ///
    /// 所有分量必须为正, 且每轴 `step <= size`, 否则返回 `Err`.
    pub fn new(size: Idx3d, step: Idx3d) -> Result<Self, GridError> {
        let (sz, sx, sy) = size;
        let (pz, px, py) = step;
        if sz == 0 || sx == 0 || sy == 0 || pz == 0 || px == 0 || py == 0 {
            return Err(GridError::ZeroComponent(size, step));
        }
        for (axis, (s, p)) in [(sz, pz), (sx, px), (sy, py)].into_iter().enumerate() {
            if p > s {
                return Err(GridError::StepExceedsSize(axis, s, p));
            }
        }
        Ok(Self { size, step })
    }

    /// 每轴瓦片尺寸 `(sz, sx, sy)`.
    #[inline]
    pub const fn size(&self) -> Idx3d {
        self.size
    }

    /// 每轴步长 `(pz, px, py)`.
    #[inline]
    pub const fn step(&self) -> Idx3d {
        self.step
    }

    /// 单个瓦片的体素个数.
    #[inline]
    pub const fn tile_len(&self) -> usize {
        let (sz, sx, sy) = self.size;
        sz * sx * sy
    }
}

/// 覆盖一个体积的确定性瓦片网格.
///
/// 线性瓦片索引按行主序双射分解为三维瓦片坐标 `(tz, tx, ty)`:
/// z 轴变化最慢, x 轴变化最快. 该顺序决定了每个线性索引触碰哪些体素,
/// 缓冲写入方依赖解码与编码的往返一致性, 因此不可更改.
///
/// # 边界
///
/// 当某轴 `(len - size) % step != 0` 时, 最后一个瓦片在该轴上结束于
/// `len` 之前, 靠近远端边界的体素会获得更少 (甚至零个) 的瓦片覆盖.
/// 这是该覆盖方案的固有性质, 本类型如实保留而不做静默修补;
/// 调用方可用 [`Self::ends_flush`] 预先检测.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileGrid {
    shape: Idx3d,
    geometry: TileGeometry,
    count: Idx3d,
}

impl TileGrid {
    /// 构建覆盖空间形状为 `shape` 的体积的瓦片网格.
    ///
    /// 每轴瓦片个数为 `(len - size) / step + 1` (向下取整除法).
    /// 要求每轴 `len >= size`, 否则返回 `Err`.
    pub fn new(shape: Idx3d, geometry: TileGeometry) -> Result<Self, GridError> {
        let (z, x, y) = shape;
        let (sz, sx, sy) = geometry.size();
        for (axis, (len, s)) in [(z, sz), (x, sx), (y, sy)].into_iter().enumerate() {
            if len < s {
                return Err(GridError::TileExceedsVolume(axis, len, s));
            }
        }

        let (pz, px, py) = geometry.step();
        let count = ((z - sz) / pz + 1, (x - sx) / px + 1, (y - sy) / py + 1);
        Ok(Self {
            shape,
            geometry,
            count,
        })
    }

    /// 瓦片总个数.
    #[inline]
    pub fn len(&self) -> usize {
        let (cz, cx, cy) = self.count;
        cz * cx * cy
    }

    /// 网格是否为空. 构造成功的网格每轴至少有一个瓦片, 恒为 `false`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 每轴瓦片个数 `(cz, cx, cy)`.
    #[inline]
    pub const fn count(&self) -> Idx3d {
        self.count
    }

    /// 被覆盖体积的空间形状.
    #[inline]
    pub const fn shape(&self) -> Idx3d {
        self.shape
    }

    /// 瓦片几何.
    #[inline]
    pub const fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    /// 将线性索引分解为三维瓦片坐标 `(tz, tx, ty)`.
    ///
    /// 行主序: z 最慢, y 次之, x 最快. 当 `n` 越界时 panic.
    #[inline]
    pub fn decompose(&self, n: usize) -> Idx3d {
        assert!(n < self.len(), "线性瓦片索引 `{n}` 越界");
        let (_, cx, cy) = self.count;
        let tz = n / (cx * cy);
        let r = n % (cx * cy);
        let ty = r / cx;
        let tx = r % cx;
        (tz, tx, ty)
    }

    /// [`Self::decompose`] 的逆映射.
    ///
    /// 当任一坐标分量越界时 panic.
    #[inline]
    pub fn compose(&self, (tz, tx, ty): Idx3d) -> usize {
        let (cz, cx, cy) = self.count;
        assert!(tz < cz && tx < cx && ty < cy, "三维瓦片坐标越界");
        tz * cx * cy + ty * cx + tx
    }

    /// 线性索引 `n` 对应瓦片在体素空间中的起始偏移 `(z, x, y)`.
    ///
    /// 恒满足 `0 <= offset[axis] <= len[axis] - size[axis]`.
    /// 当 `n` 越界时 panic.
    #[inline]
    pub fn offset(&self, n: usize) -> Idx3d {
        let (tz, tx, ty) = self.decompose(n);
        let (pz, px, py) = self.geometry.step();
        (tz * pz, tx * px, ty * py)
    }

    /// 每轴最后一个瓦片是否恰好结束于体积边界.
    ///
    /// 按 `(z, x, y)` 顺序返回. 当某轴为 `false` 时, 该轴远端的
    /// 若干体素不会被任何瓦片覆盖, 在重建结果中保持零分数.
    pub fn ends_flush(&self) -> (bool, bool, bool) {
        let (z, x, y) = self.shape;
        let (sz, sx, sy) = self.geometry.size();
        let (pz, px, py) = self.geometry.step();
        let (cz, cx, cy) = self.count;

        let mut it = izip!([z, x, y], [sz, sx, sy], [pz, px, py], [cz, cx, cy])
            .map(|(len, s, p, c)| (c - 1) * p + s == len);
        // izip 固定产出 3 项.
        (it.next().unwrap(), it.next().unwrap(), it.next().unwrap())
    }

    /// 获取按线性索引升序迭代 `(线性索引, 起始偏移)` 的迭代器.
    #[inline]
    pub fn offsets(&self) -> Offsets<'_> {
        Offsets {
            grid: self,
            next: 0,
        }
    }
}

/// 按线性索引升序迭代瓦片 `(线性索引, 起始偏移)` 的迭代器.
#[derive(Clone, Debug)]
pub struct Offsets<'a> {
    grid: &'a TileGrid,
    next: usize,
}

impl Iterator for Offsets<'_> {
    type Item = (usize, Idx3d);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.grid.len() {
            return None;
        }
        let n = self.next;
        self.next += 1;
        Some((n, self.grid.offset(n)))
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.grid.len() - self.next;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for Offsets<'_> {}
