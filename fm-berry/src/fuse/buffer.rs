use std::ops::AddAssign;

use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis, Zip};
use num::Float;

use super::FuseError;
use crate::Idx3d;

/// 体素覆盖计数策略.
///
/// 决定缓冲是否额外跟踪每个体素被多少个瓦片覆盖. 注意最终标签由
/// 原始分数和决定, 对按覆盖数归一化不敏感 (同一体素的各类别分数除以
/// 同一个正数不改变 arg-max 结果); 该策略只影响
/// [`ScoreBuffer::coverage`] 与 [`ScoreBuffer::mean_scores`] 是否可用.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoveragePolicy {
    /// 只保留原始分数和.
    Sum,

    /// 额外维护覆盖计数, 以便导出按覆盖数归一化的平均分数.
    MeanNormalized,
}

/// 单次重建运行期间共享的按类别分数累积缓冲.
///
/// 形状为 `(类别数, z, x, y)`, 初始全零. 所有写入均为原位 `+=`
/// (从不覆盖), 被 `k` 个瓦片覆盖的体素保存 `k` 份贡献之和.
/// 求和即重叠瓦片间的共识投票, 前提是预测器在所有瓦片上输出
/// 同一尺度的分数 (概率单纯形或可比的 logits).
///
/// 生命周期恰好覆盖一个体积的重建; 体积之间应丢弃或重新创建.
///
/// # 边界
///
/// 若网格未与体积边界对齐 (见
/// [`TileGrid::ends_flush`](crate::TileGrid::ends_flush)),
/// 远端尾部体素不会收到任何贡献, 分数保持全零,
/// [`Self::finalize`](Self::finalize) 会将其判为类别 0.
#[derive(Debug, Clone)]
pub struct ScoreBuffer<T = f32> {
    scores: Array4<T>,
    coverage: Option<Array3<u32>>,
    tile: Idx3d,
}

impl<T: Float + AddAssign> ScoreBuffer<T> {
    /// 创建全零缓冲.
    ///
    /// `class_len` 为类别个数, `shape` 为体积空间形状, `tile` 为瓦片
    /// 尺寸 (决定每次累积的贡献形状). 所有分量必须为正, 否则程序 panic.
    pub fn new(class_len: usize, shape: Idx3d, tile: Idx3d, policy: CoveragePolicy) -> Self {
        assert_ne!(class_len, 0, "至少需要一个类别");
        let (z, x, y) = shape;
        assert_ne!(z * x * y, 0, "体积形状存在零分量");
        let (tz, tx, ty) = tile;
        assert_ne!(tz * tx * ty, 0, "瓦片尺寸存在零分量");

        let coverage = match policy {
            CoveragePolicy::Sum => None,
            CoveragePolicy::MeanNormalized => Some(Array3::zeros(shape)),
        };
        Self {
            scores: Array4::zeros((class_len, z, x, y)),
            coverage,
            tile,
        }
    }

    /// 类别个数.
    #[inline]
    pub fn class_len(&self) -> usize {
        self.scores.len_of(Axis(0))
    }

    /// 体积空间形状 `(z, x, y)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        let (_, z, x, y) = self.scores.dim();
        (z, x, y)
    }

    /// 期望的单瓦片贡献尺寸 `(tz, tx, ty)`.
    #[inline]
    pub fn tile(&self) -> Idx3d {
        self.tile
    }

    /// 原始分数和的不可变 shallow copy.
    #[inline]
    pub fn scores(&self) -> ArrayView4<'_, T> {
        self.scores.view()
    }

    /// 将一个瓦片的按类别分数贡献累积进缓冲.
    ///
    /// `contribution` 形状必须为 `(类别数, tz, tx, ty)`, `offset` 为该
    /// 瓦片的体素空间起始偏移. 写入为原位加法, 不做归一化或平均.
    /// 加法可交换且可结合, 因此贡献之间不要求任何顺序;
    /// 并发调用方只需保证互斥, 避免更新丢失.
    pub fn accumulate(
        &mut self,
        offset: Idx3d,
        contribution: ArrayView4<'_, T>,
    ) -> Result<(), FuseError> {
        let (tz, tx, ty) = self.tile;
        let expected = [self.class_len(), tz, tx, ty];
        let (gc, gz, gx, gy) = contribution.dim();
        let got = [gc, gz, gx, gy];
        if got != expected {
            return Err(FuseError::ShapeMismatch(got, expected));
        }

        let (z, x, y) = offset;
        let shape = self.shape();
        let (lz, lx, ly) = shape;
        if z + tz > lz || x + tx > lx || y + ty > ly {
            return Err(FuseError::OutOfBounds(offset, shape));
        }

        let mut region = self
            .scores
            .slice_mut(s![.., z..z + tz, x..x + tx, y..y + ty]);
        region += &contribution;

        if let Some(cov) = self.coverage.as_mut() {
            cov.slice_mut(s![z..z + tz, x..x + tx, y..y + ty])
                .mapv_inplace(|c| c + 1);
        }
        Ok(())
    }

    /// 每个体素被多少个瓦片覆盖.
    ///
    /// 仅在 [`CoveragePolicy::MeanNormalized`] 下返回 `Some`.
    #[inline]
    pub fn coverage(&self) -> Option<ArrayView3<'_, u32>> {
        self.coverage.as_ref().map(Array3::view)
    }

    /// 按覆盖数归一化的平均分数.
    ///
    /// 未被任何瓦片覆盖的体素保持 0. 仅在
    /// [`CoveragePolicy::MeanNormalized`] 下返回 `Some`.
    pub fn mean_scores(&self) -> Option<Array4<T>> {
        let cov = self.coverage.as_ref()?;
        let mut mean = self.scores.clone();
        for mut class_vol in mean.axis_iter_mut(Axis(0)) {
            Zip::from(&mut class_vol).and(cov).for_each(|v, &c| {
                if c != 0 {
                    // u32 -> 浮点不会失败, 可直接 unwrap.
                    *v = *v / T::from(c).unwrap();
                }
            });
        }
        Some(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::{CoveragePolicy, ScoreBuffer};
    use crate::fuse::FuseError;
    use crate::tile::TileGeometry;
    use crate::TileGrid;
    use ndarray::Array4;

    fn ones(class_len: usize, tile: (usize, usize, usize)) -> Array4<f32> {
        Array4::ones((class_len, tile.0, tile.1, tile.2))
    }

    #[test]
    fn test_accumulate_shape_mismatch() {
        let mut buf = ScoreBuffer::<f32>::new(3, (4, 4, 4), (2, 2, 2), CoveragePolicy::Sum);
        let bad = ones(2, (2, 2, 2));
        let err = buf.accumulate((0, 0, 0), bad.view()).unwrap_err();
        assert_eq!(err, FuseError::ShapeMismatch([2, 2, 2, 2], [3, 2, 2, 2]));
    }

    #[test]
    fn test_accumulate_out_of_bounds() {
        let mut buf = ScoreBuffer::<f32>::new(3, (4, 4, 4), (2, 2, 2), CoveragePolicy::Sum);
        let c = ones(3, (2, 2, 2));
        let err = buf.accumulate((3, 0, 0), c.view()).unwrap_err();
        assert_eq!(err, FuseError::OutOfBounds((3, 0, 0), (4, 4, 4)));
    }

    /// 4x4x4 体积被 8 个不相交瓦片铺满: 缓冲等于 8 份贡献的直接拼合.
    #[test]
    fn test_disjoint_tiling_sums() {
        let geometry = TileGeometry::new((2, 2, 2), (2, 2, 2)).unwrap();
        let grid = TileGrid::new((4, 4, 4), geometry).unwrap();

        let mut buf = ScoreBuffer::<f32>::new(2, (4, 4, 4), (2, 2, 2), CoveragePolicy::Sum);
        for (n, offset) in grid.offsets() {
            // 每个瓦片的贡献是其线性索引.
            let c = Array4::from_elem((2, 2, 2, 2), n as f32);
            buf.accumulate(offset, c.view()).unwrap();
        }

        // 无重叠: 每个体素恰好保存其所属瓦片的索引值.
        for (n, (z, x, y)) in grid.offsets() {
            assert_eq!(buf.scores()[[0, z, x, y]], n as f32);
            assert_eq!(buf.scores()[[1, z + 1, x + 1, y + 1]], n as f32);
        }
    }

    /// 5x5x5 体积, 3x3x3 瓦片, 步长 2: 重叠体素保存贡献之和.
    #[test]
    fn test_overlap_counts_and_sums() {
        let geometry = TileGeometry::new((3, 3, 3), (2, 2, 2)).unwrap();
        let grid = TileGrid::new((5, 5, 5), geometry).unwrap();

        let mut buf =
            ScoreBuffer::<f32>::new(1, (5, 5, 5), (3, 3, 3), CoveragePolicy::MeanNormalized);
        for (_, offset) in grid.offsets() {
            buf.accumulate(offset, ones(1, (3, 3, 3)).view()).unwrap();
        }

        let cov = buf.coverage().unwrap();
        assert_eq!(cov[[2, 2, 2]], 8);
        assert_eq!(cov[[0, 0, 0]], 1);
        assert_eq!(cov[[4, 4, 4]], 1);
        assert_eq!(buf.scores()[[0, 2, 2, 2]], 8.0);

        // 归一化平均分数处处为 1.
        let mean = buf.mean_scores().unwrap();
        assert!(mean.iter().all(|&v| v == 1.0));
    }

    /// 固定一组贡献, 以任意顺序累积, 缓冲逐位一致.
    #[test]
    fn test_accumulation_order_independent() {
        let geometry = TileGeometry::new((3, 3, 3), (2, 2, 2)).unwrap();
        let grid = TileGrid::new((5, 5, 5), geometry).unwrap();

        // 整数值贡献在 f32 加法下无舍入, 结果应逐位一致.
        let contributions: Vec<_> = grid
            .offsets()
            .map(|(n, offset)| (offset, Array4::from_elem((2, 3, 3, 3), (n + 1) as f32)))
            .collect();

        let run = |order: &[usize]| {
            let mut buf =
                ScoreBuffer::<f32>::new(2, (5, 5, 5), (3, 3, 3), CoveragePolicy::Sum);
            for &i in order {
                let (offset, c) = &contributions[i];
                buf.accumulate(*offset, c.view()).unwrap();
            }
            buf
        };

        let forward = run(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let backward = run(&[7, 6, 5, 4, 3, 2, 1, 0]);
        let shuffled = run(&[3, 0, 7, 1, 6, 2, 5, 4]);

        assert_eq!(forward.scores(), backward.scores());
        assert_eq!(forward.scores(), shuffled.scores());
    }

    /// 未覆盖体素在归一化结果中保持 0.
    #[test]
    fn test_mean_scores_uncovered_voxel() {
        let mut buf =
            ScoreBuffer::<f32>::new(1, (3, 3, 3), (2, 2, 2), CoveragePolicy::MeanNormalized);
        buf.accumulate((0, 0, 0), ones(1, (2, 2, 2)).view()).unwrap();

        let mean = buf.mean_scores().unwrap();
        assert_eq!(mean[[0, 0, 0, 0]], 1.0);
        assert_eq!(mean[[0, 2, 2, 2]], 0.0);
        assert_eq!(buf.coverage().unwrap()[[2, 2, 2]], 0);
    }

    #[test]
    fn test_sum_policy_has_no_coverage() {
        let buf = ScoreBuffer::<f32>::new(1, (2, 2, 2), (2, 2, 2), CoveragePolicy::Sum);
        assert!(buf.coverage().is_none());
        assert!(buf.mean_scores().is_none());
    }
}
