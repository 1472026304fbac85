//! 端到端重建驱动: 枚举 -> 提取 -> 预测 -> 累积 -> 重建.

use ndarray::Array4;

use super::buffer::{CoveragePolicy, ScoreBuffer};
use crate::tile::{ExtractError, Tile, TileGrid};
use crate::{FmLabel, FmScan, FuseError, Idx3d};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use std::sync::Mutex;
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 对固定形状瓦片打分的外部预测器.
///
/// 预测器是注入的能力: 本 crate 不关心其内部执行模型 (可能很慢,
/// 可能在进程外), 只要求对给定瓦片返回形状恰为
/// `(类别数, sz, sx, sy)` 的分数张量, 且所有瓦片的分数在同一尺度上
/// 可比 (概率单纯形或可比的 logits), 求和投票才有意义.
pub trait TilePredictor {
    /// 对一个瓦片打分, 返回 `(类别数, sz, sx, sy)` 分数张量.
    fn predict(&self, tile: &Tile) -> Array4<f32>;
}

impl<F> TilePredictor for F
where
    F: Fn(&Tile) -> Array4<f32>,
{
    #[inline]
    fn predict(&self, tile: &Tile) -> Array4<f32> {
        self(tile)
    }
}

/// 重建单个体积过程中的错误.
///
/// 任何一个瓦片出错都会中止当前体积的重建, 而不是静默跳过:
/// 缺失或畸形的瓦片会直接破坏重建结果. 变体携带出错瓦片的
/// 定位信息以便诊断.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PipelineError {
    /// 提取某个瓦片失败. 参数为 `(线性索引, 底层错误)`.
    Extract(usize, ExtractError),

    /// 累积某个瓦片的贡献失败. 参数为 `(线性索引, 偏移, 底层错误)`.
    Fuse(usize, Idx3d, FuseError),
}

/// 顺序累积: 依线性索引逐瓦片提取、预测并累积, 返回完整缓冲.
///
/// `grid` 必须基于 `scan.shape()` 构建. 遇到第一个错误即返回,
/// 该体积的缓冲随之丢弃.
pub fn accumulate_all<P: TilePredictor>(
    scan: &FmScan,
    grid: &TileGrid,
    predictor: &P,
    class_len: usize,
    policy: CoveragePolicy,
) -> Result<ScoreBuffer, PipelineError> {
    let mut buffer = ScoreBuffer::new(class_len, grid.shape(), grid.geometry().size(), policy);
    for (n, offset) in grid.offsets() {
        let tile = scan
            .tile_at(grid, n)
            .map_err(|e| PipelineError::Extract(n, e))?;
        let contribution = predictor.predict(&tile);
        buffer
            .accumulate(offset, contribution.view())
            .map_err(|e| PipelineError::Fuse(n, offset, e))?;
    }
    Ok(buffer)
}

/// 顺序重建: [`accumulate_all`] 后对缓冲做 arg-max, 输出标签体积.
#[inline]
pub fn reconstruct<P: TilePredictor>(
    scan: &FmScan,
    grid: &TileGrid,
    predictor: &P,
    class_len: usize,
    policy: CoveragePolicy,
) -> Result<FmLabel, PipelineError> {
    accumulate_all(scan, grid, predictor, class_len, policy).map(|buf| buf.finalize())
}

/// 并发部分.
#[cfg(feature = "rayon")]
mod par {
    use super::*;

    /// 借助 `rayon` 并行累积: 提取与预测在瓦片间并行展开.
    ///
    /// 累积是唯一的串行化点: 缓冲以互斥锁保护, 每个瓦片的 `+=`
    /// 互斥执行. 加法可交换, 瓦片完成顺序不影响结果,
    /// 互斥仅用于避免更新丢失. 遇到错误时中止整个体积的重建.
    pub fn par_accumulate_all<P>(
        scan: &FmScan,
        grid: &TileGrid,
        predictor: &P,
        class_len: usize,
        policy: CoveragePolicy,
    ) -> Result<ScoreBuffer, PipelineError>
    where
        P: TilePredictor + Sync,
    {
        let buffer = Mutex::new(ScoreBuffer::new(
            class_len,
            grid.shape(),
            grid.geometry().size(),
            policy,
        ));

        (0..grid.len()).into_par_iter().try_for_each(|n| {
            let offset = grid.offset(n);
            let tile = scan
                .tile_at(grid, n)
                .map_err(|e| PipelineError::Extract(n, e))?;
            let contribution = predictor.predict(&tile);

            let mut buffer = buffer.lock().unwrap();
            buffer
                .accumulate(offset, contribution.view())
                .map_err(|e| PipelineError::Fuse(n, offset, e))
        })?;

        Ok(buffer.into_inner().unwrap())
    }

    /// 借助 `rayon` 并行重建: [`par_accumulate_all`] 后对缓冲做 arg-max.
    #[inline]
    pub fn par_reconstruct<P>(
        scan: &FmScan,
        grid: &TileGrid,
        predictor: &P,
        class_len: usize,
        policy: CoveragePolicy,
    ) -> Result<FmLabel, PipelineError>
    where
        P: TilePredictor + Sync,
    {
        par_accumulate_all(scan, grid, predictor, class_len, policy).map(|buf| buf.finalize())
    }
}

#[cfg(feature = "rayon")]
pub use par::{par_accumulate_all, par_reconstruct};

#[cfg(test)]
mod tests {
    use super::{accumulate_all, reconstruct, PipelineError};
    use crate::consts::class::{SEG_BACKGROUND, SEG_PODOCYTE};
    use crate::fuse::{CoveragePolicy, FuseError};
    use crate::tile::{ExtractError, Tile, TileGeometry, TileGrid};
    use crate::FmScan;
    use ndarray::{Array3, Array4};
    use std::sync::mpsc;
    use threadpool::ThreadPool;

    /// nephrin 通道对半分亮暗的 4x4x4 栈: z < 2 暗, z >= 2 亮.
    fn split_scan() -> FmScan {
        let nephrin =
            Array3::from_shape_fn((4, 4, 4), |(z, _, _)| if z < 2 { 0.0 } else { 255.0 });
        let dark = Array3::zeros((4, 4, 4));
        FmScan::from_channels(nephrin, dark.clone(), dark)
    }

    fn split_grid(scan: &FmScan) -> TileGrid {
        let geometry = TileGeometry::new((2, 2, 2), (2, 2, 2)).unwrap();
        TileGrid::new(scan.shape(), geometry).unwrap()
    }

    /// 以归一化 nephrin 强度为足细胞分数、0.5 为背景分数的阈值预测器.
    fn threshold_predict(tile: &Tile) -> Array4<f32> {
        let (sz, sx, sy) = tile.shape();
        Array4::from_shape_fn((2, sz, sx, sy), |(c, z, x, y)| match c {
            0 => 0.5,
            _ => tile.nephrin[[0, z, x, y]],
        })
    }

    #[test]
    fn test_reconstruct_threshold_phantom() {
        let scan = split_scan();
        let grid = split_grid(&scan);

        let label =
            reconstruct(&scan, &grid, &threshold_predict, 2, CoveragePolicy::Sum).unwrap();
        assert_eq!(label.shape(), (4, 4, 4));

        // 暗半判为背景, 亮半判为足细胞.
        for ((z, _, _), &c) in label.data().indexed_iter() {
            if z < 2 {
                assert_eq!(c, SEG_BACKGROUND);
            } else {
                assert_eq!(c, SEG_PODOCYTE);
            }
        }
        assert_eq!(label.count(SEG_BACKGROUND), 32);
        assert_eq!(label.count(SEG_PODOCYTE), 32);
    }

    #[test]
    fn test_extract_error_carries_tile_index() {
        let scan = split_scan();
        // 网格基于更大的形状构建, 第 0 个瓦片即越界.
        let geometry = TileGeometry::new((5, 5, 5), (1, 1, 1)).unwrap();
        let grid = TileGrid::new((6, 6, 6), geometry).unwrap();

        let err =
            reconstruct(&scan, &grid, &threshold_predict, 2, CoveragePolicy::Sum).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Extract(0, ExtractError::OutOfBounds((0, 0, 0), (5, 5, 5), (4, 4, 4)))
        );
    }

    #[test]
    fn test_predictor_contract_violation_surfaces() {
        let scan = split_scan();
        let grid = split_grid(&scan);

        // 预测器返回了错误的类别数.
        let bad = |tile: &Tile| {
            let (sz, sx, sy) = tile.shape();
            Array4::<f32>::zeros((4, sz, sx, sy))
        };
        let err = reconstruct(&scan, &grid, &bad, 2, CoveragePolicy::Sum).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Fuse(
                0,
                (0, 0, 0),
                FuseError::ShapeMismatch([4, 2, 2, 2], [2, 2, 2, 2])
            )
        );
    }

    /// 单写者模式: 工作线程并行提取 + 预测, 贡献经通道汇入唯一的
    /// 累积线程, 结果与顺序累积逐位一致.
    #[test]
    fn test_single_writer_accumulation_matches_sequential() {
        let scan = split_scan();
        let grid = split_grid(&scan);

        let sequential =
            accumulate_all(&scan, &grid, &threshold_predict, 2, CoveragePolicy::Sum).unwrap();

        let workers = std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from);
        let pool = ThreadPool::new(workers.max(2));
        let (tx, rx) = mpsc::channel();
        for (n, offset) in grid.offsets() {
            let tx = tx.clone();
            let scan = scan.clone();
            let grid = grid.clone();
            pool.execute(move || {
                let tile = scan.tile_at(&grid, n).unwrap();
                tx.send((offset, threshold_predict(&tile))).unwrap();
            });
        }
        drop(tx);

        // 唯一的写者: 按到达顺序 (任意) 依次累积.
        let mut funneled = crate::ScoreBuffer::<f32>::new(
            2,
            grid.shape(),
            grid.geometry().size(),
            CoveragePolicy::Sum,
        );
        for (offset, contribution) in rx {
            funneled.accumulate(offset, contribution.view()).unwrap();
        }

        assert_eq!(sequential.scores(), funneled.scores());
    }

    /// 并行重建与顺序重建结果一致.
    #[cfg(feature = "rayon")]
    #[test]
    fn test_par_reconstruct_matches_sequential() {
        use super::par_reconstruct;

        let scan = split_scan();
        let grid = split_grid(&scan);

        let seq =
            reconstruct(&scan, &grid, &threshold_predict, 2, CoveragePolicy::Sum).unwrap();
        let par = par_reconstruct(&scan, &grid, &threshold_predict, 2, CoveragePolicy::Sum)
            .unwrap();
        assert_eq!(seq, par);
    }
}
