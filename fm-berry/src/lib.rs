#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供 3D 荧光显微镜三染色 (nephrin / WGA / collagen-IV)
//! 超栈的瓦片化语义分割重建: 瓦片网格索引、子体积提取与归一化、
//! 重叠分数累积, 以及逐体素 arg-max 标签重建.
//!
//! 体积太大, 无法一次性分类, 因此用确定性的重叠瓦片网格覆盖它;
//! 每个瓦片由外部预测器独立打分, 分数按瓦片偏移累积回全尺寸缓冲,
//! 最后对类别轴取 arg-max 得到最终标签体积.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 体积一律按照 `(z, x, y)` 体素顺序访问, 其中 x 对应页面行方向,
//!   y 对应页面列方向; 分数缓冲为 `(class, z, x, y)`.
//! 2. 预测器是注入的能力. 本 crate 不关心其内部, 只要求其输出形状
//!   和分数尺度满足 [`TilePredictor`] 的契约.
//! 3. 在非期望情况下 (如 NaN 分数), 程序会直接 panic, 而不会导致内存错误.
//!   As what Rust promises.
//!
//! # 开发计划
//!
//! ### 瓦片网格索引 ✅
//!
//! 线性索引到三维偏移的双射分解, z 轴最慢, x 轴最快.
//! 边界不对齐时保留远端欠覆盖 (见 [`TileGrid::ends_flush`]).
//!
//! 实现位于 `fm-berry/src/tile`.
//!
//! ### 瓦片提取与归一化 ✅
//!
//! 三染色通道各自切出 `(1, sz, sx, sy)` 子体积, 强度除以 255.
//!
//! 实现位于 `fm-berry/src/tile/extract.rs`.
//!
//! ### 重叠分数累积 ✅
//!
//! 全体积 `(class, z, x, y)` 缓冲上的原位 `+=`, 可选覆盖计数.
//!
//! 实现位于 `fm-berry/src/fuse/buffer.rs`.
//!
//! ### arg-max 标签重建 ✅
//!
//! 逐体素稳定 arg-max, 分数相同取较小类别.
//!
//! 实现位于 `fm-berry/src/fuse/argmax.rs`.
//!
//! ### 顺序 / 并行重建管线 ✅
//!
//! 提取和预测可并行, 累积是唯一的串行化点.
//!
//! 实现位于 `fm-berry/src/fuse/pipeline.rs`.
//!
//! ### TIFF 超栈读取 ✅
//!
//! multi-page 灰度 TIFF, 页以 z 为主序、通道为次序.
//!
//! 实现位于 `fm-berry/src/data/tiff.rs`.
//!
//! ### 结果持久化 ✅
//!
//! 标签切片的灰度可视化图片与 `.npy` 体积导出.
//!
//! 实现位于 `fm-berry/src/data/save.rs`.
//!
//! ### 完善代码文档 ✅
//!
//! 给每个 public API 提供文档, 并视情况给 private API 提供文档.

/// 三维索引, 同时也可一定程度上用作非负整数向量.
pub type Idx3d = (usize, usize, usize);

/// 3D 荧光栈基础数据结构.
mod data;

pub use data::{
    save_scores_npy, ChannelMap, FmLabel, FmScan, OpenStackError, StackError,
};

pub mod consts;

pub mod dataset;

pub mod fuse;

pub mod tile;

pub mod prelude;

pub use fuse::{CoveragePolicy, FuseError, PipelineError, ScoreBuffer, TilePredictor};
pub use tile::{ExtractError, GridError, Tile, TileGeometry, TileGrid};
