//! 重建结果的持久化存储.

use std::path::Path;

use image::ImageResult;
use ndarray::ArrayView4;
use ndarray_npy::{write_npy, WriteNpyError};

use super::FmLabel;
use crate::consts::{class, gray};

/// 使类别值更有利于单通道可视化.
#[inline]
fn pretty(label: u8) -> u8 {
    match label {
        // 背景为黑色
        class::SEG_BACKGROUND => gray::BLACK,

        // 足细胞为白色
        class::SEG_PODOCYTE => gray::WHITE,

        // 让基底膜颜色区别于足细胞
        class::SEG_MEMBRANE => gray::LIGHT_GRAY,

        any_else => panic!("只允许标签存在 0, 1, 2 类别, 但发现了 `{any_else}`"),
    }
}

/// 持久化存储实现块.
impl FmLabel {
    /// 将第 `z_index` 层水平切片以 **可视化友好** 模式保存为图片.
    ///
    /// 背景/足细胞/基底膜类别分别映射为黑色/白色/亮灰色.
    /// 不允许其他类别值, 否则程序 panic. 当 `z_index` 越界时 panic.
    pub fn save_slice_vis<P: AsRef<Path>>(&self, z_index: usize, path: P) -> ImageResult<()> {
        let sli = self.slice_at(z_index);
        let (height, width) = sli.dim();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in sli.indexed_iter() {
            buf.put_pixel(w as u32, h as u32, image::Luma([pretty(pix)]));
        }
        buf.save(path)
    }

    /// 将第 `z_index` 层水平切片以 **按原样** 模式保存为图片.
    ///
    /// 类别值直接作为灰度值写入. 当 `z_index` 越界时 panic.
    pub fn save_slice_raw<P: AsRef<Path>>(&self, z_index: usize, path: P) -> ImageResult<()> {
        let sli = self.slice_at(z_index);
        let (height, width) = sli.dim();
        let mut buf = image::GrayImage::new(width as u32, height as u32);
        for ((h, w), &pix) in sli.indexed_iter() {
            buf.put_pixel(w as u32, h as u32, image::Luma([pix]));
        }
        buf.save(path)
    }

    /// 将整个标签体积按原样保存为 `.npy` 文件.
    pub fn save_npy<P: AsRef<Path>>(&self, path: P) -> Result<(), WriteNpyError> {
        write_npy(path, &self.data())
    }
}

/// 将 `(class, z, x, y)` 分数体积按原样保存为 `.npy` 文件.
///
/// 可用于导出 [`ScoreBuffer::scores`](crate::ScoreBuffer::scores)
/// 或 [`ScoreBuffer::mean_scores`](crate::ScoreBuffer::mean_scores).
pub fn save_scores_npy<P: AsRef<Path>>(
    scores: ArrayView4<'_, f32>,
    path: P,
) -> Result<(), WriteNpyError> {
    write_npy(path, &scores)
}
