//! multi-page 灰度 TIFF 超栈读取.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array4;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::TiffError;

use super::StackError;

/// 打开 TIFF 超栈错误.
#[derive(Debug)]
pub enum OpenStackError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// TIFF 解码错误.
    Tiff(TiffError),

    /// 页数不是每层通道数的整数倍. 参数为 `(页数, 每层通道数)`.
    PageCountMismatch(usize, usize),

    /// 某一页的形状与第一页不一致. 参数为 `(页索引, (行数, 列数))`.
    PageShapeMismatch(usize, (usize, usize)),

    /// 页的像素采样格式不受支持 (仅接受 8/16-bit 无符号整数与 f32).
    UnsupportedSampleFormat,

    /// 通道映射与超栈的通道数不匹配.
    Channel(StackError),
}

/// 将 multi-page 灰度 TIFF 读取为 `(z, c, x, y)` 超栈.
///
/// 页以 z 为主序、通道为次序排列, 即第 `i` 页对应
/// `(z, c) = (i / channels_per_slice, i % channels_per_slice)`.
/// 所有页的形状必须一致; 像素值原样转换为 `f32`, 不做归一化.
pub(crate) fn read_hyperstack(
    path: &Path,
    channels_per_slice: usize,
) -> Result<Array4<f32>, OpenStackError> {
    assert_ne!(channels_per_slice, 0, "每层通道数不能为零");

    let file = File::open(path).map_err(OpenStackError::Io)?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(OpenStackError::Tiff)?;

    let mut pages: Vec<Vec<f32>> = Vec::new();
    let (mut rows, mut cols) = (0usize, 0usize);
    loop {
        // dimensions() 返回 (宽, 高); 本 crate 按 (行, 列) == (x, y) 组织.
        let (w, h) = decoder.dimensions().map_err(OpenStackError::Tiff)?;
        let (h, w) = (h as usize, w as usize);
        if pages.is_empty() {
            (rows, cols) = (h, w);
        } else if (h, w) != (rows, cols) {
            return Err(OpenStackError::PageShapeMismatch(pages.len(), (h, w)));
        }

        let page = match decoder.read_image().map_err(OpenStackError::Tiff)? {
            DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::F32(v) => v,
            _ => return Err(OpenStackError::UnsupportedSampleFormat),
        };
        pages.push(page);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(OpenStackError::Tiff)?;
    }

    if pages.len() % channels_per_slice != 0 {
        return Err(OpenStackError::PageCountMismatch(
            pages.len(),
            channels_per_slice,
        ));
    }

    let z = pages.len() / channels_per_slice;
    let mut flat = Vec::with_capacity(z * channels_per_slice * rows * cols);
    for page in pages {
        flat.extend(page);
    }

    // 页展平后的总长度与形状一致, 该操作不会生成 `Err`, 可直接 unwrap.
    Ok(Array4::from_shape_vec((z, channels_per_slice, rows, cols), flat).unwrap())
}
