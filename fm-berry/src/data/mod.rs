use std::ops::{Index, IndexMut};
use std::path::Path;

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::consts::STAIN_LEN;
use crate::Idx3d;

mod save;
mod tiff;

pub use save::save_scores_npy;
pub use tiff::OpenStackError;

/// 三个染色通道在原始超栈 C 轴上的索引.
///
/// 原始超栈通常包含比三个更多的通道 (如透射光或额外染色),
/// 该映射指定实际参与分割的三个通道.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelMap {
    /// nephrin 染色所在的通道索引.
    pub nephrin: usize,

    /// WGA 染色所在的通道索引.
    pub wga: usize,

    /// collagen-IV 染色所在的通道索引.
    pub collagen4: usize,
}

impl ChannelMap {
    /// 按 (nephrin, WGA, collagen-IV) 顺序构建通道映射.
    #[inline]
    pub const fn new(nephrin: usize, wga: usize, collagen4: usize) -> Self {
        Self {
            nephrin,
            wga,
            collagen4,
        }
    }

    /// 按 (nephrin, WGA, collagen-IV) 顺序返回三个索引.
    #[inline]
    pub const fn as_array(&self) -> [usize; STAIN_LEN] {
        [self.nephrin, self.wga, self.collagen4]
    }
}

/// 从原始超栈构建 [`FmScan`] 错误.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackError {
    /// 通道映射索引超出了超栈的通道范围. 参数为 `(索引, 通道总数)`.
    ChannelOutOfRange(usize, usize),
}

/// 三染色 3D 荧光显微镜栈. 强度以 `f32` 保存, 未归一化.
///
/// 构建完成后只读; 一次重建运行期间由管线独占. 三个通道的形状
/// 一致, 均为 `(z, x, y)`.
#[derive(Debug, Clone)]
pub struct FmScan {
    nephrin: Array3<f32>,
    wga: Array3<f32>,
    collagen4: Array3<f32>,
}

impl FmScan {
    /// 从 `(z, c, x, y)` 原始超栈和通道映射构建.
    ///
    /// 若任一映射索引不小于超栈的通道总数, 则返回 `Err`.
    pub fn from_hyperstack(stack: ArrayView4<f32>, map: ChannelMap) -> Result<Self, StackError> {
        let c_total = stack.len_of(Axis(1));
        for idx in map.as_array() {
            if idx >= c_total {
                return Err(StackError::ChannelOutOfRange(idx, c_total));
            }
        }

        let pick = |c: usize| stack.index_axis(Axis(1), c).to_owned();
        Ok(Self {
            nephrin: pick(map.nephrin),
            wga: pick(map.wga),
            collagen4: pick(map.collagen4),
        })
    }

    /// 从三个独立的通道体积直接构建.
    ///
    /// 三个体积形状必须一致, 否则程序 panic.
    pub fn from_channels(nephrin: Array3<f32>, wga: Array3<f32>, collagen4: Array3<f32>) -> Self {
        assert_eq!(nephrin.dim(), wga.dim(), "三个染色通道形状不一致");
        assert_eq!(nephrin.dim(), collagen4.dim(), "三个染色通道形状不一致");
        Self {
            nephrin,
            wga,
            collagen4,
        }
    }

    /// 打开 multi-page 灰度 TIFF 超栈文件. `path` 为文件的本地路径,
    /// `channels_per_slice` 为每个 z 层包含的页数 (页以 z 为主序,
    /// 通道为次序排列). 如果打开成功, 则返回 `Ok(Self)`, 否则返回 `Err`.
    pub fn open_tiff<P: AsRef<Path>>(
        path: P,
        channels_per_slice: usize,
        map: ChannelMap,
    ) -> Result<Self, OpenStackError> {
        let stack = tiff::read_hyperstack(path.as_ref(), channels_per_slice)?;
        Self::from_hyperstack(stack.view(), map).map_err(OpenStackError::Channel)
    }

    /// 获取空间形状 `(z, x, y)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.nephrin.dim()
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获取单个通道的体素个数.
    #[inline]
    pub fn size(&self) -> usize {
        let (z, x, y) = self.shape();
        z * x * y
    }

    /// nephrin 通道的不可变 shallow copy.
    #[inline]
    pub fn nephrin(&self) -> ArrayView3<'_, f32> {
        self.nephrin.view()
    }

    /// WGA 通道的不可变 shallow copy.
    #[inline]
    pub fn wga(&self) -> ArrayView3<'_, f32> {
        self.wga.view()
    }

    /// collagen-IV 通道的不可变 shallow copy.
    #[inline]
    pub fn collagen4(&self) -> ArrayView3<'_, f32> {
        self.collagen4.view()
    }

    /// 三个通道的不可变视图, 顺序为 nephrin, WGA, collagen-IV.
    #[inline]
    pub fn channels(&self) -> [ArrayView3<'_, f32>; STAIN_LEN] {
        [self.nephrin(), self.wga(), self.collagen4()]
    }
}

/// 重建得到的 3D 类别标签体积. 类别值以 `u8` 保存.
///
/// 由 [`ScoreBuffer::finalize`](crate::ScoreBuffer::finalize) 产出,
/// 形状与输入体积的空间形状一致. 只读输出, 但提供少量原位修正操作.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmLabel {
    data: Array3<u8>,
}

impl Index<Idx3d> for FmLabel {
    type Output = u8;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for FmLabel {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl FmLabel {
    /// 从裸标签数据直接创建.
    #[inline]
    pub(crate) fn new(data: Array3<u8>) -> Self {
        Self { data }
    }

    /// 获取空间形状 `(z, x, y)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取水平切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// 取出底层标签数据.
    #[inline]
    pub fn into_inner(self) -> Array3<u8> {
        self.data
    }

    /// 获取 z 空间的第 `z_index` 层水平切片视图.
    ///
    /// 当 `z_index` 越界时 panic.
    #[inline]
    pub fn slice_at(&self, z_index: usize) -> ArrayView2<'_, u8> {
        self.data.index_axis(Axis(0), z_index)
    }

    /// 获取能按升序迭代水平切片的迭代器.
    #[inline]
    pub fn slice_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, u8>> {
        self.data.axis_iter(Axis(0))
    }

    /// 获取标签体积中值为 `class` 的体素个数.
    #[inline]
    pub fn count(&self, class: u8) -> usize {
        self.data.iter().filter(|p| **p == class).count()
    }

    /// 获取标签体积的基本统计信息.
    ///
    /// 返回长度为 `class_len` 的数组, 第 `i` 项为类别 `i` 的体素数.
    /// 超出 `class_len` 范围的值不会被统计.
    pub fn class_statistics(&self, class_len: usize) -> Vec<usize> {
        let mut ans = vec![0; class_len];
        for pixel in self.data.iter().filter(|p| (**p as usize) < class_len) {
            ans[*pixel as usize] += 1;
        }
        ans
    }

    /// 将标签体积中值为 `old` 的体素全部替换为 `new`.
    ///
    /// 返回总共成功替换的个数.
    pub fn replace(&mut self, old: u8, new: u8) -> usize {
        let mut cnt = 0usize;
        self.data
            .iter_mut()
            .filter(|pix| **pix == old)
            .for_each(|p| {
                cnt += 1;
                *p = new;
            });
        cnt
    }
}
