//! 数据集操作.
//!
//! 提供迭代器风格的超栈获取模式.

use std::path::{Path, PathBuf};

use crate::{ChannelMap, FmScan, OpenStackError};

/// 获取 `{用户主目录}/dataset` 目录.
pub fn home_dataset_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    Some(ans)
}

/// 获取 `{用户主目录}/dataset` 目录下给定继续项组成的全路径.
pub fn home_dataset_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("dataset");
    ans.extend(it);
    Some(ans)
}

/// 文件名构造器. 接受数据集索引数, 获得文件名.
pub type FilenameBuilder = fn(u32) -> String;

/// 从指定索引、路径、文件名构造器来创建通用的 TIFF 超栈加载器.
///
/// `channels_per_slice` 和 `map` 的含义见
/// [`FmScan::open_tiff`].
///
/// # 注意
///
/// 1. `path` 必须是目录, 否则程序 panic.
/// 2. `data` 的所有取值 `value` 必须在 `path` 下有形如 `builder(value)`
///   的 TIFF 文件, 否则加载器在迭代时会返回 `Result::Error`.
pub fn stack_loader<I: IntoIterator<Item = u32>, P: AsRef<Path>>(
    data: I,
    path: P,
    builder: FilenameBuilder,
    channels_per_slice: usize,
    map: ChannelMap,
) -> StackLoader {
    let path = path.as_ref().to_owned();
    assert!(path.is_dir());

    let mut data: Vec<u32> = data.into_iter().collect();
    data.reverse();

    StackLoader {
        path,
        data_rev: data,
        builder,
        channels_per_slice,
        map,
    }
}

/// 3D 荧光超栈数据加载器, 并在内部自动转换文件名.
#[derive(Debug)]
pub struct StackLoader {
    path: PathBuf,
    data_rev: Vec<u32>,
    builder: FilenameBuilder,
    channels_per_slice: usize,
    map: ChannelMap,
}

impl Iterator for StackLoader {
    type Item = (u32, Result<FmScan, OpenStackError>);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.data_rev.pop()?;

        self.path.push((self.builder)(idx));
        let data = FmScan::open_tiff(self.path.as_path(), self.channels_per_slice, self.map);
        self.path.pop();

        Some((idx, data))
    }
}

impl ExactSizeIterator for StackLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}
