//! 从累积分数导出逐体素类别标签.

use std::cmp::Reverse;

use ndarray::{Axis, Zip};
use ordered_float::NotNan;

use super::buffer::ScoreBuffer;
use crate::FmLabel;

macro_rules! impl_finalize {
    ($fp: ty) => {
        /// 标签重建实现块.
        impl ScoreBuffer<$fp> {
            /// 对每个体素取类别轴上累积分数最大的类别, 得到标签体积.
            ///
            /// 分数相等时取较小的类别索引 (首个最大值获胜), 保证确定性.
            /// 该函数不修改缓冲; 在不继续累积的前提下重复调用, 结果一致.
            /// 重建完成后, 该体积的缓冲即视为已消费, 应当丢弃.
            ///
            /// # Panic
            ///
            /// 类别个数超出 `u8` 表示范围, 或任一分数为 NaN
            /// (预测器契约违规) 时, 程序 panic.
            pub fn finalize(&self) -> FmLabel {
                assert!(
                    self.class_len() <= usize::from(u8::MAX) + 1,
                    "类别个数超出 u8 表示范围"
                );

                let data = Zip::from(self.scores().lanes(Axis(0))).map_collect(|lane| {
                    let (class, _) = lane
                        .iter()
                        .enumerate()
                        .max_by_key(|&(class, score)| {
                            let score =
                                NotNan::<$fp>::new(*score).expect("预测分数不能为 NaN");
                            // 分数相同时 `Reverse` 使较小类别的键更大.
                            (score, Reverse(class))
                        })
                        .unwrap(); // 类别个数 >= 1, lane 非空.
                    class as u8
                });
                FmLabel::new(data)
            }
        }
    };
}

impl_finalize!(f32);
impl_finalize!(f64);
