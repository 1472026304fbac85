//! 合成模体上的端到端瓦片化重建冒烟管线.
//!
//! 构建一个已知真值的三染色模体, 用阈值预测器走完
//! "枚举 -> 提取 -> 预测 -> 累积 -> 重建" 全流程,
//! 校验顺序与并行两条路径的结果一致, 并打印类别统计.
//! 如果本地存在数据集目录, 会顺带对真实超栈跑一遍重建.

use std::ops::Range;
use std::thread;

use fm_berry::prelude::*;
use ndarray::{Array3, Array4};

/// 模体空间形状.
const SHAPE: Idx3d = (12, 16, 16);

/// 足细胞区块 (nephrin 高亮) 的三轴范围.
const PODO_BLOCK: [Range<usize>; 3] = [2..6, 2..8, 2..8];

/// 基底膜区块 (collagen-IV 高亮) 的三轴范围.
const MEMB_BLOCK: [Range<usize>; 3] = [6..10, 8..14, 8..14];

fn in_block(block: &[Range<usize>; 3], (z, x, y): Idx3d) -> bool {
    block[0].contains(&z) && block[1].contains(&x) && block[2].contains(&y)
}

/// 构建已知真值的三染色模体: 两个不相交的高亮区块, 其余为暗背景.
fn build_phantom() -> FmScan {
    let nephrin = Array3::from_shape_fn(SHAPE, |pos| {
        if in_block(&PODO_BLOCK, pos) {
            200.0
        } else {
            10.0
        }
    });
    let collagen4 = Array3::from_shape_fn(SHAPE, |pos| {
        if in_block(&MEMB_BLOCK, pos) {
            180.0
        } else {
            10.0
        }
    });
    let wga = Array3::from_elem(SHAPE, 30.0);
    FmScan::from_channels(nephrin, wga, collagen4)
}

/// 阈值预测器: 以归一化染色强度为前景类别分数, 常数 0.4 为背景分数.
fn threshold_predictor(tile: &Tile) -> Array4<f32> {
    let (sz, sx, sy) = tile.shape();
    Array4::from_shape_fn((DEFAULT_CLASS_LEN, sz, sx, sy), |(c, z, x, y)| match c as u8 {
        SEG_BACKGROUND => 0.4,
        SEG_PODOCYTE => tile.nephrin[[0, z, x, y]],
        SEG_MEMBRANE => tile.collagen4[[0, z, x, y]],
        _ => unreachable!(),
    })
}

/// 在模体上分别跑顺序与并行重建并校验一致性.
fn run_phantom() -> FmLabel {
    let scan = build_phantom();
    let geometry = TileGeometry::new((4, 4, 4), (2, 2, 2)).expect("模体瓦片几何非法");
    let grid = TileGrid::new(scan.shape(), geometry).expect("模体网格构建失败");

    println!(
        "phantom: shape {:?}, {} tiles {:?}, flush {:?}",
        grid.shape(),
        grid.len(),
        grid.count(),
        grid.ends_flush()
    );

    let (seq, par) = thread::scope(|s| {
        let seq = s.spawn(|| {
            reconstruct(
                &scan,
                &grid,
                &threshold_predictor,
                DEFAULT_CLASS_LEN,
                CoveragePolicy::MeanNormalized,
            )
        });
        let par = s.spawn(|| {
            par_reconstruct(
                &scan,
                &grid,
                &threshold_predictor,
                DEFAULT_CLASS_LEN,
                CoveragePolicy::Sum,
            )
        });
        (
            seq.join().expect("Thread joining error"),
            par.join().expect("Thread joining error"),
        )
    });

    let seq = seq.expect("顺序重建失败");
    let par = par.expect("并行重建失败");
    assert_eq!(seq, par, "顺序与并行重建结果不一致");

    // 两个区块应当整块命中, 其余为背景.
    let block_len = |b: &[Range<usize>; 3]| b.iter().map(|r| r.len()).product::<usize>();
    let stats = seq.class_statistics(DEFAULT_CLASS_LEN);
    println!("phantom statistics [bg, podocyte, membrane]: {stats:?}");
    assert_eq!(stats[SEG_PODOCYTE as usize], block_len(&PODO_BLOCK));
    assert_eq!(stats[SEG_MEMBRANE as usize], block_len(&MEMB_BLOCK));

    seq
}

/// 如果本地存在 `{home}/dataset/fm-stacks`, 对其中第一个超栈跑一遍重建.
fn run_local_dataset() {
    let Some(dir) = home_dataset_dir_with(["fm-stacks"]) else {
        return;
    };
    if !dir.is_dir() {
        println!("dataset dir {} not found, skipped", dir.display());
        return;
    }

    let loader = stack_loader(
        0..1,
        &dir,
        |i| format!("stack_{i:02}.tif"),
        4,
        ChannelMap::new(0, 1, 2),
    );
    for (idx, stack) in loader {
        let scan = match stack {
            Ok(scan) => scan,
            Err(e) => {
                println!("stack {idx}: open error: {e:?}");
                continue;
            }
        };

        let geometry = TileGeometry::new((8, 64, 64), (4, 32, 32)).expect("瓦片几何非法");
        let grid = match TileGrid::new(scan.shape(), geometry) {
            Ok(grid) => grid,
            Err(e) => {
                println!("stack {idx}: grid error: {e:?}");
                continue;
            }
        };

        match par_reconstruct(
            &scan,
            &grid,
            &threshold_predictor,
            DEFAULT_CLASS_LEN,
            CoveragePolicy::Sum,
        ) {
            Ok(label) => println!(
                "stack {idx}: statistics {:?}",
                label.class_statistics(DEFAULT_CLASS_LEN)
            ),
            Err(e) => println!("stack {idx}: reconstruction error: {e:?}"),
        }
    }
}

fn main() {
    println!("Running phantom reconstruction smoke pipeline...");
    run_phantom();
    run_local_dataset();
    println!("Done.");
}
