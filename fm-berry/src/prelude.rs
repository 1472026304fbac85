//! 🫐欢迎光临🍇
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::Idx3d;

pub use crate::data::{ChannelMap, FmLabel, FmScan};

pub use crate::tile::{Tile, TileGeometry, TileGrid};

pub use crate::fuse::{
    accumulate_all, reconstruct, CoveragePolicy, ScoreBuffer, TilePredictor,
};

#[cfg(feature = "rayon")]
pub use crate::fuse::{par_accumulate_all, par_reconstruct};

pub use crate::consts::class::{SEG_BACKGROUND, SEG_MEMBRANE, SEG_PODOCYTE};
pub use crate::consts::{DEFAULT_CLASS_LEN, INTENSITY_NORM, STAIN_LEN};

pub use crate::dataset::{self, home_dataset_dir_with, stack_loader};
