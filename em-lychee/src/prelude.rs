//! 🍈欢迎光临🍈
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d, Scale3d};

pub use crate::data::{reflect_pad, widen_border, zoom_linear, zoom_nearest};
pub use crate::{LoadError, Volume, VolumeSet};

pub use crate::augment::{Augment, AugmentError, AugSample, Compose};

pub use crate::config::{AugParams, ConfigError, PipelineConfig, Sources};

pub use crate::dataset::{DrawError, Mode, Sample, SampleSource, Task};

pub use crate::loader::{assemble_loader, build_loader, Batch, Collate, Loader};

pub use crate::net::{NetError, PadMode, UnetConfig, UnetResidual};

pub use crate::consts::{is_background, is_foreground};
