//! 装配层: 任务分发、worker pool 预取与批组装.
//!
//! worker 以只读共享方式访问体数据组, 各自独立抽样并经有界队列
//! 汇入消费端; 消费端按样本索引重排, 保证测试模式的确定性遍历顺序.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use either::Either;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::augment::Compose;
use crate::config::{ConfigError, PipelineConfig};
use crate::data::{LoadError, VolumeSet};
use crate::dataset::{make_source, DrawError, Mode, Sample, SampleSource, Task};

mod collate;

pub use collate::{Batch, Collate, SkeletonCollate, StackCollate, TestCollate};

/// 从配置加载体数据并装配数据加载器.
pub fn build_loader(cfg: &PipelineConfig, mode: Mode) -> Result<Loader, LoadError> {
    let volumes = VolumeSet::load(cfg, mode == Mode::Train)?;
    assemble_loader(cfg, mode, volumes).map_err(LoadError::Config)
}

/// 用已加载的体数据组装配数据加载器.
///
/// 按任务码选择样本生产者与批拼接策略, 训练模式下构建增广链并
/// 采用协商后的抽样尺寸. 所有配置类错误在此集中暴露.
pub fn assemble_loader(
    cfg: &PipelineConfig,
    mode: Mode,
    volumes: VolumeSet,
) -> Result<Loader, ConfigError> {
    cfg.validate()?;
    let task = Task::from_code(cfg.task)?;
    info!("task: {} (code {})", task.name(), task.code());
    info!("mode: {mode:?}");

    let (augmentor, request) = match mode {
        Mode::Train if cfg.augment => {
            let aug = Compose::default_chain(&cfg.aug, cfg.sample_size);
            info!("sample size negotiated: {:?}", aug.sample_size());
            (Some(aug), cfg.sample_size)
        }
        Mode::Train => (None, cfg.sample_size),
        Mode::Test => (None, cfg.test_size),
    };
    info!("data augmentation: {}", augmentor.is_some());
    info!("batch size: {}", cfg.batch_size);

    let source = make_source(
        task,
        Arc::new(volumes),
        request,
        cfg.test_stride,
        augmentor,
        mode,
        cfg.min_foreground,
    )?;

    let collate: Box<dyn Collate> = match (mode, task) {
        (Mode::Test, _) => Box::new(TestCollate),
        (Mode::Train, Task::MitoSkeleton) => Box::new(SkeletonCollate),
        (Mode::Train, _) => Box::new(StackCollate),
    };

    Ok(Loader::new(
        Arc::from(source),
        collate,
        cfg.batch_size,
        cfg.effective_workers(),
        cfg.seed,
    ))
}

/// worker 发回的消息: 样本索引与抽样结果.
type Drawn = (usize, Result<Sample, DrawError>);

/// 并行预取的数据加载器.
///
/// worker 按 `w, w + W, w + 2W, ...` 的确定性划分领取样本索引,
/// 消费端以重排缓冲恢复全序; 训练模式无界循环, 测试模式在遍历完
/// 全部滑窗位置后结束.
pub struct Loader {
    rx: Receiver<Drawn>,
    pending: HashMap<usize, Result<Sample, DrawError>>,
    next_index: usize,
    total: Option<usize>,
    batch_size: usize,
    collate: Box<dyn Collate>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("pending", &self.pending.len())
            .field("next_index", &self.next_index)
            .field("total", &self.total)
            .field("batch_size", &self.batch_size)
            .field("num_workers", &self.workers.len())
            .finish()
    }
}

/// 单个 worker 的抽样循环.
fn worker_loop(
    source: Arc<dyn SampleSource>,
    tx: SyncSender<Drawn>,
    stop: Arc<AtomicBool>,
    worker: usize,
    stride: usize,
    mut rng: StdRng,
) {
    let indices = match source.len() {
        Some(n) => Either::Left((worker..n).step_by(stride)),
        None => Either::Right((worker..).step_by(stride)),
    };

    for i in indices {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let drawn = source.draw(i, &mut rng);
        if tx.send((i, drawn)).is_err() {
            break;
        }
    }
}

impl Loader {
    /// 启动 worker pool.
    fn new(
        source: Arc<dyn SampleSource>,
        collate: Box<dyn Collate>,
        batch_size: usize,
        workers: usize,
        seed: Option<u64>,
    ) -> Self {
        debug_assert!(batch_size >= 1);
        let workers = workers.max(1);
        let total = source.len();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::sync_channel::<Drawn>(2 * batch_size.max(workers));

        let handles = (0..workers)
            .map(|w| {
                let source = source.clone();
                let tx = tx.clone();
                let stop = stop.clone();
                // worker 间随机流独立; 指定种子时整体可再现.
                let rng = match seed {
                    Some(s) => StdRng::seed_from_u64(
                        s.wrapping_add((w as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
                    ),
                    None => StdRng::from_entropy(),
                };
                std::thread::spawn(move || worker_loop(source, tx, stop, w, workers, rng))
            })
            .collect();

        Self {
            rx,
            pending: HashMap::new(),
            next_index: 0,
            total,
            batch_size,
            collate,
            stop,
            workers: handles,
        }
    }

    /// 测试模式的样本总数. 训练模式为 `None`.
    #[inline]
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// 批大小.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// 按全序取下一个抽样结果.
    fn recv_in_order(&mut self) -> Result<Sample, DrawError> {
        loop {
            if let Some(drawn) = self.pending.remove(&self.next_index) {
                self.next_index += 1;
                return drawn;
            }
            let (i, drawn) = self.rx.recv().expect("worker pool 意外关闭");
            self.pending.insert(i, drawn);
        }
    }

    /// 组装下一个批.
    ///
    /// 训练模式永远返回 `Some`; 测试模式遍历结束后返回 `None`
    /// (最后一批可能不满). 单个样本的抽样错误原样上抛,
    /// 由调用方决定是否继续取下一批.
    pub fn next_batch(&mut self) -> Option<Result<Batch, DrawError>> {
        let want = match self.total {
            Some(n) => {
                if self.next_index >= n {
                    return None;
                }
                self.batch_size.min(n - self.next_index)
            }
            None => self.batch_size,
        };

        let mut samples = Vec::with_capacity(want);
        for _ in 0..want {
            match self.recv_in_order() {
                Ok(s) => samples.push(s),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(self.collate.collate(samples)))
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // 持续清空队列, 让阻塞在 send 上的 worker 观察到停止位后退出.
        for handle in self.workers.drain(..) {
            while !handle.is_finished() {
                let _ = self.rx.try_recv();
                std::thread::yield_now();
            }
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::task;
    use ndarray::Array3;

    fn demo_config() -> PipelineConfig {
        PipelineConfig {
            batch_size: 2,
            workers: 2,
            augment: false,
            sample_size: (2, 8, 8),
            test_size: (4, 8, 8),
            test_stride: (4, 4, 4),
            seed: Some(42),
            ..Default::default()
        }
    }

    fn demo_volumes(with_label: bool, with_mask: bool) -> VolumeSet {
        let shape = (4, 16, 16);
        let image = Array3::from_elem(shape, 0.5);
        let label = Array3::from_shape_fn(shape, |(_, h, _)| if h < 8 { 1.0 } else { 2.0 });
        let mask = Array3::from_elem(shape, 1.0);
        VolumeSet::from_arrays(
            vec![image],
            with_label.then(|| vec![label]),
            with_mask.then(|| vec![mask]),
        )
        .unwrap()
    }

    /// 测试模式: 滑窗全覆盖, 批次顺序确定, 位置单调.
    #[test]
    fn test_loader_exhaustive_deterministic() {
        // 多个测试共享进程, 重复初始化的错误可以忽略.
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Debug)
            .init();

        let cfg = demo_config();
        // (4, 16, 16), 窗口 (4, 8, 8), 步长 (4, 4, 4):
        // z: [0], h/w: [0, 4, 8] -> 9 个位置.
        let mut loader = assemble_loader(&cfg, Mode::Test, demo_volumes(false, false)).unwrap();
        assert_eq!(loader.total(), Some(9));

        let mut all_positions = Vec::new();
        while let Some(batch) = loader.next_batch() {
            let Batch::Test { positions, image } = batch.unwrap() else {
                panic!("期望测试批");
            };
            let (b, c, z, h, w) = image.dim();
            assert_eq!(b, positions.len());
            assert_eq!((c, z, h, w), (1, 4, 8, 8));
            all_positions.extend(positions);
        }
        assert_eq!(all_positions.len(), 9);
        // 重排缓冲保证的全序.
        let expect: Vec<(usize, (usize, usize, usize))> = [
            (0, 0, 0), (0, 0, 4), (0, 0, 8),
            (0, 4, 0), (0, 4, 4), (0, 4, 8),
            (0, 8, 0), (0, 8, 4), (0, 8, 8),
        ]
        .into_iter()
        .map(|p| (0, p))
        .collect();
        assert_eq!(all_positions, expect);
    }

    #[test]
    fn test_train_loader_batch_shapes() {
        let cfg = demo_config();
        let mut loader = assemble_loader(&cfg, Mode::Train, demo_volumes(true, false)).unwrap();
        assert_eq!(loader.total(), None);

        for _ in 0..2 {
            let Batch::Train { image, target, mask } = loader.next_batch().unwrap().unwrap() else {
                panic!("期望训练批");
            };
            assert_eq!(image.dim(), (2, 1, 2, 8, 8));
            // affinity 任务: 3 通道目标.
            assert_eq!(target.dim(), (2, 3, 2, 8, 8));
            assert!(mask.is_none());
        }
    }

    #[test]
    fn test_skeleton_batch_carries_aux() {
        let mut cfg = demo_config();
        cfg.task = task::MITO_SKELETON;
        let mut loader = assemble_loader(&cfg, Mode::Train, demo_volumes(true, true)).unwrap();

        let Batch::TrainSkeleton { image, target, skeleton, mask } =
            loader.next_batch().unwrap().unwrap()
        else {
            panic!("期望骨架训练批");
        };
        assert_eq!(image.dim(), (2, 1, 2, 8, 8));
        assert_eq!(target.dim(), (2, 1, 2, 8, 8));
        assert_eq!(skeleton.dim(), (2, 1, 2, 8, 8));
        assert!(mask.is_some());
        assert!(skeleton.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_skeleton_without_mask_rejected() {
        let mut cfg = demo_config();
        cfg.task = task::MITO_SKELETON;
        let err = assemble_loader(&cfg, Mode::Train, demo_volumes(true, false)).unwrap_err();
        assert_eq!(err, ConfigError::MaskRequired(task::MITO_SKELETON));
    }

    #[test]
    fn test_unknown_task_rejected_at_assembly() {
        let mut cfg = demo_config();
        cfg.task = 7;
        let err = assemble_loader(&cfg, Mode::Test, demo_volumes(false, false)).unwrap_err();
        assert_eq!(err, ConfigError::UnknownTask(7));
    }

    /// 协商尺寸超出体数据: 配置错误而不是运行时错误.
    #[test]
    fn test_negotiated_footprint_exceeds_volume() {
        let mut cfg = demo_config();
        cfg.augment = true;
        cfg.sample_size = (4, 16, 16); // 增广余量叠加后必然超过 16.
        let err = assemble_loader(&cfg, Mode::Train, demo_volumes(true, false)).unwrap_err();
        assert!(matches!(err, ConfigError::SampleExceedsVolume(0, _, _)));
    }
}
