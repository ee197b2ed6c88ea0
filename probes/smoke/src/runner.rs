//! 探针运行函数: 数据管线与网络前向的端到端冒烟验证.

use std::time::Instant;

use log::info;
use ndarray::{Array3, Array5};

use em_lychee::prelude::*;

/// 冒烟结果. 每一项是 (名称, 耗时毫秒, 结论).
pub struct SmokeResult {
    data: Vec<(&'static str, u128, String)>,
}

impl SmokeResult {
    fn push(&mut self, name: &'static str, from: Instant, verdict: String) {
        self.data.push((name, from.elapsed().as_millis(), verdict));
    }

    /// 汇报运行结果.
    pub fn report(&self) {
        const S4: &str = "    ";
        println!("Smoke probes:");
        for (name, ms, verdict) in self.data.iter() {
            println!("{S4}{name}: {verdict} ({ms} ms)");
        }
    }
}

/// 实际运行.
pub fn run() -> SmokeResult {
    let mut result = SmokeResult { data: vec![] };

    probe_test_pipeline(&mut result);
    probe_train_pipeline(&mut result);
    probe_network(&mut result);

    result
}

/// 测试模式管线: 4x128x128 体数据, pad (0, 4, 4), 测试尺寸
/// 4x136x136 -> 恰好一个滑窗样本.
fn probe_test_pipeline(result: &mut SmokeResult) {
    let t = Instant::now();

    let image = Array3::from_shape_fn((4, 128, 128), |(z, h, w)| {
        ((z + h + w) % 256) as f32 / 255.0
    });
    let padded = reflect_pad(&image, (0, 4, 4));
    assert_eq!(padded.dim(), (4, 136, 136));
    let volumes = VolumeSet::from_arrays(vec![padded], None, None).expect("体数据构建失败");

    let cfg = PipelineConfig {
        task: 0,
        test_size: (4, 136, 136),
        test_stride: (1, 1, 1),
        batch_size: 1,
        workers: 2,
        augment: false,
        ..Default::default()
    };

    let mut loader = assemble_loader(&cfg, Mode::Test, volumes).expect("装配失败");
    assert_eq!(loader.total(), Some(1));

    let mut count = 0usize;
    while let Some(batch) = loader.next_batch() {
        let Batch::Test { positions, image } = batch.expect("抽样失败") else {
            panic!("期望测试批");
        };
        info!("test batch: positions {positions:?}, image {:?}", image.dim());
        assert_eq!(image.dim(), (1, 1, 4, 136, 136));
        count += positions.len();
    }
    assert_eq!(count, 1);

    result.push("test-pipeline", t, "1 window, 4x136x136".to_string());
}

/// 训练模式管线: 带标签体数据 + 完整增广链, affinity 任务.
fn probe_train_pipeline(result: &mut SmokeResult) {
    let t = Instant::now();

    let shape = (8, 96, 96);
    let image = Array3::from_shape_fn(shape, |(z, h, w)| ((z * h + w) % 251) as f32 / 250.0);
    // 四象限实例标签.
    let label = Array3::from_shape_fn(shape, |(_, h, w)| {
        1.0 + (h >= 48) as u8 as f32 * 2.0 + (w >= 48) as u8 as f32
    });
    let volumes =
        VolumeSet::from_arrays(vec![image], Some(vec![label]), None).expect("体数据构建失败");

    let cfg = PipelineConfig {
        task: 0,
        sample_size: (4, 32, 32),
        batch_size: 2,
        workers: 2,
        augment: true,
        seed: Some(1),
        ..Default::default()
    };

    let mut loader = assemble_loader(&cfg, Mode::Train, volumes).expect("装配失败");
    let Batch::Train { image, target, .. } = loader
        .next_batch()
        .expect("训练模式不会耗尽")
        .expect("抽样失败")
    else {
        panic!("期望训练批");
    };
    info!("train batch: image {:?}, target {:?}", image.dim(), target.dim());
    assert_eq!(image.dim(), (2, 1, 4, 32, 32));
    assert_eq!(target.dim(), (2, 3, 4, 32, 32));

    result.push("train-pipeline", t, "augmented batch 2x1x4x32x32".to_string());
}

/// 网络前向: 默认配置, 8 批 1x4x128x128 -> 8x3x4x128x128.
fn probe_network(result: &mut SmokeResult) {
    let t = Instant::now();

    let net = UnetResidual::new(&UnetConfig::default()).expect("网络构造失败");
    info!("model depth: {}, trainable parameters: {}", net.depth(), net.num_params());

    let mut x = Array5::from_elem((8, 1, 4, 128, 128), 0.5);
    x.slice_mut(ndarray::s![..2, .., .., .., ..]).fill(0.3);

    let y = net.forward(&x).expect("前向失败");
    info!("forward: {:?} -> {:?}", x.dim(), y.dim());
    assert_eq!(y.dim(), (8, 3, 4, 128, 128));
    assert!(y.iter().all(|&v| v > 0.0 && v < 1.0));

    result.push("network", t, "8x1x4x128x128 -> 8x3x4x128x128".to_string());
}
