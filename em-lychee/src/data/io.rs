//! 体数据文件读取. 按扩展名分发到具体容器格式.

use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{Array3, Ix3, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpyExt};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use super::{LoadError, Volume};

/// npz 容器内体数据所在的成员键名.
const MAIN_KEY: &str = "main";

/// 读取一个 3D 体数据文件, 统一转为行优先的 `Array3<f32>`.
///
/// 支持的格式 (按文件名后缀识别):
///
/// 1. `.npz` — 结构化数组容器, 体数据位于成员键 `main` 下;
/// 2. `.npy` — 裸数组转储;
/// 3. `.npy.gz` — gzip 压缩的裸数组转储;
/// 4. `.nii` / `.nii.gz` — nifti 体数据文件.
///
/// 元素类型为 `f32` 或 `u8`; `u8` 数据以数值直转 (归一化在后续步骤完成).
pub(crate) fn read_volume(path: &Path) -> Result<Volume, LoadError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if name.ends_with(".npz") {
        read_npz(path)
    } else if name.ends_with(".npy.gz") {
        let mut bytes = Vec::new();
        GzDecoder::new(fs::File::open(path).map_err(LoadError::Io)?)
            .read_to_end(&mut bytes)
            .map_err(LoadError::Io)?;
        read_npy_bytes(bytes)
    } else if name.ends_with(".npy") {
        read_npy_bytes(fs::read(path).map_err(LoadError::Io)?)
    } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
        read_nii(path)
    } else {
        Err(LoadError::UnsupportedFormat(path.to_owned()))
    }
}

/// 从 npz 容器的 `main` 键读取体数据.
///
/// 成员名按 `main.npy` 和 `main` 两种写法依次尝试
/// (不同写入端对 `.npy` 后缀的处理不一致).
fn read_npz(path: &Path) -> Result<Volume, LoadError> {
    let bytes = fs::read(path).map_err(LoadError::Io)?;

    let mut reader = NpzReader::new(Cursor::new(&bytes)).map_err(LoadError::Npz)?;
    let names = [format!("{MAIN_KEY}.npy"), MAIN_KEY.to_string()];

    let mut first_err = None;
    for name in names.iter() {
        match reader.by_name::<OwnedRepr<f32>, Ix3>(name) {
            Ok(arr) => return Ok(arr),
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    // f32 读取失败, 按 u8 再试一轮 (原始扫描常以 u8 存储).
    let mut reader = NpzReader::new(Cursor::new(&bytes)).map_err(LoadError::Npz)?;
    for name in names.iter() {
        if let Ok(arr) = reader.by_name::<OwnedRepr<u8>, Ix3>(name) {
            return Ok(arr.mapv(f32::from));
        }
    }

    // 该分支必然已记录首个错误, 可直接 unwrap.
    Err(LoadError::Npz(first_err.unwrap()))
}

/// 从 npy 字节流读取体数据.
fn read_npy_bytes(bytes: Vec<u8>) -> Result<Volume, LoadError> {
    match Array3::<f32>::read_npy(Cursor::new(&bytes)) {
        Ok(arr) => Ok(arr),
        Err(e) => match Array3::<u8>::read_npy(Cursor::new(&bytes)) {
            Ok(arr) => Ok(arr.mapv(f32::from)),
            Err(_) => Err(LoadError::Npy(e)),
        },
    }
}

/// 读取 nii 体数据文件.
///
/// nifti 数据按 \[W, H, z\] 存储, 这里转置为 \[z, H, W\] 并恢复行优先布局.
fn read_nii(path: &Path) -> Result<Volume, LoadError> {
    let obj = ReaderOptions::new()
        .read_file(path)
        .map_err(LoadError::Nifti)?;
    let arr = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(LoadError::Nifti)?;

    if arr.ndim() != 3 {
        return Err(LoadError::NotVolumetric(path.to_owned(), arr.ndim()));
    }
    // 维数已检查, 该转换不会失败.
    let arr = arr.into_dimensionality::<Ix3>().unwrap();

    // [W, H, z] -> [z, H, W].
    Ok(arr
        .permuted_axes([2, 1, 0])
        .as_standard_layout()
        .to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use ndarray_npy::{NpzWriter, WriteNpyExt};
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;

    fn tmp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("em-lychee-io-{}-{name}", std::process::id()));
        p
    }

    fn sample() -> Array3<f32> {
        Array3::from_shape_fn((2, 3, 4), |(z, h, w)| (z * 100 + h * 10 + w) as f32)
    }

    #[test]
    fn test_npz_main_key_roundtrip() {
        let path = tmp_path("a.npz");
        let mut npz = NpzWriter::new(File::create(&path).unwrap());
        npz.add_array("main", &sample()).unwrap();
        npz.finish().unwrap();

        let v = read_volume(&path).unwrap();
        assert_eq!(v, sample());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_npy_and_gz_roundtrip() {
        let path = tmp_path("b.npy");
        sample().write_npy(File::create(&path).unwrap()).unwrap();
        assert_eq!(read_volume(&path).unwrap(), sample());
        std::fs::remove_file(&path).ok();

        let mut raw = Vec::new();
        sample().write_npy(&mut raw).unwrap();
        let gz_path = tmp_path("c.npy.gz");
        let mut enc =
            flate2::write::GzEncoder::new(File::create(&gz_path).unwrap(), Default::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap();
        assert_eq!(read_volume(&gz_path).unwrap(), sample());
        std::fs::remove_file(&gz_path).ok();
    }

    #[test]
    fn test_unknown_format_rejected() {
        let err = read_volume(Path::new("/nonexistent/volume.tif")).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat(_)));
    }
}
