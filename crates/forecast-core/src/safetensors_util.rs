use anyhow::{ensure, Context, Result};
use log::{debug, warn};
use memmap2::MmapOptions;
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;
use tch::{nn, Device, Kind, Tensor};

/// Writes every variable of `vs` as F32, sorted by name.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    let mut variables: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    variables.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buffers = Vec::with_capacity(variables.len());
    for (name, var) in &variables {
        let flat = var.to_kind(Kind::Float).to_device(Device::Cpu).flatten(0, -1);
        let values = Vec::<f32>::try_from(&flat)?;
        let shape: Vec<usize> = var.size().iter().map(|&d| d as usize).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        buffers.push((name.clone(), shape, bytes));
    }

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, bytes) in &buffers {
        views.push((name.as_str(), TensorView::new(Dtype::F32, shape.clone(), bytes)?));
    }
    safetensors::serialize_to_file(views, &None, path.as_ref())?;
    Ok(())
}

/// Loads every variable of `vs` from `path`. A variable that is missing from
/// the file, or stored with another shape or dtype, is an error.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    // Snapshots are renamed into place once complete and never rewritten.
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();

    for (name, var) in variables.iter_mut() {
        let view = tensors
            .tensor(name)
            .with_context(|| format!("variable `{name}` not in {}", path.display()))?;
        ensure!(view.dtype() == Dtype::F32, "unsupported dtype {:?} for `{name}`", view.dtype());

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        ensure!(
            shape == var.size(),
            "shape mismatch for `{name}`: file has {shape:?}, model has {:?}",
            var.size()
        );

        let loaded = Tensor::from_data_size(view.data(), &shape, Kind::Float).to_device(device);
        tch::no_grad(|| {
            var.copy_(&loaded);
        });
        debug!("Loaded tensor: {}", name);
    }

    for name in tensors.names() {
        if !variables.contains_key(name.as_str()) {
            warn!("Tensor {} found in {} but not in model", name, path.display());
        }
    }

    Ok(())
}
