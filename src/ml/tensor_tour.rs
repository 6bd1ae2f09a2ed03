// ============================================================
// Layer 5 — Tensor Tour
// ============================================================
// A guided walk through Burn's tensor API. Each step builds
// something, renders it, and hands back a titled string for
// the CLI to print:
//
//   empty            uninitialised 5×3
//   rand             uniform [0, 1) 5×3
//   zeros_long       5×3 zeros, integer elements
//   from_data        [5.5, 3]
//   new_ones_double  5×3 ones on an f64 backend, same device
//   randn_like_float normal, same shape, back to f32
//   size             shape of the tensor
//   add              x + y, the functional form, and y += x
//   column           x[:, 1]
//   ndarray          Tensor → ndarray::Array2 → Tensor
//
// Burn fixes the element type per backend, so a dtype change
// means moving the data to another backend type.

use anyhow::{anyhow, Result};
use burn::{
    backend::NdArray,
    prelude::*,
    tensor::{Distribution, TensorData},
};
use ndarray::Array2;

type Cpu       = NdArray<f32>;
type CpuDouble = NdArray<f64>;

/// One printed step of the tour
#[derive(Debug, Clone)]
pub struct TourStep {
    pub title:  &'static str,
    pub output: String,
}

impl TourStep {
    fn new(title: &'static str, output: impl Into<String>) -> Self {
        Self { title, output: output.into() }
    }
}

/// Copy a rank-2 tensor into an `ndarray` array
pub fn to_ndarray<B: Backend>(tensor: Tensor<B, 2>) -> Result<Array2<f32>> {
    let [rows, cols] = tensor.dims();
    let values = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("Cannot read tensor data: {e:?}"))?;
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

/// Build a rank-2 tensor from an `ndarray` array
pub fn from_ndarray<B: Backend>(array: &Array2<f32>, device: &B::Device) -> Tensor<B, 2> {
    let (rows, cols) = array.dim();
    let values: Vec<f32> = array.iter().copied().collect();
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

/// `x[:, index]`
pub fn column<B: Backend>(x: Tensor<B, 2>, index: usize) -> Tensor<B, 1> {
    let [rows, _] = x.dims();
    x.slice([0..rows, index..index + 1]).squeeze::<1>(1)
}

pub fn run_tour() -> Result<Vec<TourStep>> {
    let device = <Cpu as Backend>::Device::default();
    let mut steps = Vec::new();

    let x = Tensor::<Cpu, 2>::empty([5, 3], &device);
    steps.push(TourStep::new("empty", x.to_string()));

    let x = Tensor::<Cpu, 2>::random([5, 3], Distribution::Default, &device);
    steps.push(TourStep::new("rand", x.to_string()));

    let x = Tensor::<Cpu, 2, Int>::zeros([5, 3], &device);
    steps.push(TourStep::new("zeros_long", x.to_string()));

    let x = Tensor::<Cpu, 1>::from_floats([5.5, 3.0], &device);
    steps.push(TourStep::new("from_data", x.to_string()));

    // Same device, different element type
    let x = Tensor::<CpuDouble, 2>::ones([5, 3], &x.device());
    steps.push(TourStep::new("new_ones_double", x.to_string()));

    let x = Tensor::<Cpu, 2>::random(x.shape(), Distribution::Normal(0.0, 1.0), &x.device());
    steps.push(TourStep::new("randn_like_float", x.to_string()));

    steps.push(TourStep::new("size", format!("{:?}", x.dims())));

    // ── Operations ────────────────────────────────────────────────────────────
    let y = Tensor::<Cpu, 2>::random([5, 3], Distribution::Default, &device);
    steps.push(TourStep::new(
        "add",
        format!("x = {x}\ny = {y}\nx + y = {}", x.clone() + y.clone()),
    ));
    steps.push(TourStep::new("add (functional)", x.clone().add(y.clone()).to_string()));

    // Burn tensors are values: "in place" means rebinding the result
    let y = y.add(x.clone());
    steps.push(TourStep::new("add (accumulate into y)", y.to_string()));

    steps.push(TourStep::new("column x[:, 1]", column(x.clone(), 1).to_string()));

    // ── ndarray interop ───────────────────────────────────────────────────────
    let array = to_ndarray(x)?;
    steps.push(TourStep::new("to_ndarray", format!("{array:.4}")));

    let back = from_ndarray::<Cpu>(&array, &device);
    steps.push(TourStep::new("from_ndarray", back.to_string()));

    tracing::debug!("Tensor tour produced {} steps", steps.len());
    Ok(steps)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tensor_is_integer_zeros() {
        let x = Tensor::<Cpu, 2, Int>::zeros([5, 3], &Default::default());
        let values = x.into_data().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![0i64; 15]);
    }

    #[test]
    fn test_ndarray_round_trip_preserves_values() {
        let device = Default::default();
        let x      = Tensor::<Cpu, 2>::random([5, 3], Distribution::Default, &device);
        let array  = to_ndarray(x.clone()).unwrap();
        assert_eq!(array.dim(), (5, 3));

        let back = from_ndarray::<Cpu>(&array, &device);
        let a: Vec<f32> = x.into_data().to_vec().unwrap();
        let b: Vec<f32> = back.into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_column_is_second_column() {
        let x = Tensor::<Cpu, 2>::from_floats([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &Default::default());
        let col: Vec<f32> = column(x, 1).into_data().to_vec().unwrap();
        assert_eq!(col, vec![2.0, 5.0]);
    }

    #[test]
    fn test_tour_reports_shape() {
        let steps = run_tour().unwrap();
        let size  = steps.iter().find(|s| s.title == "size").unwrap();
        assert_eq!(size.output, "[5, 3]");
        assert_eq!(steps.first().map(|s| s.title), Some("empty"));
    }
}
