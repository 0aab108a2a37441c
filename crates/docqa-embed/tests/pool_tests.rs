use candle_core::{DType, Device, Tensor};
use docqa_embed::masked_mean_l2;

#[test]
fn masked_mean_l2_ignores_padding() {
    let dev = Device::Cpu;
    // Batch of two sequences, two tokens each, hidden dim 2.
    // Row 0 keeps both tokens, row 1 masks its second token.
    let h = Tensor::from_slice(&[3.0f32, 0.0, 0.0, 4.0, // row 0
                                 1.0, 1.0, 9.0, 9.0],   // row 1
                               (2, 2, 2), &dev).unwrap();
    let mask = Tensor::from_slice(&[1u32, 1, 1, 0], (2, 2), &dev).unwrap();
    let out: Vec<Vec<f32>> = masked_mean_l2(&h, &mask).unwrap().to_dtype(DType::F32).unwrap().to_vec2().unwrap();

    // row 0: mean [1.5, 2.0] -> /2.5
    assert!((out[0][0] - 0.6).abs() < 1e-5 && (out[0][1] - 0.8).abs() < 1e-5, "{:?}", out[0]);
    // row 1: mean of first token only [1, 1] -> 1/sqrt(2)
    let r = 1.0 / 2f32.sqrt();
    assert!((out[1][0] - r).abs() < 1e-5 && (out[1][1] - r).abs() < 1e-5, "{:?}", out[1]);
}

#[test]
fn masked_mean_l2_rejects_bad_rank() {
    let dev = Device::Cpu;
    let h = Tensor::zeros((2, 4), DType::F32, &dev).unwrap();
    let mask = Tensor::ones((2, 4), DType::F32, &dev).unwrap();
    assert!(masked_mean_l2(&h, &mask).is_err());
}
