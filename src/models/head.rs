use crate::models::ModelVariant;
use crate::Result;
use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// 回归头隐藏层宽度
pub const HIDDEN_DIM: usize = 256;

/// 任务头：接在主干特征之后，始终可训练
pub enum Head {
    /// Linear(feat, 5) + softmax
    Classification { fc: Linear },
    /// Linear(feat, 256) -> ReLU -> Linear(256, 14)
    Regression { fc1: Linear, fc2: Linear },
}

impl Head {
    pub fn new(variant: ModelVariant, in_dim: usize, vb: VarBuilder) -> Result<Self> {
        let out_dim = variant.output_len();
        let head = match variant {
            ModelVariant::Classification => Head::Classification {
                fc: linear(in_dim, out_dim, vb.pp("fc"))?,
            },
            ModelVariant::Regression => Head::Regression {
                fc1: linear(in_dim, HIDDEN_DIM, vb.pp("fc1"))?,
                fc2: linear(HIDDEN_DIM, out_dim, vb.pp("fc2"))?,
            },
        };
        Ok(head)
    }
}

impl Module for Head {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Head::Classification { fc } => candle_nn::ops::softmax(&fc.forward(xs)?, D::Minus1),
            Head::Regression { fc1, fc2 } => fc2.forward(&fc1.forward(xs)?.relu()?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn classification_head_emits_distribution() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let head = Head::new(ModelVariant::Classification, 8, vb).unwrap();

        let xs = Tensor::ones((3, 8), DType::F32, &device).unwrap();
        let rows = head.forward(&xs).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(rows.len(), 3);
        for row in rows {
            assert_eq!(row.len(), 5);
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn regression_head_emits_fourteen_outputs() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let head = Head::new(ModelVariant::Regression, 8, vb).unwrap();

        let xs = Tensor::zeros((2, 8), DType::F32, &device).unwrap();
        let out = head.forward(&xs).unwrap();
        assert_eq!(out.dims(), &[2, 14]);
        assert_eq!(varmap.all_vars().len(), 4);
    }
}
