use crate::config::OnnxConfig;
use crate::Result;
use candle_core::{Device, Tensor};
use candle_nn::{conv2d, Conv2d, Conv2dConfig, Module, VarBuilder};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 特征提取主干网络：输入 (N, H, W, 3) 批次，输出 (N, feature_dim) 特征
pub trait Backbone: Send + Sync {
    fn name(&self) -> &str;

    fn feature_dim(&self) -> usize;

    /// 参数是否位于模型的 VarMap 中（可被微调）
    fn is_trainable(&self) -> bool;

    fn extract(&self, batch: &Array4<f32>, device: &Device) -> Result<Tensor>;
}

/// 配置层面的主干网络类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackboneKind {
    /// 导出的预训练 ONNX 特征提取器（冻结）
    Onnx,
    /// candle 卷积主干（可微调）
    Conv,
}

/// 构建主干网络所需的参数
pub enum BackboneSpec<'a> {
    Onnx { path: &'a Path, config: &'a OnnxConfig },
    Conv,
}

/// 卷积通道序列
const CONV_CHANNELS: [usize; 4] = [3, 16, 32, 64];

/// 轻量卷积主干：3x3/stride 2 卷积 + ReLU，最后全局平均池化
pub struct ConvBackbone {
    convs: Vec<Conv2d>,
}

impl ConvBackbone {
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let convs = CONV_CHANNELS
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let config = Conv2dConfig {
                    padding: 1,
                    stride: 2,
                    ..Default::default()
                };
                conv2d(pair[0], pair[1], 3, config, vb.pp(format!("conv{}", i + 1)))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self { convs })
    }
}

impl Backbone for ConvBackbone {
    fn name(&self) -> &str {
        "conv"
    }

    fn feature_dim(&self) -> usize {
        CONV_CHANNELS[CONV_CHANNELS.len() - 1]
    }

    fn is_trainable(&self) -> bool {
        true
    }

    fn extract(&self, batch: &Array4<f32>, device: &Device) -> Result<Tensor> {
        // NHWC -> NCHW
        let mut xs = nhwc_tensor(batch, device)?.permute((0, 3, 1, 2))?.contiguous()?;
        for conv in &self.convs {
            xs = conv.forward(&xs)?.relu()?;
        }
        Ok(xs.mean((2, 3))?)
    }
}

/// 将 ndarray 批次复制为 candle 张量，保持 (N, H, W, C) 布局
pub(crate) fn nhwc_tensor(batch: &Array4<f32>, device: &Device) -> Result<Tensor> {
    let (n, h, w, c) = batch.dim();
    let values: Vec<f32> = batch.iter().copied().collect();
    Ok(Tensor::from_vec(values, (n, h, w, c), device)?)
}
