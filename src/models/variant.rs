use serde::{Deserialize, Serialize};

/// 模型变体：严重程度分类（5类）或多输出风险回归（14维）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    Classification,
    Regression,
}

impl ModelVariant {
    /// 原始输出向量长度
    pub const fn output_len(self) -> usize {
        match self {
            ModelVariant::Classification => 5,
            ModelVariant::Regression => 14,
        }
    }

    /// 建议等级的有效范围
    pub const fn level_range(self) -> LevelRange {
        match self {
            ModelVariant::Classification => LevelRange { min: 0, max: 4 },
            ModelVariant::Regression => LevelRange { min: 1, max: 5 },
        }
    }

    /// 检查点文件名（相对模型目录）
    pub fn checkpoint_file(self) -> &'static str {
        match self {
            ModelVariant::Classification => "severity_head.safetensors",
            ModelVariant::Regression => "retina_multioutput.safetensors",
        }
    }

    /// ONNX主干网络文件名（相对模型目录）
    pub fn backbone_file(self) -> &'static str {
        match self {
            ModelVariant::Classification => "backbone/densenet121.onnx",
            ModelVariant::Regression => "backbone/resnet50.onnx",
        }
    }

    /// 导出主干网络时的默认输入布局
    pub fn default_layout(self) -> InputLayout {
        match self {
            ModelVariant::Classification => InputLayout::Nhwc,
            ModelVariant::Regression => InputLayout::Nchw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVariant::Classification => "classification",
            ModelVariant::Regression => "regression",
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 闭区间等级范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelRange {
    pub min: u8,
    pub max: u8,
}

impl LevelRange {
    pub fn contains(&self, level: u8) -> bool {
        (self.min..=self.max).contains(&level)
    }
}

/// 张量输入布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    /// (N, H, W, C)
    Nhwc,
    /// (N, C, H, W)
    Nchw,
}
