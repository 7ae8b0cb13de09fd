use crate::models::{BackboneKind, InputLayout, ModelVariant};
use crate::utils::error::RetinaError;
use crate::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// 服务器绑定地址
    pub bind_addr: String,

    /// 模型文件目录
    pub models_dir: PathBuf,

    /// 上传图像保存目录
    pub upload_dir: PathBuf,

    /// 工作线程数量
    pub workers: usize,

    /// 开发模式
    pub dev_mode: bool,

    /// 服务的模型变体
    pub variant: ModelVariant,

    /// 主干网络类型
    pub backbone: BackboneKind,

    /// ONNX Runtime配置
    pub onnx_config: OnnxConfig,

    /// 服务器配置
    pub server_config: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// CPU线程数
    pub intra_threads: usize,

    /// 优化级别
    pub optimization_level: i32,

    /// 启用图优化
    pub enable_optimization: bool,

    /// 主干网络期望的输入布局
    pub input_layout: InputLayout,

    /// 并行推理的会话数量
    pub session_pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 请求超时时间（秒）
    pub request_timeout: u64,

    /// 最大请求体大小（字节）
    pub max_request_size: usize,
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_dir: String,
        workers: Option<usize>,
        dev_mode: bool,
        variant: ModelVariant,
    ) -> Result<Self> {
        let cpu_cores = num_cpus::get();
        let workers = workers.unwrap_or(cpu_cores);
        if workers == 0 {
            return Err(RetinaError::Config("workers must be at least 1".to_string()));
        }

        let mut onnx_config = OnnxConfig::for_variant(variant);
        // 每个工作线程一个会话，请求之间互不等待
        onnx_config.session_pool_size = workers;
        onnx_config.intra_threads = (onnx_config.intra_threads / workers).max(1);

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            max_request_size: 50 * 1024 * 1024, // 50MB
        };

        Ok(Self {
            bind_addr,
            models_dir: PathBuf::from(models_dir),
            upload_dir: PathBuf::from("static/uploads"),
            workers,
            dev_mode,
            variant,
            backbone: BackboneKind::Onnx,
            onnx_config,
            server_config,
        })
    }

    pub fn with_backbone(mut self, backbone: BackboneKind) -> Self {
        self.backbone = backbone;
        self
    }

    pub fn with_upload_dir(mut self, upload_dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = upload_dir.into();
        self
    }

    pub fn with_input_layout(mut self, layout: InputLayout) -> Self {
        self.onnx_config.input_layout = layout;
        self
    }

    /// 获取头部（及可训练主干）权重检查点路径
    pub fn checkpoint_path(&self) -> PathBuf {
        self.models_dir.join(self.variant.checkpoint_file())
    }

    /// 获取ONNX主干网络路径
    pub fn backbone_path(&self) -> PathBuf {
        self.models_dir.join(self.variant.backbone_file())
    }
}

impl OnnxConfig {
    /// 按变体默认输入布局生成配置
    pub fn for_variant(variant: ModelVariant) -> Self {
        Self {
            intra_threads: (num_cpus::get() * 3 / 4).max(1), // 使用75%的CPU核心
            optimization_level: 3,
            enable_optimization: true,
            input_layout: variant.default_layout(),
            session_pool_size: 1,
        }
    }
}
