use crate::models::ModelVariant;
use serde::Serialize;

/// 回归输出中14个临床特征的固定顺序
pub const FEATURE_NAMES: [&str; 14] = [
    "age", "sex", "cp", "trestbps", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak",
    "slope", "ca", "thal", "target",
];

/// 总体风险值在回归输出中的位置（最后一个）
pub const RISK_INDEX: usize = FEATURE_NAMES.len() - 1;

/// 糖尿病视网膜病变严重程度（有序，与类别下标对齐）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    #[serde(rename = "No DR")]
    NoDr,
    Mild,
    Moderate,
    Severe,
    #[serde(rename = "Proliferative DR")]
    ProliferativeDr,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::NoDr,
        Severity::Mild,
        Severity::Moderate,
        Severity::Severe,
        Severity::ProliferativeDr,
    ];

    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.get(level as usize).copied()
    }

    pub fn level(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::NoDr => "No DR",
            Severity::Mild => "Mild",
            Severity::Moderate => "Moderate",
            Severity::Severe => "Severe",
            Severity::ProliferativeDr => "Proliferative DR",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 分类变体的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityRecord {
    pub result: Severity,
    /// 三位小数的概率文本，如 "0.850"
    pub probability: String,
    pub level: u8,
    pub display_pct: f64,
    pub image_url: String,
}

/// 回归变体输出的14个临床特征
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalFeatures {
    pub age: f64,
    pub sex: f64,
    pub cp: f64,
    pub trestbps: f64,
    pub chol: f64,
    pub fbs: f64,
    pub restecg: f64,
    pub thalach: f64,
    pub exang: f64,
    pub oldpeak: f64,
    pub slope: f64,
    pub ca: f64,
    pub thal: f64,
    pub target: f64,
}

impl ClinicalFeatures {
    /// 按 `FEATURE_NAMES` 顺序读取；长度不足时返回 None
    pub fn from_raw(raw: &[f32]) -> Option<Self> {
        if raw.len() < FEATURE_NAMES.len() {
            return None;
        }
        let v = |i: usize| raw[i] as f64;
        Some(Self {
            age: v(0),
            sex: v(1),
            cp: v(2),
            trestbps: v(3),
            chol: v(4),
            fbs: v(5),
            restecg: v(6),
            thalach: v(7),
            exang: v(8),
            oldpeak: v(9),
            slope: v(10),
            ca: v(11),
            thal: v(12),
            target: v(13),
        })
    }

    pub fn to_array(&self) -> [f64; 14] {
        [
            self.age,
            self.sex,
            self.cp,
            self.trestbps,
            self.chol,
            self.fbs,
            self.restecg,
            self.thalach,
            self.exang,
            self.oldpeak,
            self.slope,
            self.ca,
            self.thal,
            self.target,
        ]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        FEATURE_NAMES.into_iter().zip(self.to_array())
    }
}

/// 回归变体的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskRecord {
    pub risk_value: f64,
    pub risk_label: String,
    pub level: u8,
    pub display_pct: f64,
    pub features: ClinicalFeatures,
    pub image_url: String,
}

/// 一次完成的预测；写入存储后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Severity(SeverityRecord),
    Risk(RiskRecord),
}

impl ResultRecord {
    pub fn variant(&self) -> ModelVariant {
        match self {
            ResultRecord::Severity(_) => ModelVariant::Classification,
            ResultRecord::Risk(_) => ModelVariant::Regression,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            ResultRecord::Severity(r) => r.level,
            ResultRecord::Risk(r) => r.level,
        }
    }

    pub fn display_pct(&self) -> f64 {
        match self {
            ResultRecord::Severity(r) => r.display_pct,
            ResultRecord::Risk(r) => r.display_pct,
        }
    }

    pub fn image_url(&self) -> &str {
        match self {
            ResultRecord::Severity(r) => &r.image_url,
            ResultRecord::Risk(r) => &r.image_url,
        }
    }
}
