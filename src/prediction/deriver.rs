use crate::models::{LevelRange, ModelVariant};
use crate::prediction::types::{
    ClinicalFeatures, ResultRecord, RiskRecord, Severity, SeverityRecord, RISK_INDEX,
};
use crate::utils::error::RetinaError;
use crate::Result;

/// 风险分级阈值（右开区间，边界值归入更高一级）
const RISK_THRESHOLDS: [f64; 4] = [0.2, 0.4, 0.6, 0.8];

/// 将原始输出向量映射为面向用户的结果
pub struct ResultDeriver;

impl ResultDeriver {
    pub fn derive(
        variant: ModelVariant,
        raw: &[f32],
        image_url: impl Into<String>,
    ) -> Result<ResultRecord> {
        match variant {
            ModelVariant::Classification => {
                Self::derive_severity(raw, image_url).map(ResultRecord::Severity)
            }
            ModelVariant::Regression => Self::derive_risk(raw, image_url).map(ResultRecord::Risk),
        }
    }

    /// 分类：argmax 得到严重程度，最大概率保留三位小数
    pub fn derive_severity(raw: &[f32], image_url: impl Into<String>) -> Result<SeverityRecord> {
        Self::check_output(raw, ModelVariant::Classification)?;

        let (pred_class, pred_proba) = Self::argmax(raw)
            .ok_or_else(|| RetinaError::Inference("Empty classification output".to_string()))?;
        let result = Severity::from_level(pred_class as u8).ok_or_else(|| {
            RetinaError::Inference(format!("Class index {} out of range", pred_class))
        })?;

        let probability = Self::format_probability(pred_proba);
        let rounded: f64 = probability
            .parse()
            .map_err(|e| RetinaError::Internal(format!("Unparsable probability text: {}", e)))?;

        Ok(SeverityRecord {
            result,
            probability,
            level: result.level(),
            display_pct: Self::display_pct(rounded),
            image_url: image_url.into(),
        })
    }

    /// 回归：最后一个输出作为风险值并分级，其余作为命名特征
    pub fn derive_risk(raw: &[f32], image_url: impl Into<String>) -> Result<RiskRecord> {
        Self::check_output(raw, ModelVariant::Regression)?;

        let risk_value = raw[RISK_INDEX] as f64;
        let level = Self::risk_level(risk_value);
        let features = ClinicalFeatures::from_raw(raw).ok_or_else(|| {
            RetinaError::Inference("Regression output too short for features".to_string())
        })?;

        Ok(RiskRecord {
            risk_value,
            risk_label: format!("Level {}", level),
            level,
            display_pct: Self::display_pct(risk_value),
            features,
            image_url: image_url.into(),
        })
    }

    /// 第一个最大值的 (下标, 值)
    pub fn argmax(raw: &[f32]) -> Option<(usize, f32)> {
        raw.iter()
            .copied()
            .enumerate()
            .fold(None, |best, (i, v)| match best {
                Some((_, best_v)) if best_v >= v => best,
                _ => Some((i, v)),
            })
    }

    /// 概率以三位小数文本输出
    pub fn format_probability(probability: f32) -> String {
        format!("{:.3}", probability)
    }

    /// `<0.2→1, <0.4→2, <0.6→3, <0.8→4, 其余→5`
    pub fn risk_level(risk_value: f64) -> u8 {
        let below = RISK_THRESHOLDS
            .iter()
            .position(|&threshold| risk_value < threshold)
            .unwrap_or(RISK_THRESHOLDS.len());
        below as u8 + 1
    }

    /// `clamp(0, 100, metric * 100)`
    pub fn display_pct(metric: f64) -> f64 {
        (metric * 100.0).clamp(0.0, 100.0)
    }

    /// 将请求的建议等级钳制到有效范围内，从不失败
    pub fn clamp_level(requested: i64, range: LevelRange) -> u8 {
        requested.clamp(range.min as i64, range.max as i64) as u8
    }

    fn check_output(raw: &[f32], variant: ModelVariant) -> Result<()> {
        if raw.len() != variant.output_len() {
            return Err(RetinaError::Inference(format!(
                "Expected {} {} outputs, got {}",
                variant.output_len(),
                variant,
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RetinaError::Inference(format!(
                "Model produced non-finite {} outputs",
                variant
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_example() {
        let raw = [0.05, 0.05, 0.85, 0.03, 0.02];
        let record = ResultDeriver::derive_severity(&raw, "/static/uploads/a.jpg").unwrap();

        assert_eq!(record.result, Severity::Moderate);
        assert_eq!(record.level, 2);
        assert_eq!(record.probability, "0.850");
        assert_eq!(record.display_pct, 85.0);
        assert_eq!(record.image_url, "/static/uploads/a.jpg");
    }

    #[test]
    fn classification_probability_is_truncated_to_three_decimals() {
        let raw = [0.1, 0.12345, 0.2, 0.66666, 0.0];
        let record = ResultDeriver::derive_severity(&raw, "").unwrap();

        assert_eq!(record.result, Severity::Severe);
        assert_eq!(record.probability, "0.667");
        assert!((record.display_pct - 66.7).abs() < 1e-9);
    }

    #[test]
    fn argmax_prefers_first_maximum() {
        assert_eq!(ResultDeriver::argmax(&[0.4, 0.4, 0.2]), Some((0, 0.4)));
        assert_eq!(ResultDeriver::argmax(&[]), None);
    }

    #[test]
    fn regression_example() {
        let mut raw = [0.0f32; 14];
        raw[0] = 54.0;
        raw[13] = 0.55;
        let record = ResultDeriver::derive_risk(&raw, "/static/uploads/b.jpg").unwrap();

        assert_eq!(record.level, 3);
        assert_eq!(record.risk_label, "Level 3");
        assert!((record.display_pct - 55.0).abs() < 1e-4);
        assert_eq!(record.features.age, 54.0);
        assert!((record.features.target - 0.55).abs() < 1e-6);
    }

    #[test]
    fn risk_level_is_a_step_function() {
        let cases = [
            (0.0, 1),
            (0.1999, 1),
            (0.2, 2),
            (0.3999, 2),
            (0.4, 3),
            (0.7999, 4),
            (0.8, 5),
            (1.0, 5),
            (-3.0, 1),
            (7.0, 5),
        ];
        for (risk, level) in cases {
            assert_eq!(ResultDeriver::risk_level(risk), level, "risk {}", risk);
        }
    }

    #[test]
    fn display_pct_clamps() {
        assert_eq!(ResultDeriver::display_pct(-0.1), 0.0);
        assert_eq!(ResultDeriver::display_pct(1.5), 100.0);
        assert_eq!(ResultDeriver::display_pct(0.25), 25.0);

        for i in 0..=100 {
            let pct = ResultDeriver::display_pct(i as f64 / 100.0);
            assert!((0.0..=100.0).contains(&pct));
        }
    }

    #[test]
    fn clamp_level_is_total_and_idempotent() {
        let cls = ModelVariant::Classification.level_range();
        assert_eq!(ResultDeriver::clamp_level(-5, cls), 0);
        assert_eq!(ResultDeriver::clamp_level(99, cls), 4);
        assert_eq!(ResultDeriver::clamp_level(2, cls), 2);

        let reg = ModelVariant::Regression.level_range();
        assert_eq!(ResultDeriver::clamp_level(0, reg), 1);
        assert_eq!(ResultDeriver::clamp_level(i64::MAX, reg), 5);

        for requested in [-100, -1, 0, 3, 4, 5, 6, 1000] {
            let once = ResultDeriver::clamp_level(requested, cls);
            assert_eq!(ResultDeriver::clamp_level(once as i64, cls), once);
            assert!(cls.contains(once));
        }
    }

    #[test]
    fn wrong_length_or_non_finite_output_is_rejected() {
        assert!(matches!(
            ResultDeriver::derive_severity(&[0.5, 0.5], ""),
            Err(RetinaError::Inference(_))
        ));
        assert!(matches!(
            ResultDeriver::derive(ModelVariant::Regression, &[0.1; 5], ""),
            Err(RetinaError::Inference(_))
        ));

        let mut raw = [0.0f32; 14];
        raw[13] = f32::NAN;
        assert!(ResultDeriver::derive_risk(&raw, "").is_err());
    }
}
