//! 服装候选检测入口

use crate::api::models::detection::{DetectionJob, DetectionOutcome};
use crate::core::garment::{Config, ConfigError, GarmentDetector};
use log::info;
use serde::{Deserialize, Serialize};

/// 检测 API 错误类型（可序列化，便于跨语言传递）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectApiError {
    pub error_type: String,
    pub message: String,
}

impl DetectApiError {
    fn invalid_config(e: ConfigError) -> Self {
        Self {
            error_type: "InvalidConfig".to_string(),
            message: format!("配置无效: {}", e),
        }
    }

    fn invalid_job(e: serde_json::Error) -> Self {
        Self {
            error_type: "InvalidJob".to_string(),
            message: format!("任务解析失败: {}", e),
        }
    }

    fn serialization(e: serde_json::Error) -> Self {
        Self {
            error_type: "SerializationError".to_string(),
            message: format!("结果序列化失败: {}", e),
        }
    }
}

impl std::fmt::Display for DetectApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

impl std::error::Error for DetectApiError {}

/// 服装候选检测器
///
/// ```ignore
/// let api = GarmentDetectionApi::create();
/// let outcome = api.run_job(job)?;
/// for c in &outcome.candidates {
///     println!("#{} {} {:.2}", c.rank, c.id, c.confidence);
/// }
/// ```
pub struct GarmentDetectionApi {
    detector: GarmentDetector,
}

impl GarmentDetectionApi {
    /// 使用默认配置创建
    pub fn create() -> Self {
        crate::init_logging();
        info!("🧥 GarmentDetectionApi: created");
        Self {
            detector: GarmentDetector::new(Config::default()),
        }
    }

    /// 使用覆盖项（JSON 对象）创建；配置非法时返回错误
    pub fn with_config(overrides: serde_json::Value) -> Result<Self, DetectApiError> {
        crate::init_logging();
        let config = Config::build(Some(overrides)).map_err(DetectApiError::invalid_config)?;
        info!("🧥 GarmentDetectionApi: created (config {})", config.version);
        Ok(Self {
            detector: GarmentDetector::new(config),
        })
    }

    pub fn from_detector(detector: GarmentDetector) -> Self {
        info!("🧥 GarmentDetectionApi: created (custom detector)");
        Self { detector }
    }

    pub fn config(&self) -> &Config {
        self.detector.config()
    }

    /// 执行一个检测任务
    pub fn run_job(&self, job: DetectionJob) -> Result<DetectionOutcome, DetectApiError> {
        let request = job.into_request();
        let output = self
            .detector
            .detect(&request)
            .map_err(DetectApiError::invalid_config)?;
        Ok(DetectionOutcome {
            candidates: output.candidates,
            summary: output.summary,
        })
    }

    /// JSON 进、JSON 出
    pub fn run_job_json(&self, job_json: &str) -> Result<String, DetectApiError> {
        let job: DetectionJob = serde_json::from_str(job_json).map_err(DetectApiError::invalid_job)?;
        let outcome = self.run_job(job)?;
        serde_json::to_string(&outcome).map_err(DetectApiError::serialization)
    }
}

impl Drop for GarmentDetectionApi {
    fn drop(&mut self) {
        info!("🗑️ GarmentDetectionApi: released");
    }
}
