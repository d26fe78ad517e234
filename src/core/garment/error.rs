use thiserror::Error;

/// 配置错误 - 唯一的致命错误，只会在构建配置时出现
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: String, reason: String },
    #[error("config overrides must be a JSON object, got {0}")]
    OverridesNotObject(String),
    #[error("config overrides rejected: {0}")]
    Overrides(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// 出错字段（点号路径），覆盖解析失败时为 None
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// 单帧加载/解码错误，帧被跳过，不影响整批
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("empty frame payload")]
    Empty,
    #[error("decoded frame has zero size")]
    ZeroSize,
}

/// 单个裁剪的编码错误，该裁剪被丢弃
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("image encode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("crop is empty")]
    EmptyCrop,
    #[error("crop box {0} lies outside the frame")]
    OutOfBounds(String),
}
