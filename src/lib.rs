pub mod api;
pub mod core;

pub use crate::core::garment::{Config, DetectionOutput, DetectionRequest, GarmentDetector, ReasonCode};

pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("garment_detect"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        // 非 Android 平台由宿主进程安装 log 实现
    }
}
