use log::{info, warn};
use once_cell::sync::OnceCell;
use rayon::{ThreadPool, ThreadPoolBuilder};

static WORKER_POOL: OnceCell<Option<ThreadPool>> = OnceCell::new();

/// 默认工作线程数（移动端不超过 4）
pub fn default_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

fn build_pool(threads: usize) -> Option<ThreadPool> {
    let threads = threads.max(1);
    match ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("garment-worker-{}", i))
        .build()
    {
        Ok(pool) => {
            info!("🧵 检测线程池已创建: {} 线程", threads);
            Some(pool)
        }
        Err(e) => {
            warn!("⚠️ 线程池创建失败，改用 rayon 全局线程池: {}", e);
            None
        }
    }
}

/// 显式初始化线程池；已初始化时返回 false
pub fn init_worker_pool(threads: usize) -> bool {
    let mut created = false;
    WORKER_POOL.get_or_init(|| {
        created = true;
        build_pool(threads)
    });
    created
}

fn worker_pool() -> Option<&'static ThreadPool> {
    WORKER_POOL
        .get_or_init(|| build_pool(default_threads()))
        .as_ref()
}

/// 在检测线程池中执行（其中的 par_iter 使用该池）
pub fn install<R, F>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match worker_pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}
