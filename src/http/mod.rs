//! Request plumbing shared by both HTTP planes.
//!
//! One `Context` is built at startup and passed explicitly as axum state —
//! per the spec's own design note, no thread-local/task-local globals stand
//! in for it.

pub mod client;
pub mod manager;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::token::TokenCodec;
use crate::volume::VolumeRouter;

pub struct Context {
    pub volumes: VolumeRouter,
    pub tokens: TokenCodec,
    pub manager_secret: String,
    pub scandir_limit: usize,
    pub max_upload_size: u64,
    pub session_expire: Duration,
}

impl Context {
    pub fn new(config: &Config, volumes: VolumeRouter) -> Self {
        Self {
            volumes,
            tokens: TokenCodec::new(config.storage_proxy.secret.clone()),
            manager_secret: config.storage_proxy.secret.clone(),
            scandir_limit: config.storage_proxy.scandir_limit,
            max_upload_size: config.storage_proxy.max_upload_size,
            session_expire: config.storage_proxy.session_expire,
        }
    }

    pub fn now(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is before the unix epoch")
            .as_secs() as i64
    }
}

pub type SharedContext = Arc<Context>;
