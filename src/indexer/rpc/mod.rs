pub mod contract;
pub mod logs;
pub mod subscription;
