use thiserror::Error;

/// 采集系统错误类型定义
#[derive(Debug, Error)]
pub enum HarvesterError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("HTTP请求错误: {0}")]
    Http(String),

    #[error("获取频道列表失败: {0}")]
    ChannelListing(String),

    #[error("进度存储错误: {0}")]
    Persistence(String),

    #[error("解析器错误: {0}")]
    Parser(String),

    #[error("无效的任务消息: {0}")]
    MalformedTask(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, HarvesterError>;
