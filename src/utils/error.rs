use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid validation request: {message}")]
    InvalidRequest { message: String },

    #[error("Target {uri} could not be reached: {message}")]
    TargetUnreachable { uri: String, message: String },

    #[error("Payload error: {message}")]
    PayloadError { message: String },

    #[error("Metadata document error: {message}")]
    MetadataError { message: String },

    #[error("Rule {rule} failed to run: {message}")]
    RuleError { rule: String, message: String },

    #[error("Rule {name} is already registered")]
    DuplicateRule { name: String },

    #[error("Job {id} not found")]
    JobNotFound { id: String },

    #[error("Job {id} has not finished yet")]
    JobNotFinished { id: String },

    #[error("Server busy: job queue is full ({capacity} jobs waiting)")]
    ServerBusy { capacity: usize },

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("Storage error: {message}")]
    StorageError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Config,
    Network,
    Payload,
    Rule,
    Job,
    Storage,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ValidatorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigValidationError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidRequest { .. } => ErrorCategory::Config,
            Self::HttpError(_) | Self::UrlError(_) | Self::TargetUnreachable { .. } => {
                ErrorCategory::Network
            }
            Self::XmlError(_)
            | Self::SerializationError(_)
            | Self::PayloadError { .. }
            | Self::MetadataError { .. } => ErrorCategory::Payload,
            Self::RuleError { .. } | Self::DuplicateRule { .. } => ErrorCategory::Rule,
            Self::JobNotFound { .. }
            | Self::JobNotFinished { .. }
            | Self::ServerBusy { .. }
            | Self::QueueClosed => ErrorCategory::Job,
            Self::ZipError(_) | Self::CsvError(_) | Self::StorageError { .. } => {
                ErrorCategory::Storage
            }
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::JobNotFinished { .. } | Self::ServerBusy { .. } => ErrorSeverity::Low,
            Self::HttpError(_)
            | Self::TargetUnreachable { .. }
            | Self::RuleError { .. }
            | Self::JobNotFound { .. } => ErrorSeverity::Medium,
            Self::IoError(_) | Self::QueueClosed | Self::StorageError { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Config => "檢查設定值或請求參數是否正確 (URL 需為 http/https)",
            ErrorCategory::Network => "確認目標 OData 服務可連線，並檢查 timeout 與 headers 設定",
            ErrorCategory::Payload => "確認目標回傳的是合法的 OData JSON/XML 內容",
            ErrorCategory::Rule => "檢查規則選擇 (include/exclude) 或個別規則的日誌",
            ErrorCategory::Job => match self {
                Self::ServerBusy { .. } => "稍後重新提交驗證工作",
                _ => "確認 job id 是否正確，或等待工作完成",
            },
            ErrorCategory::Storage => "檢查結果儲存路徑的權限與磁碟空間",
            ErrorCategory::System => "檢查系統資源或檔案權限",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::TargetUnreachable { uri, .. } => format!("無法連線到目標服務: {}", uri),
            Self::ServerBusy { .. } => "伺服器忙碌中，驗證佇列已滿".to_string(),
            Self::JobNotFound { id } => format!("找不到驗證工作: {}", id),
            Self::InvalidRequest { message } => format!("驗證請求無效: {}", message),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
