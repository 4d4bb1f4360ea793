use thiserror::Error;

const FALLBACK_MESSAGE: &str = "An unexpected error occurred.";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider configuration error: {0}")]
    Config(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
    #[error("provider stream failed: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Message shown to the user in an `error` conversation entry.
    pub fn user_message(&self) -> String {
        let message = match self {
            ProviderError::Config(message)
            | ProviderError::Request(message)
            | ProviderError::Response(message)
            | ProviderError::Stream(message) => message.trim(),
        };

        if message.is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message.to_string()
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaygroundError {
    #[error("playground configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_strips_variant_prefix() {
        let err = ProviderError::Request("google api error 429 RESOURCE_EXHAUSTED: quota".into());
        assert_eq!(
            err.user_message(),
            "google api error 429 RESOURCE_EXHAUSTED: quota"
        );
    }

    #[test]
    fn user_message_falls_back_when_blank() {
        let err = ProviderError::Stream("   ".into());
        assert_eq!(err.user_message(), FALLBACK_MESSAGE);
    }
}
