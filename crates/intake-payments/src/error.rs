#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The gateway answered 200 but reported an error in the body.
    #[error("gateway error {code}: {message}")]
    Gateway { code: String, message: String },

    #[error("gateway response is missing {0}")]
    MissingField(&'static str),
}
