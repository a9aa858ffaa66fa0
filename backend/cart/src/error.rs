use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Server rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Cart is still loading")]
    NotReady,
}
